//! Outbound command handle
//!
//! Every outbound frame goes through one bounded queue drained by the send
//! task, so writes never interleave. Enqueueing does not block: handlers
//! run synchronously on the receive task and must not wait on the queue.

use tokio::sync::mpsc;

use crate::error::{ParseError, SendError};
use crate::message::Message;

/// Cloneable sender for outbound commands
#[derive(Debug, Clone)]
pub struct Commands {
    sender: mpsc::Sender<Message>,
}

impl Commands {
    pub(crate) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Queue a message without waiting
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        msg.validate()?;
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Queue a message, waiting for a free slot
    ///
    /// For use from host tasks; never call from a handler.
    pub async fn send_wait(&self, msg: Message) -> Result<(), SendError> {
        msg.validate()?;
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Queue a well-formed command
    pub fn send_command(
        &self,
        command: &str,
        params: &[&str],
        trailing: Option<&str>,
    ) -> Result<(), SendError> {
        self.send(Message::new(command, params.iter().copied(), trailing))
    }

    /// Validate and queue a raw protocol line
    ///
    /// The line must not carry its own terminator.
    pub fn send_raw(&self, line: &str) -> Result<(), SendError> {
        if line.contains(['\0', '\r', '\n']) {
            return Err(ParseError::InvalidMessage.into());
        }
        let msg = Message::parse(line)?;
        self.send(msg)
    }

    pub fn pass(&self, password: &str) -> Result<(), SendError> {
        self.send_command("PASS", &[password], None)
    }

    /// `USER <user> 0 * :<realname>`
    pub fn user(&self, user: &str, realname: &str) -> Result<(), SendError> {
        self.send_command("USER", &[user, "0", "*"], Some(realname))
    }

    pub fn nick(&self, nick: &str) -> Result<(), SendError> {
        self.send_command("NICK", &[nick], None)
    }

    pub fn privmsg(&self, target: &str, text: &str) -> Result<(), SendError> {
        self.send_command("PRIVMSG", &[target], Some(text))
    }

    pub fn notice(&self, target: &str, text: &str) -> Result<(), SendError> {
        self.send_command("NOTICE", &[target], Some(text))
    }

    pub fn join(&self, channel: &str, key: Option<&str>) -> Result<(), SendError> {
        match key {
            Some(key) => self.send_command("JOIN", &[channel, key], None),
            None => self.send_command("JOIN", &[channel], None),
        }
    }

    pub fn part(&self, channel: &str, reason: Option<&str>) -> Result<(), SendError> {
        self.send_command("PART", &[channel], reason)
    }

    pub fn ping(&self, token: &str) -> Result<(), SendError> {
        self.send_command("PING", &[token], None)
    }

    /// Answer a PING; payloads containing spaces go in the trailing slot
    pub fn pong(&self, token: &str) -> Result<(), SendError> {
        if token.is_empty() || token.contains(' ') || token.starts_with(':') {
            self.send_command("PONG", &[], Some(token))
        } else {
            self.send_command("PONG", &[token], None)
        }
    }

    pub fn quit(&self, reason: Option<&str>) -> Result<(), SendError> {
        self.send_command("QUIT", &[], reason)
    }
}
