//! Inbound handler registry
//!
//! Maps a command to an ordered list of handlers. Registrations accumulate
//! and every handler for a command runs, in order, for each matching
//! message. Built-in protocol handlers are registered first.
//!
//! Handlers run synchronously on the receive task. A handler that blocks
//! stalls all inbound processing for the connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::State;
use crate::error::Error;
use crate::message::Message;
use crate::session::Session;

pub const RPL_WELCOME: &str = "001";
pub const RPL_ISUPPORT: &str = "005";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";
pub const ERR_NICKNAMEINUSE: &str = "433";

/// Something that reacts to an inbound message
pub trait Handler: Send + Sync {
    fn handle(&self, session: &mut Session, msg: &Message);
}

impl<F> Handler for F
where
    F: Fn(&mut Session, &Message) + Send + Sync,
{
    fn handle(&self, session: &mut Session, msg: &Message) {
        self(session, msg)
    }
}

/// A group of handlers stacked onto a registry in one call
pub type HandlerSet = Vec<(String, Arc<dyn Handler>)>;

/// Per-command ordered handler lists
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Vec<Arc<dyn Handler>>>,
}

impl Registry {
    /// Empty registry with no protocol behaviour
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-in protocol handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.stack(builtins());
        registry
    }

    /// Append a handler for `command` (case-insensitive)
    pub fn on<H>(&mut self, command: &str, handler: H)
    where
        H: Handler + 'static,
    {
        self.add(command, Arc::new(handler));
    }

    pub fn add(&mut self, command: &str, handler: Arc<dyn Handler>) {
        self.handlers
            .entry(command.to_uppercase())
            .or_default()
            .push(handler);
    }

    /// Append every handler of `set`, preserving its order
    pub fn stack(&mut self, set: HandlerSet) {
        for (command, handler) in set {
            self.add(&command, handler);
        }
    }

    /// Number of handlers registered for `command`
    pub fn count(&self, command: &str) -> usize {
        self.handlers
            .get(&command.to_uppercase())
            .map_or(0, Vec::len)
    }

    /// Run all handlers for `msg.command`
    ///
    /// Returns false when nothing is registered for the command.
    pub fn dispatch(&self, session: &mut Session, msg: &Message) -> bool {
        let Some(handlers) = self.handlers.get(&msg.command) else {
            return false;
        };
        for handler in handlers {
            handler.handle(session, msg);
        }
        true
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self.handlers.iter().map(|(k, v)| (k, v.len())).collect();
        counts.sort();
        f.debug_struct("Registry").field("handlers", &counts).finish()
    }
}

/// Baseline protocol behaviour
pub fn builtins() -> HandlerSet {
    let set: [(&str, Arc<dyn Handler>); 9] = [
        ("PING", Arc::new(on_ping)),
        ("PONG", Arc::new(on_pong)),
        ("NICK", Arc::new(on_nick)),
        ("ERROR", Arc::new(on_error)),
        (RPL_WELCOME, Arc::new(on_welcome)),
        (RPL_ISUPPORT, Arc::new(on_isupport)),
        (RPL_NAMREPLY, Arc::new(on_names)),
        (RPL_ENDOFNAMES, Arc::new(on_end_of_names)),
        (ERR_NICKNAMEINUSE, Arc::new(on_nick_in_use)),
    ];
    set.into_iter()
        .map(|(command, handler)| (command.to_string(), handler))
        .collect()
}

/// Reflect server pings
fn on_ping(session: &mut Session, msg: &Message) {
    let token = msg
        .params
        .first()
        .map(String::as_str)
        .unwrap_or(&msg.trailing);
    if token.is_empty() {
        debug!("Ignoring PING without a token");
        return;
    }
    if let Err(e) = session.commands().pong(token) {
        warn!("Failed to queue PONG: {}", e);
    }
}

/// Forward PONG payloads for keepalive correlation
fn on_pong(session: &mut Session, msg: &Message) {
    session.pong_received(msg.last_param().unwrap_or_default());
}

/// Follow our own nick changes
fn on_nick(session: &mut Session, msg: &Message) {
    let Some(old) = msg.nick() else {
        return;
    };
    if !session.is_me(old) {
        return;
    }
    if let Some(new) = msg.last_param() {
        info!("Nick changed from {} to {}", old, new);
        session.set_nick(new);
    }
}

/// Server-issued fatal notice
fn on_error(session: &mut Session, msg: &Message) {
    let reason = msg.last_param().unwrap_or("unknown error");
    session.fail(Error::Server(reason.to_string()));
}

/// Registration accepted; the first parameter is the nick the server gave us
fn on_welcome(session: &mut Session, msg: &Message) {
    if let Some(nick) = msg.params.first().filter(|n| !n.is_empty()) {
        if !session.is_me(nick) {
            session.set_nick(nick.as_str());
        }
    }
    session.set_state(State::Established);
    info!("Registered as {}", session.nick());
}

/// Collision on registration or nick change: retry once with `_` appended
fn on_nick_in_use(session: &mut Session, _msg: &Message) {
    let nick = format!("{}_", session.nick());
    debug!("Nick in use, retrying as {}", nick);
    session.set_nick(nick.as_str());
    if let Err(e) = session.commands().nick(&nick) {
        warn!("Failed to queue NICK: {}", e);
    }
}

/// Accumulate `KEY[=VALUE]` tokens; `-KEY` withdraws one
fn on_isupport(session: &mut Session, msg: &Message) {
    for token in &msg.params {
        if session.is_me(token) {
            continue;
        }
        if let Some(key) = token.strip_prefix('-') {
            session.remove_capability(key);
            continue;
        }
        match token.split_once('=') {
            Some((key, value)) => session.set_capability(key, value),
            None => session.set_capability(token, ""),
        }
    }
}

/// `:server 353 <nick> <type> <channel> :<names...>`
fn on_names(session: &mut Session, msg: &Message) {
    let Some(channel) = msg.params.last() else {
        return;
    };
    let prefixes = session.status_prefixes().to_string();
    let members = msg
        .trailing
        .split_whitespace()
        .map(|name| {
            let name = name.trim_start_matches(|c: char| prefixes.contains(c));
            // userhost-in-names form carries a full hostmask
            name.split('!').next().unwrap_or(name).to_string()
        })
        .filter(|name| !name.is_empty());
    session.rosters().names_reply(channel, members);
}

/// `:server 366 <nick> <channel> :End of /NAMES list.`
fn on_end_of_names(session: &mut Session, msg: &Message) {
    if let Some(channel) = msg.params.last() {
        session.rosters().end_of_names(channel);
    }
}
