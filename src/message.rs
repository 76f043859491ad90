//! Message codec
//!
//! Parses one wire frame into a [`Message`] and renders it back.
//!
//! ```text
//! [":" prefix " "] command (" " middle){0,14} [" " [":"] trailing]
//! ```
//!
//! Framing (`\r\n`) belongs to the transport: `parse` accepts a line with
//! or without a terminator and `Display` never emits one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::hostmask::Hostmask;

/// Maximum number of middle parameters before the rest becomes trailing
pub const MAX_PARAMS: usize = 14;

/// One protocol message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Receive time (None for locally built messages)
    pub time: Option<DateTime<Utc>>,
    /// Sender prefix
    pub from: Option<Hostmask>,
    /// Upper-cased command or three-digit numeric
    pub command: String,
    /// Middle parameters, at most [`MAX_PARAMS`]
    pub params: Vec<String>,
    /// Free-text final parameter (empty when absent)
    pub trailing: String,
}

/// What the first parameter of a message addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    None,
    Channel(String),
    User(String),
}

impl Message {
    /// Build an outbound message
    ///
    /// The command is upper-cased. Parameters beyond [`MAX_PARAMS`] are
    /// folded into the trailing text, ahead of `trailing`.
    pub fn new<S: Into<String>>(
        command: &str,
        params: impl IntoIterator<Item = S>,
        trailing: Option<&str>,
    ) -> Self {
        let mut params: Vec<String> = params.into_iter().map(Into::into).collect();
        let mut trailing = trailing.unwrap_or_default().to_string();

        if params.len() > MAX_PARAMS {
            let mut overflow = params.split_off(MAX_PARAMS).join(" ");
            if !trailing.is_empty() {
                overflow.push(' ');
                overflow.push_str(&trailing);
            }
            trailing = overflow;
        }

        Self {
            time: None,
            from: None,
            command: command.to_uppercase(),
            params,
            trailing,
        }
    }

    /// Check that the message renders as exactly one frame
    ///
    /// Rejects NUL, CR and LF anywhere, an empty or spaced command, and
    /// middle parameters that are empty, contain a space or start with `:`.
    pub fn validate(&self) -> Result<(), ParseError> {
        let framed = |s: &str| !s.contains(['\0', '\r', '\n']);

        if self.command.is_empty() || self.command.contains(' ') || !framed(&self.command) {
            return Err(ParseError::InvalidMessage);
        }
        for param in &self.params {
            if param.is_empty() || param.contains(' ') || param.starts_with(':') || !framed(param) {
                return Err(ParseError::InvalidMessage);
            }
        }
        if !framed(&self.trailing) {
            return Err(ParseError::InvalidMessage);
        }
        Ok(())
    }

    /// Parse a line received at `time`
    pub fn parse_at(line: &str, time: DateTime<Utc>) -> Result<Self, ParseError> {
        let mut msg = Self::parse(line)?;
        msg.time = Some(time);
        Ok(msg)
    }

    /// Parse a line without a timestamp
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut s = line.trim();
        if s.is_empty() {
            return Err(ParseError::EmptyMessage);
        }

        let mut msg = Message::default();

        // Prefix
        if let Some(rest) = s.strip_prefix(':') {
            let Some(end) = rest.find(' ') else {
                return Err(ParseError::InvalidMessage);
            };
            msg.from = Some(Hostmask::parse(&rest[..end])?);
            s = rest[end + 1..].trim_start();
            if s.is_empty() {
                return Err(ParseError::InvalidMessage);
            }
        }

        // Command
        let Some(end) = s.find(' ') else {
            msg.command = s.to_uppercase();
            return Ok(msg);
        };
        msg.command = s[..end].to_uppercase();
        s = &s[end + 1..];

        // Params and trailing
        loop {
            s = s.trim_start_matches(' ');
            if s.is_empty() {
                return Ok(msg);
            }
            if let Some(trailing) = s.strip_prefix(':') {
                msg.trailing = trailing.to_string();
                return Ok(msg);
            }
            if msg.params.len() == MAX_PARAMS {
                // No colon needed once the cap is reached
                msg.trailing = s.to_string();
                return Ok(msg);
            }
            match s.find(' ') {
                Some(end) => {
                    msg.params.push(s[..end].to_string());
                    s = &s[end + 1..];
                }
                None => {
                    msg.params.push(s.to_string());
                    return Ok(msg);
                }
            }
        }
    }

    /// Classify the first parameter
    pub fn target(&self) -> Target {
        match self.params.first() {
            None => Target::None,
            Some(p) if p.is_empty() => Target::None,
            Some(p) if p.starts_with(['#', '&', '+', '!']) => Target::Channel(p.clone()),
            Some(p) => Target::User(p.clone()),
        }
    }

    /// Sender nick, if the sender is a user
    pub fn nick(&self) -> Option<&str> {
        self.from
            .as_ref()
            .filter(|h| !h.is_server())
            .map(|h| h.nick.as_str())
    }

    /// Trailing text if present, otherwise the last middle parameter
    pub fn last_param(&self) -> Option<&str> {
        if !self.trailing.is_empty() {
            Some(&self.trailing)
        } else {
            self.params.last().map(String::as_str)
        }
    }
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Message::parse(s)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(from) = &self.from {
            write!(f, ":{} ", from)?;
        }
        f.write_str(&self.command)?;
        for param in &self.params {
            write!(f, " {}", param)?;
        }
        if !self.trailing.is_empty() {
            write!(f, " :{}", self.trailing)?;
        }
        Ok(())
    }
}
