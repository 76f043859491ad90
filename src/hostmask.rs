//! Sender prefix (`nick!user@address`)
//!
//! A hostmask is either fully populated or address-only, the latter being
//! how servers identify themselves.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::pattern;

/// Message origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Hostmask {
    pub nick: String,
    pub user: String,
    pub address: String,
}

impl Hostmask {
    /// Parse a prefix string
    ///
    /// Strings without `!` or `@` are taken as a bare address. Otherwise
    /// both delimiters must appear, `!` first, with non-empty nick and user
    /// segments. The address may be empty.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::EmptyHostmask);
        }

        let (bang, at) = match (s.find('!'), s.find('@')) {
            (None, None) => return Ok(Self::server(s)),
            (Some(bang), Some(at)) => (bang, at),
            _ => return Err(ParseError::InvalidHostmask),
        };

        // Empty nick, `@` before `!`, or empty user
        if bang == 0 || at < bang + 2 {
            return Err(ParseError::InvalidHostmask);
        }

        Ok(Self {
            nick: s[..bang].to_string(),
            user: s[bang + 1..at].to_string(),
            address: s[at + 1..].to_string(),
        })
    }

    /// Address-only (server name) form
    pub fn server(address: impl Into<String>) -> Self {
        Self {
            nick: String::new(),
            user: String::new(),
            address: address.into(),
        }
    }

    /// Check if this is the address-only form
    pub fn is_server(&self) -> bool {
        self.nick.is_empty() && self.user.is_empty()
    }

    /// Match against a wildcard pattern given as text
    ///
    /// An unparseable pattern matches nothing.
    pub fn matches_str(&self, pattern: &str) -> bool {
        match Hostmask::parse(pattern) {
            Ok(pattern) => self.matches(&pattern),
            Err(_) => false,
        }
    }

    /// Match against a wildcard pattern
    ///
    /// Exact equality wins outright; otherwise each of nick, user and
    /// address is glob-matched against its counterpart in `pattern`.
    pub fn matches(&self, pattern: &Hostmask) -> bool {
        self == pattern
            || (pattern::matches(&pattern.nick, &self.nick)
                && pattern::matches(&pattern.user, &self.user)
                && pattern::matches(&pattern.address, &self.address))
    }
}

impl FromStr for Hostmask {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hostmask::parse(s)
    }
}

impl fmt::Display for Hostmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_server() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{}!{}@{}", self.nick, self.user, self.address)
        }
    }
}
