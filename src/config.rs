//! Client configuration
//!
//! Deserializable with serde so hosts can load it from any format.
//! Durations are given in (fractional) seconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::Error;

/// Connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port` to dial
    pub address: String,
    pub nick: String,
    pub user: String,
    pub realname: String,
    /// Sent as PASS before registration when set
    pub password: Option<String>,
    /// Upgrade the connection to TLS
    pub tls: bool,
    /// Accept any server certificate
    pub tls_insecure: bool,
    /// Log every frame in both directions at info level
    pub verbose: bool,
    /// Ping interval and pong timeout; zero disables keepalive
    #[serde(rename = "keepalive_secs", deserialize_with = "seconds")]
    pub keepalive: Duration,
    /// Rate limiter refill interval
    #[serde(rename = "send_interval_secs", deserialize_with = "seconds")]
    pub send_interval: Duration,
    /// Commands that may be sent back to back before limiting kicks in
    pub send_burst: usize,
    /// Bound of the outbound command queue
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6667".to_string(),
            nick: String::new(),
            user: String::new(),
            realname: String::new(),
            password: None,
            tls: false,
            tls_insecure: false,
            verbose: false,
            keepalive: Duration::ZERO,
            send_interval: Duration::from_secs(1),
            send_burst: 4,
            queue_capacity: 32,
        }
    }
}

impl Config {
    /// Config with the given identity and defaults elsewhere
    pub fn new(address: impl Into<String>, nick: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            nick: nick.into(),
            user: user.into(),
            ..Self::default()
        }
    }

    /// Reject configs that cannot register
    pub fn validate(&self) -> Result<(), Error> {
        if self.nick.trim().is_empty() {
            return Err(Error::InvalidIdentity("nick must not be empty"));
        }
        if self.user.trim().is_empty() {
            return Err(Error::InvalidIdentity("username must not be empty"));
        }
        Ok(())
    }

    /// Real name, falling back to the username
    pub fn realname(&self) -> &str {
        if self.realname.is_empty() {
            &self.user
        } else {
            &self.realname
        }
    }

    /// Host part of `address`, used as the TLS server name
    pub fn host(&self) -> &str {
        let host = match self.address.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => &self.address,
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }
}

fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
