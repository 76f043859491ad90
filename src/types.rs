//! Basic type definitions for the engine
//!
//! Provides small wrappers used across modules:
//! - `SessionId`: UUID-based identifier for one connection, used in logs
//! - `Nonce`: random keepalive token
//! - `Shutdown`: the single, idempotent termination signal

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

/// Identifies one connection in log lines
///
/// Minted fresh on every `connect`, so lines from a reconnect are never
/// attributed to the connection it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

/// Shows the first UUID group only; enough to tell sessions apart in logs
impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let full = self.0.simple().to_string();
        f.write_str(&full[..8])
    }
}

/// Keepalive nonce (16-character alphanumeric)
///
/// Sent as the PING payload and expected back verbatim in the PONG.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nonce(pub String);

impl Nonce {
    /// Generate a new random nonce
    pub fn generate() -> Self {
        use rand::Rng;
        let token: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broadcast termination signal
///
/// Clones share one flag. `trigger` may be called any number of times;
/// only the first has an effect. Waiters observe it at their next await.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Fire the signal
    pub fn trigger(&self) {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        });
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal has fired
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of self, so Err is unreachable
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
