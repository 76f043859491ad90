//! Error types for the IRC engine
//!
//! Splits failures into three families:
//! - `ParseError`: a single line or hostmask could not be parsed
//! - `Error`: configuration and connection-fatal errors
//! - `SendError`: outbound commands that could not be queued
//!
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Wire parsing errors
///
/// Non-fatal when seen on the wire (the line is logged and skipped).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Blank line
    #[error("empty message")]
    EmptyMessage,

    /// No command after the prefix, or not renderable as a single frame
    #[error("malformed message")]
    InvalidMessage,

    /// Empty sender prefix
    #[error("empty hostmask")]
    EmptyHostmask,

    /// Misplaced or missing `!`/`@` delimiters
    #[error("malformed hostmask")]
    InvalidHostmask,
}

/// Engine-level errors
///
/// Everything except `InvalidIdentity` and `NotConnected` terminates the
/// connection when it surfaces from `Client::run`.
#[derive(Debug, Error)]
pub enum Error {
    /// Nick or username missing (checked before any network I/O)
    #[error("invalid identity: {0}")]
    InvalidIdentity(&'static str),

    /// Socket read/write or dial failure (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake failure (fatal)
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] std::io::Error),

    /// Address host part is not usable as a TLS server name
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// Server sent an ERROR notice
    #[error("server error: {0}")]
    Server(String),

    /// No PONG within the keepalive interval
    #[error("ping timeout")]
    PingTimeout,

    /// PONG payload did not echo the outstanding nonce
    #[error("pong mismatch: expected {expected:?}, received {received:?}")]
    PongMismatch { expected: String, received: String },

    /// Server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Lifecycle call made without a live connection
    #[error("not connected")]
    NotConnected,

    /// Parse error returned to a library caller
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Outbound queue error
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Outbound command errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The send task has exited
    #[error("Channel closed")]
    ChannelClosed,

    /// The bounded outbound queue has no free slot
    #[error("Outbound queue full")]
    QueueFull,

    /// A raw line failed validation
    #[error("malformed command: {0}")]
    Parse(#[from] ParseError),
}

/// Returned by `RateLimiter::acquire` once the limiter has been shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter closed")]
pub struct LimiterClosed;
