//! Line-oriented IRC client engine
//!
//! An event-driven IRC client core built on tokio. Frames and parses
//! protocol lines, manages one server connection, dispatches inbound
//! messages to registered handlers and paces outbound commands.
//!
//! # Features
//! - RFC 2812 message codec (14-parameter cap, implicit trailing)
//! - `nick!user@address` hostmask parsing with wildcard matching
//! - Ordered, stackable per-command handlers on top of built-ins
//! - Token-bucket pacing of outbound commands
//! - Ping/pong keepalive with random nonces
//! - Per-channel NAMES roster tracking
//! - Optional TLS via rustls
//!
//! # Architecture
//! Each connection runs three tasks sharing one shutdown signal:
//! - the receive task owns the [`Session`] and runs handlers on it
//! - the send task is the only writer, gated by a [`RateLimiter`]
//! - the keepalive task pings and waits for the matching PONG
//!
//! Handlers run synchronously on the receive task, so session state needs
//! no locks. A handler that blocks stalls inbound processing.
//!
//! # Example
//! ```ignore
//! use irc_engine::{Client, Config, Message, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), irc_engine::Error> {
//!     let mut client = Client::new(Config::new("irc.libera.chat:6667", "bot", "bot"));
//!
//!     client.on_command("001", |s: &mut Session, _: &Message| {
//!         let _ = s.commands().join("#bots", None);
//!     });
//!     client.on_command("PRIVMSG", |s: &mut Session, m: &Message| {
//!         if m.trailing == "!ping" {
//!             let _ = s.commands().privmsg(&m.params[0], "pong");
//!         }
//!     });
//!
//!     client.connect().await?;
//!     client.run().await
//! }
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod handler;
pub mod hostmask;
pub mod message;
pub mod pattern;
pub mod ratelimit;
pub mod roster;
pub mod session;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{Client, State};
pub use command::Commands;
pub use config::Config;
pub use error::{Error, LimiterClosed, ParseError, SendError};
pub use handler::{Handler, HandlerSet, Registry};
pub use hostmask::Hostmask;
pub use message::{Message, Target};
pub use ratelimit::RateLimiter;
pub use roster::{Roster, Rosters};
pub use session::Session;
pub use types::{Nonce, SessionId, Shutdown};
