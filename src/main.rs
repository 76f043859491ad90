//! Demo host for the IRC engine
//!
//! Loads a JSON config, joins the listed channels once registered, logs
//! channel traffic and reconnects with exponential backoff.

use std::env;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use irc_engine::{Client, Config, Message, Session, Target};

/// Default config file path
const DEFAULT_CONFIG: &str = "config.json";

/// Reconnect backoff bounds
const MIN_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct HostConfig {
    #[serde(flatten)]
    engine: Config,
    #[serde(default)]
    channels: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=irc_engine=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("irc_engine=info")),
        )
        .init();

    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let raw = tokio::fs::read_to_string(&path).await?;
    let config: HostConfig = serde_json::from_str(&raw)?;

    let mut client = Client::new(config.engine);

    let channels = config.channels;
    client.on_command("001", move |s: &mut Session, _: &Message| {
        for channel in &channels {
            if let Err(e) = s.commands().join(channel, None) {
                error!("Failed to join {}: {}", channel, e);
            }
        }
    });
    client.on_command("PRIVMSG", |_: &mut Session, m: &Message| {
        let from = m.nick().unwrap_or("?");
        match m.target() {
            Target::Channel(channel) => info!("[{}] <{}> {}", channel, from, m.trailing),
            _ => info!("<{}> {}", from, m.trailing),
        }
    });

    // Reconnection is the host's job
    let mut backoff = MIN_BACKOFF;
    loop {
        match client.connect().await {
            Ok(()) => {
                backoff = MIN_BACKOFF;
                match client.run().await {
                    Ok(()) => {
                        info!("Interrupted, exiting");
                        return Ok(());
                    }
                    Err(e) => error!("Connection lost: {}", e),
                }
            }
            Err(e) => error!("Connect failed: {}", e),
        }

        info!("Reconnecting in {:?}", backoff);
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
