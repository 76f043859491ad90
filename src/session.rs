//! Per-connection session state
//!
//! A `Session` is owned by the receive task and handed to every handler by
//! `&mut`, so inbound-driven state (nick, capabilities, rosters) needs no
//! locking. Only the outbound queue and the roster handle are shared.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::client::State;
use crate::command::Commands;
use crate::error::Error;
use crate::roster::Rosters;
use crate::types::SessionId;

/// Status prefixes assumed when the server advertises none
const DEFAULT_STATUS_PREFIXES: &str = "@+";

/// One-shot slot for the error that ends a connection
///
/// The first report wins; later ones are logged and dropped.
#[derive(Debug, Clone)]
pub(crate) struct FatalSlot {
    slot: Arc<Mutex<Option<oneshot::Sender<Error>>>>,
}

impl FatalSlot {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Error>) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (slot, rx)
    }

    pub(crate) fn report(&self, err: Error) {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            Some(tx) => {
                debug!("Fatal error reported: {}", err);
                let _ = tx.send(err);
            }
            None => debug!("Dropping secondary fatal error: {}", err),
        }
    }
}

/// State visible to handlers
pub struct Session {
    id: SessionId,
    nick: String,
    capabilities: HashMap<String, String>,
    rosters: Rosters,
    commands: Commands,
    state: Arc<watch::Sender<State>>,
    fatal: FatalSlot,
    pongs: Option<mpsc::Sender<String>>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        nick: String,
        commands: Commands,
        rosters: Rosters,
        state: Arc<watch::Sender<State>>,
        fatal: FatalSlot,
        pongs: Option<mpsc::Sender<String>>,
    ) -> Self {
        Self {
            id,
            nick,
            capabilities: HashMap::new(),
            rosters,
            commands,
            state,
            fatal,
            pongs,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Our current nick as tracked from server confirmations
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub(crate) fn set_nick(&mut self, nick: impl Into<String>) {
        self.nick = nick.into();
    }

    /// Check whether `nick` is us (ASCII case-insensitive)
    pub fn is_me(&self, nick: &str) -> bool {
        self.nick.eq_ignore_ascii_case(nick)
    }

    /// Outbound command handle
    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    pub fn rosters(&self) -> &Rosters {
        &self.rosters
    }

    /// Server-advertised ISUPPORT value (empty string for bare flags)
    pub fn capability(&self, key: &str) -> Option<&str> {
        self.capabilities.get(key).map(String::as_str)
    }

    pub fn capabilities(&self) -> &HashMap<String, String> {
        &self.capabilities
    }

    pub(crate) fn set_capability(&mut self, key: &str, value: &str) {
        self.capabilities.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn remove_capability(&mut self, key: &str) {
        self.capabilities.remove(key);
    }

    /// Characters that may prefix a nick in a NAMES reply
    ///
    /// Taken from the symbol half of `PREFIX=(modes)symbols`, then from
    /// `STATUSMSG`, then `@+`.
    pub fn status_prefixes(&self) -> &str {
        if let Some(prefix) = self.capability("PREFIX") {
            if let Some((_, symbols)) = prefix.split_once(')') {
                return symbols;
            }
        }
        self.capability("STATUSMSG")
            .unwrap_or(DEFAULT_STATUS_PREFIXES)
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: State) {
        self.state.send_replace(state);
    }

    /// End the connection with `err`
    pub fn fail(&self, err: Error) {
        self.fatal.report(err);
    }

    /// Hand a PONG payload to the keepalive task
    pub(crate) fn pong_received(&self, payload: &str) {
        let Some(pongs) = &self.pongs else {
            return;
        };
        if pongs.try_send(payload.to_string()).is_err() {
            warn!("Session {} dropped PONG {:?}", self.id, payload);
        }
    }
}
