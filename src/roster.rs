//! Channel roster tracker
//!
//! Accumulates NAMES replies (353) per channel until the end-of-list
//! sentinel (366) arrives. Each channel's state sits in a `watch` channel:
//! the receive task is the only writer, while readers on any task wait on
//! it for the gathering flag to clear.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::debug;

/// Snapshot of one channel's member list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    /// Channel name as first seen
    pub name: String,
    /// Member nicks in arrival order
    pub members: Vec<String>,
    /// A NAMES listing is in progress
    pub gathering: bool,
}

/// Shared handle to all channel rosters of a client
///
/// Cloning is cheap; all clones see the same channels.
#[derive(Debug, Clone, Default)]
pub struct Rosters {
    channels: Arc<Mutex<HashMap<String, watch::Sender<Roster>>>>,
}

impl Rosters {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<Roster>>> {
        // A poisoned map only means a handler panicked mid-update
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one NAMES reply
    ///
    /// Starts a fresh listing (replacing any completed one) unless a
    /// listing for this channel is already in progress, in which case the
    /// members are appended.
    pub fn names_reply<I>(&self, channel: &str, members: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut channels = self.lock();
        let entry = channels.entry(key(channel)).or_insert_with(|| {
            debug!("Tracking roster for {}", channel);
            watch::channel(Roster {
                name: channel.to_string(),
                ..Roster::default()
            })
            .0
        });

        // Readers only care about the gathering -> complete transition
        entry.send_if_modified(|roster| {
            let started = !roster.gathering;
            if started {
                roster.members.clear();
                roster.gathering = true;
            }
            roster.members.extend(members);
            started
        });
    }

    /// Record the end-of-list sentinel
    ///
    /// Releases waiting readers exactly once per listing. A sentinel for
    /// an unknown channel records an empty roster.
    pub fn end_of_names(&self, channel: &str) {
        let mut channels = self.lock();
        let entry = channels.entry(key(channel)).or_insert_with(|| {
            watch::channel(Roster {
                name: channel.to_string(),
                ..Roster::default()
            })
            .0
        });

        entry.send_if_modified(|roster| {
            if roster.gathering {
                roster.gathering = false;
                true
            } else {
                false
            }
        });
    }

    /// Members of `channel`, waiting for any listing in progress
    ///
    /// Returns `None` for a channel that has never been listed, or if the
    /// connection is torn down while waiting.
    pub async fn members(&self, channel: &str) -> Option<Vec<String>> {
        let mut rx = self.lock().get(&key(channel))?.subscribe();
        let roster = rx.wait_for(|roster| !roster.gathering).await.ok()?;
        Some(roster.members.clone())
    }

    /// Current snapshot without waiting
    pub fn snapshot(&self, channel: &str) -> Option<Roster> {
        self.lock()
            .get(&key(channel))
            .map(|tx| tx.borrow().clone())
    }

    /// Names of all tracked channels
    pub fn channels(&self) -> Vec<String> {
        self.lock()
            .values()
            .map(|tx| tx.borrow().name.clone())
            .collect()
    }

    /// Drop all rosters, releasing any waiting readers with `None`
    pub fn clear(&self) {
        self.lock().clear();
    }
}

fn key(channel: &str) -> String {
    channel.to_lowercase()
}
