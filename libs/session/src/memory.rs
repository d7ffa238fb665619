use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use hops_core::SweepTask;
use tokio::time::Instant;
use tracing::debug;

use crate::{ConversationState, SessionConfig};

struct Entry {
    state: ConversationState,
    expires_at: Instant,
}

/// In-memory conversation store. Every operation is atomic on its own; callers
/// that read, decide and write again do so across two operations.
pub struct StateStore {
    ttl: Duration,
    entries: Arc<DashMap<String, Entry>>,
    sweeper: Mutex<Option<SweepTask>>,
}

impl StateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(DashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Builds a store from `config` and starts its sweep when one is set.
    pub fn from_config(config: &SessionConfig) -> Self {
        let store = Self::new(config.ttl);
        if let Some(every) = config.sweep_interval {
            store.start_sweep(every);
        }
        store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live state for `user`; an expired entry is removed and
    /// reported as absent.
    pub fn get(&self, user: &str) -> Option<ConversationState> {
        let now = Instant::now();
        let lookup = self
            .entries
            .get(user)
            .map(|entry| (entry.expires_at > now).then(|| entry.state.clone()));
        match lookup {
            Some(Some(state)) => Some(state),
            Some(None) => {
                self.entries
                    .remove_if(user, |_, entry| entry.expires_at <= now);
                None
            }
            None => None,
        }
    }

    /// Replaces the user's state and re-arms its expiry.
    pub fn set(&self, user: &str, state: ConversationState) {
        self.entries.insert(
            user.to_string(),
            Entry {
                state,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn clear(&self, user: &str) {
        self.entries.remove(user);
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn prune_expired(&self) -> usize {
        prune(&self.entries, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts the background sweep, replacing any previous one.
    pub fn start_sweep(&self, every: Duration) {
        let entries = Arc::downgrade(&self.entries);
        let task = SweepTask::spawn("conversation", every, move || {
            if let Some(entries) = entries.upgrade() {
                let removed = prune(&entries, Instant::now());
                if removed > 0 {
                    debug!(removed, "conversation sweep evicted expired state");
                }
            }
        });
        *self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Stops the background sweep and waits for it to exit.
    pub async fn close(&self) {
        let task = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }
}

fn prune(entries: &DashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before.saturating_sub(entries.len())
}
