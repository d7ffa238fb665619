//! In-process duplicate suppression for callback deliveries.
//!
//! The upstream platform retries a callback until it is acknowledged, so the
//! same message can arrive several times. [`Deduper`] remembers derived
//! message identities for a bounded window and [`IdempotencyGuard`] wraps it
//! with the logging and counters used at the transport boundary.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hops_core::{DecodedMessage, SweepTask};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Identity of one logical message, derived from its correlation ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdKey {
    Task { sender: String, task_id: String },
    Message { sender: String, msg_id: String },
    Content { digest: String },
}

impl IdKey {
    /// Task id wins over message id; a digest of the decrypted payload is the
    /// fallback when the message carries neither.
    pub fn derive(msg: &DecodedMessage, plaintext: &[u8]) -> Self {
        if let Some(task_id) = &msg.task_id {
            return IdKey::Task {
                sender: msg.sender.clone(),
                task_id: task_id.clone(),
            };
        }
        if let Some(msg_id) = &msg.msg_id {
            return IdKey::Message {
                sender: msg.sender.clone(),
                msg_id: msg_id.clone(),
            };
        }
        IdKey::Content {
            digest: hex::encode(Sha256::digest(plaintext)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IdKey::Task { .. } => "task",
            IdKey::Message { .. } => "msg",
            IdKey::Content { .. } => "sha256",
        }
    }
}

impl Display for IdKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IdKey::Task { sender, task_id } => write!(f, "task:{sender}:{task_id}"),
            IdKey::Message { sender, msg_id } => write!(f, "msg:{sender}:{msg_id}"),
            IdKey::Content { digest } => write!(f, "sha256:{digest}"),
        }
    }
}

/// Mutex-guarded map from identity to expiry.
pub struct Deduper {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, Instant>>>,
    sweeper: Mutex<Option<SweepTask>>,
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl Deduper {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `true` when `key` was already seen inside the window, otherwise
    /// records it and returns `false`. Check and record happen under one lock.
    /// An empty key is never recorded.
    pub fn seen_or_mark(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => true,
            _ => {
                entries.insert(key.to_string(), now + self.ttl);
                false
            }
        }
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn prune_expired(&self) -> usize {
        prune(&self.entries, Instant::now())
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts the background sweep, replacing any previous one.
    pub fn start_sweep(&self, every: Duration) {
        let entries = Arc::downgrade(&self.entries);
        let task = SweepTask::spawn("dedup", every, move || {
            if let Some(entries) = entries.upgrade() {
                let removed = prune(&entries, Instant::now());
                if removed > 0 {
                    debug!(removed, "dedup sweep evicted expired entries");
                }
            }
        });
        *lock(&self.sweeper) = Some(task);
    }

    /// Stops the background sweep and waits for it to exit.
    pub async fn close(&self) {
        let task = lock(&self.sweeper).take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }
}

fn prune(entries: &Mutex<HashMap<String, Instant>>, now: Instant) -> usize {
    let mut entries = lock(entries);
    let before = entries.len();
    entries.retain(|_, expires_at| *expires_at > now);
    before - entries.len()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration derived at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub ttl: Duration,
    /// `None` disables the background sweep; expiry is then lazy only.
    pub sweep_interval: Option<Duration>,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

impl IdempotencyConfig {
    pub fn from_secs(ttl_secs: u64, sweep_interval_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs.max(1)),
            sweep_interval: (sweep_interval_secs > 0)
                .then(|| Duration::from_secs(sweep_interval_secs)),
        }
    }
}

/// Guard used by the callback handler to drop redelivered messages.
#[derive(Clone)]
pub struct IdempotencyGuard {
    deduper: Arc<Deduper>,
}

impl IdempotencyGuard {
    pub fn new(deduper: Arc<Deduper>) -> Self {
        Self { deduper }
    }

    /// Builds a deduper from `config` and starts its sweep when one is set.
    pub fn from_config(config: &IdempotencyConfig) -> Self {
        let deduper = Arc::new(Deduper::new(config.ttl));
        if let Some(every) = config.sweep_interval {
            deduper.start_sweep(every);
        }
        Self::new(deduper)
    }

    pub fn deduper(&self) -> &Arc<Deduper> {
        &self.deduper
    }

    /// Returns `true` when the caller should proceed (first sighting).
    pub fn should_process(&self, key: &IdKey) -> bool {
        let duplicate = self.deduper.seen_or_mark(&key.to_string());
        if duplicate {
            warn!(key_kind = key.kind(), "duplicate callback dropped");
            metrics::counter!("idempotency_hit", "kind" => key.kind()).increment(1);
        }
        !duplicate
    }

    pub async fn close(&self) {
        self.deduper.close().await;
    }
}
