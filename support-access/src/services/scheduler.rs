//! One-shot expiry timers keyed by identifier hash.
//!
//! A fired timer does not revoke anything itself. It pushes the hash onto a
//! channel drained by the orchestrator, so revocation always goes through the
//! same path as a manual revoke.

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct ScheduledJob {
    at: DateTime<Utc>,
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct ExpiryScheduler {
    jobs: Arc<DashMap<String, ScheduledJob>>,
    generation: Arc<AtomicU64>,
    fired: mpsc::UnboundedSender<String>,
}

impl ExpiryScheduler {
    /// Returns the scheduler and the receiving end of fired identifier hashes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (fired, rx) = mpsc::unbounded_channel();
        (
            Self {
                jobs: Arc::new(DashMap::new()),
                generation: Arc::new(AtomicU64::new(0)),
                fired,
            },
            rx,
        )
    }

    /// Arm the timer for `identifier_hash`, replacing any existing one.
    /// Returns `false` when no async runtime is available to run it.
    pub fn schedule(&self, at: DateTime<Utc>, identifier_hash: &str) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available, expiry not scheduled");
            return false;
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let key = identifier_hash.to_string();

        // The entry guard is held until the new job is stored, so a zero-delay
        // job cannot fire before it is registered.
        let entry = self.jobs.entry(key.clone());

        let jobs = Arc::clone(&self.jobs);
        let fired = self.fired.clone();
        let task_key = key.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if jobs
                .remove_if(&task_key, |_, job| job.generation == generation)
                .is_some()
            {
                tracing::debug!(identifier = %short(&task_key), "Expiry timer fired");
                let _ = fired.send(task_key);
            }
        });

        let job = ScheduledJob {
            at,
            generation,
            handle,
        };

        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.get().handle.abort();
                occupied.insert(job);
                tracing::info!(identifier = %short(&key), expires_at = %at, "Expiry rescheduled");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(job);
                tracing::info!(identifier = %short(&key), expires_at = %at, "Expiry scheduled");
            }
        }

        true
    }

    /// Idempotent. Returns whether a pending job was removed.
    pub fn cancel(&self, identifier_hash: &str) -> bool {
        match self.jobs.remove(identifier_hash) {
            Some((_, job)) => {
                job.handle.abort();
                tracing::debug!(identifier = %short(identifier_hash), "Expiry cancelled");
                true
            }
            None => false,
        }
    }

    pub fn scheduled_at(&self, identifier_hash: &str) -> Option<DateTime<Utc>> {
        self.jobs.get(identifier_hash).map(|job| job.at)
    }

    pub fn is_scheduled(&self, identifier_hash: &str) -> bool {
        self.jobs.contains_key(identifier_hash)
    }

    pub fn pending(&self) -> usize {
        self.jobs.len()
    }
}

/// Log-safe prefix of an identifier hash.
pub(crate) fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
