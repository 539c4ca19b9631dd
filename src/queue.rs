//! Offline order queue.
//!
//! Durable client-side staging of order-submission payloads so checkout can
//! report success immediately even without connectivity. Entries live as one
//! JSON array blob in persisted storage and are de-duplicated by the
//! `clientOrderId` carried inside the payload: re-adding an edited draft
//! overwrites the pending entry instead of creating a duplicate submission.
//!
//! Processing walks the queue in insertion order, one entry at a time.
//! Overlapping triggers are serialized through an in-process lock; a trigger
//! that arrives mid-pass requests a rerun instead of racing on the same
//! persisted list.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::storage::{self, StorageAdapter, KEY_OFFLINE_ORDERS};
use crate::value_str;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueEntry {
    pub id: String,
    /// The order payload to submit; opaque to the queue.
    pub data: Value,
    /// Last-touched time (created or overwritten), RFC 3339.
    pub timestamp: String,
    /// Failed submission attempts so far.
    pub attempts: i64,
}

/// Result of one `process_queue` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub submitted: usize,
    pub failed: usize,
    /// A non-transient failure ended the pass before the queue was exhausted.
    pub stopped_early: bool,
    /// Another pass was already running; this trigger was queued as a rerun.
    pub deferred: bool,
}

pub struct OfflineQueue {
    storage: Arc<dyn StorageAdapter>,
    /// Notified after `add_order` so the sync worker wakes immediately.
    sync_trigger: Arc<Notify>,
    /// Serializes processing passes.
    process_lock: tokio::sync::Mutex<()>,
    /// Set when a trigger arrives while a pass is running.
    rerun_requested: AtomicBool,
}

impl OfflineQueue {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            sync_trigger: Arc::new(Notify::new()),
            process_lock: tokio::sync::Mutex::new(()),
            rerun_requested: AtomicBool::new(false),
        }
    }

    /// The notify handle the sync worker waits on.
    pub fn sync_trigger(&self) -> Arc<Notify> {
        self.sync_trigger.clone()
    }

    /// Read and parse the persisted queue. Absent or corrupt blobs (or
    /// individual unreadable entries) read as empty; parse failures are
    /// swallowed, not surfaced.
    pub fn queue(&self) -> Vec<OfflineQueueEntry> {
        storage::read_json_array(self.storage.as_ref(), KEY_OFFLINE_ORDERS)
            .into_iter()
            .filter_map(|raw| serde_json::from_value::<OfflineQueueEntry>(raw).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Stage an order payload for submission and fire the sync trigger.
    ///
    /// At most one entry exists per distinct `clientOrderId` inside the
    /// payload: a second call overwrites the pending entry's payload in place
    /// and resets its attempt counter, so edits to a not-yet-synced draft do
    /// not create duplicate submissions. Returns the entry id.
    pub fn add_order(&self, payload: Value) -> String {
        let mut entries = self.queue();
        let now = chrono::Utc::now().to_rfc3339();
        let client_order_id = value_str(&payload, &["clientOrderId", "client_order_id"]);

        let existing = client_order_id.as_deref().and_then(|cid| {
            entries.iter().position(|entry| {
                value_str(&entry.data, &["clientOrderId", "client_order_id"]).as_deref() == Some(cid)
            })
        });

        let id = match existing {
            Some(index) => {
                let entry = &mut entries[index];
                entry.data = payload;
                entry.attempts = 0;
                entry.timestamp = now;
                debug!(entry_id = %entry.id, "queue: overwrote pending entry for edited draft");
                entry.id.clone()
            }
            None => {
                let id = value_str(&payload, &["id"]).unwrap_or_else(|| Uuid::new_v4().to_string());
                entries.push(OfflineQueueEntry {
                    id: id.clone(),
                    data: payload,
                    timestamp: now,
                    attempts: 0,
                });
                id
            }
        };

        self.persist(&entries);
        self.sync_trigger.notify_one();
        id
    }

    /// Delete the entry with the given id.
    pub fn remove(&self, id: &str) {
        let mut entries = self.queue();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() != before {
            self.persist(&entries);
        }
    }

    /// Wipe the persisted queue entirely.
    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(KEY_OFFLINE_ORDERS) {
            warn!(error = %e, "queue: failed to clear");
        }
    }

    /// Submit pending entries in insertion order, sequentially.
    ///
    /// For each entry: the attempt counter is incremented, `submit` is
    /// invoked with the payload, and on success the entry is removed. On
    /// failure the incremented counter is persisted and the live queue is
    /// re-fetched before continuing, so external mutations made during the
    /// network call are tolerated. A failure that does not look like a
    /// transient network/timeout error stops the pass; transient failures
    /// move on to the next entry. Entries are never discarded by age or
    /// attempt count.
    pub async fn process_queue<F, Fut>(&self, submit: F) -> ProcessOutcome
    where
        F: Fn(Value) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        let Ok(_guard) = self.process_lock.try_lock() else {
            self.rerun_requested.store(true, Ordering::SeqCst);
            debug!("queue: pass already running, rerun queued");
            return ProcessOutcome {
                deferred: true,
                ..ProcessOutcome::default()
            };
        };

        let mut outcome = self.run_pass(&submit).await;
        // Drain triggers that landed while the pass was running.
        while self.rerun_requested.swap(false, Ordering::SeqCst) {
            let rerun = self.run_pass(&submit).await;
            outcome.submitted += rerun.submitted;
            outcome.failed += rerun.failed;
            outcome.stopped_early = rerun.stopped_early;
        }
        outcome
    }

    async fn run_pass<F, Fut>(&self, submit: &F) -> ProcessOutcome
    where
        F: Fn(Value) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        let snapshot = self.queue();
        if snapshot.is_empty() {
            return ProcessOutcome::default();
        }
        info!(pending = snapshot.len(), "queue: processing pass started");

        let mut outcome = ProcessOutcome::default();
        for staged in snapshot {
            // The entry may have been removed or replaced since the snapshot.
            let Some(mut entry) = self.queue().into_iter().find(|e| e.id == staged.id) else {
                continue;
            };

            entry.attempts += 1;
            let payload = entry.data.clone();
            match submit(payload).await {
                Ok(_) => {
                    self.remove(&entry.id);
                    outcome.submitted += 1;
                    info!(entry_id = %entry.id, "queue: order submitted");
                }
                Err(error) => {
                    outcome.failed += 1;
                    self.record_attempt(&entry);
                    if !is_transient_submit_error(&error) {
                        warn!(entry_id = %entry.id, error = %error,
                              "queue: non-transient failure, stopping pass");
                        outcome.stopped_early = true;
                        break;
                    }
                    warn!(entry_id = %entry.id, attempts = entry.attempts, error = %error,
                          "queue: transient failure, will retry");
                }
            }
        }
        outcome
    }

    /// Persist a failed entry's incremented attempt counter against the live
    /// queue (not the stale snapshot), tolerating concurrent removals.
    fn record_attempt(&self, failed: &OfflineQueueEntry) {
        let mut entries = self.queue();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == failed.id) {
            entry.attempts = failed.attempts;
            self.persist(&entries);
        }
    }

    fn persist(&self, entries: &[OfflineQueueEntry]) {
        match serde_json::to_value(entries) {
            Ok(blob) => {
                if let Err(e) =
                    storage::write_json(self.storage.as_ref(), KEY_OFFLINE_ORDERS, &blob)
                {
                    warn!(error = %e, "queue: failed to persist");
                }
            }
            Err(e) => warn!(error = %e, "queue: failed to serialize"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Whether a submission failure message looks like a transient
/// network/timeout failure worth moving past. Anything else is treated as a
/// non-retryable class that should stop the current pass rather than mask
/// the same failure on every remaining entry.
pub fn is_transient_submit_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("network error")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("cannot reach")
        || lower.contains("server error")
        || lower.contains("service unavailable")
        || lower.contains("gateway")
        || lower.contains("http 50")
}

// ===========================================================================
// Tests
// ===========================================================================
