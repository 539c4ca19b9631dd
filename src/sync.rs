//! Background sync worker for the offline order queue.
//!
//! Spawns a tokio task that replays staged order submissions whenever a
//! network path exists. Three things wake it: the trigger fired right after
//! `add_order`, a host-delivered online signal (the UI shell forwards its
//! connectivity event), and a periodic timer that only processes a non-empty
//! queue. Passes themselves are serialized inside the queue; the worker just
//! decides when to run one. Shutdown is cooperative via a cancellation token.

use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::queue::OfflineQueue;

/// Periodic replay interval (2 minutes).
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(120);

/// Handle to a running sync worker.
pub struct SyncHandle {
    cancel: CancellationToken,
    online: Arc<Notify>,
    running: Arc<AtomicBool>,
    last_sync: Arc<Mutex<Option<String>>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SyncHandle {
    /// Forward the host's connectivity-restored event.
    pub fn trigger_online(&self) {
        self.online.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Timestamp of the last pass that submitted at least one order.
    pub fn last_sync(&self) -> Option<String> {
        self.last_sync.lock().ok()?.clone()
    }

    /// Stop the worker and wait for the task to wind down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("Sync worker stopped");
    }
}

/// Start the background sync worker.
///
/// `submit` posts one order payload to the API and reports failure as the
/// operator-facing message text the queue classifies on.
pub fn start_sync_loop<F, Fut>(
    queue: Arc<OfflineQueue>,
    submit: F,
    interval: Duration,
) -> Arc<SyncHandle>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send,
{
    let cancel = CancellationToken::new();
    let online = Arc::new(Notify::new());
    let running = Arc::new(AtomicBool::new(true));
    let last_sync = Arc::new(Mutex::new(None));

    let handle = Arc::new(SyncHandle {
        cancel: cancel.clone(),
        online: online.clone(),
        running: running.clone(),
        last_sync: last_sync.clone(),
        task: Mutex::new(None),
    });

    let enqueue_trigger = queue.sync_trigger();
    let task = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Sync worker started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let reason = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = enqueue_trigger.notified() => "enqueue",
                _ = online.notified() => "online",
                _ = ticker.tick() => {
                    // The timer only replays work that is actually pending.
                    if queue.is_empty() {
                        continue;
                    }
                    "interval"
                }
            };

            let outcome = queue.process_queue(&submit).await;
            if outcome.submitted > 0 {
                info!(reason, submitted = outcome.submitted, "Sync pass complete");
                if let Ok(mut guard) = last_sync.lock() {
                    *guard = Some(chrono::Utc::now().to_rfc3339());
                }
            }
            if outcome.stopped_early {
                warn!(reason, failed = outcome.failed, "Sync pass stopped on non-transient failure");
            }
        }

        running.store(false, Ordering::SeqCst);
    });

    if let Ok(mut guard) = handle.task.lock() {
        *guard = Some(task);
    }
    handle
}

// ===========================================================================
// Tests
// ===========================================================================
