//! Automatic-mode trigger worker.
//!
//! Turns local edits into debounced pushes and app lifecycle events into a
//! pull followed by a push. Every trigger is gated on the current
//! [`SyncMode`]; failures are logged and swallowed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::models::SyncMode;
use crate::store::{ChangeFeed, ChangeOrigin};

use super::orchestrator::SyncOrchestrator;
use super::result::{PullResult, PushResult, SkipReason};

/// App lifecycle signals the worker reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// App started. Best effort, never blocks startup.
    Launched,
    /// App became active again.
    Foregrounded,
    /// Flush a pending push and stop.
    Shutdown,
}

/// Handle to the running worker.
pub struct AutoSync {
    sender: mpsc::Sender<LifecycleEvent>,
    task: JoinHandle<()>,
}

impl AutoSync {
    /// Start the worker.
    ///
    /// The change subscription is taken before this returns, so edits made
    /// right after `start` are not missed.
    #[must_use]
    pub fn start(orchestrator: Arc<SyncOrchestrator>, debounce: Duration) -> Self {
        let (sender, events) = mpsc::channel(16);
        let changes = orchestrator.store().watch_changes(None);
        let mode = orchestrator.subscribe_mode();
        let task = tokio::spawn(worker(orchestrator, debounce, events, changes, mode));
        Self { sender, task }
    }

    /// Deliver a lifecycle event. Returns `false` once the worker has stopped.
    pub async fn notify(&self, event: LifecycleEvent) -> bool {
        self.sender.send(event).await.is_ok()
    }

    /// Flush any pending push and wait for the worker to exit.
    pub async fn shutdown(self) {
        // Already stopped is fine.
        let _ = self.sender.send(LifecycleEvent::Shutdown).await;
        if let Err(error) = self.task.await {
            tracing::error!("Auto-sync worker panicked: {error}");
        }
    }
}

async fn worker(
    orchestrator: Arc<SyncOrchestrator>,
    debounce: Duration,
    mut events: mpsc::Receiver<LifecycleEvent>,
    mut changes: ChangeFeed,
    mut mode: watch::Receiver<SyncMode>,
) {
    // Debounce deadline, far in the future while nothing is pending
    let far_future = Instant::now() + Duration::from_secs(365 * 24 * 3600);
    let mut deadline = far_future;
    let mut dirty = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(LifecycleEvent::Launched | LifecycleEvent::Foregrounded) => {
                        if orchestrator.mode().is_automatic() {
                            sync_both_ways(&orchestrator).await;
                        }
                    }
                    Some(LifecycleEvent::Shutdown) | None => {
                        if dirty && orchestrator.mode().is_automatic() {
                            log_push(&orchestrator.push().await);
                        }
                        break;
                    }
                }
            }
            change = changes.recv() => {
                match change {
                    Some(change) if change.origin == ChangeOrigin::Local => {
                        if orchestrator.mode().is_automatic() {
                            dirty = true;
                            deadline = Instant::now() + debounce;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            () = sleep_until(deadline), if dirty => {
                dirty = false;
                deadline = far_future;
                let result = orchestrator.push().await;
                if result.skipped == Some(SkipReason::AlreadyInFlight) {
                    // The running push may have read the store before these edits.
                    dirty = true;
                    deadline = Instant::now() + debounce;
                }
                log_push(&result);
            }
            Ok(()) = mode.changed() => {
                if !mode.borrow_and_update().is_automatic() {
                    dirty = false;
                    deadline = far_future;
                }
            }
        }
    }

    tracing::debug!("Auto-sync worker finished");
}

/// Pull, then publish local edits. The push is skipped when the pull failed
/// so that unmerged remote records are never overwritten.
async fn sync_both_ways(orchestrator: &SyncOrchestrator) {
    let pull = orchestrator.pull().await;
    log_pull(&pull);
    if pull.is_ok() {
        log_push(&orchestrator.push().await);
    }
}

fn log_pull(result: &PullResult) {
    match (result.skipped, result.error()) {
        (Some(reason), _) => tracing::debug!("Background pull skipped: {reason:?}"),
        (None, Some(error)) => tracing::warn!("Background pull failed: {error}"),
        (None, None) => tracing::debug!(
            "Background pull done: {} added, {} updated",
            result.total.added,
            result.total.updated
        ),
    }
}

fn log_push(result: &PushResult) {
    match (result.skipped, result.error()) {
        (Some(reason), _) => tracing::debug!("Background push skipped: {reason:?}"),
        (None, Some(error)) => tracing::warn!("Background push failed: {error}"),
        (None, None) => tracing::debug!("Background push done: {} records", result.record_count),
    }
}
