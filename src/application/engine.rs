//! The per-watch check loop.
//!
//! A loop runs `Running` until it is cancelled, its record is deleted, or
//! its record is marked inactive (possibly by another process). The
//! cancellation token is checked before each fetch and both before and
//! during the inter-tick wait, so after a stop request at most one
//! in-flight fetch completes and no further fetch starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::WatchRepository;
use crate::application::usecases::{CheckWatchUseCase, WriteOutcome};
use crate::domain::{MIN_INTERVAL_SECS, Watch, WatchId, WatchState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    Deactivated,
    Deleted,
}

pub struct ChangeEngine {
    check: CheckWatchUseCase,
    /// Wait used while the record has never been readable.
    load_retry: Duration,
}

impl ChangeEngine {
    pub fn new(check: CheckWatchUseCase) -> Self {
        Self {
            check,
            load_retry: Duration::from_secs(MIN_INTERVAL_SECS),
        }
    }

    pub fn check(&self) -> &CheckWatchUseCase {
        &self.check
    }

    fn repo(&self) -> &Arc<dyn WatchRepository> {
        &self.check.repo
    }

    /// Runs the loop for `id` until it exits. `store_failures` counts
    /// consecutive repository failures (loads and writes) and is reset by the
    /// next successful write.
    pub async fn run(
        &self,
        id: WatchId,
        cancel: CancellationToken,
        store_failures: &AtomicU32,
    ) -> LoopExit {
        let mut current: Option<Watch> = None;
        let mut state: Option<WatchState> = None;

        loop {
            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            // Re-read the record each tick to pick up interval edits and
            // external stop/delete. Our own state fields stay authoritative.
            match self.repo().get(id).await {
                Ok(Some(watch)) if !watch.active => return LoopExit::Deactivated,
                Ok(Some(watch)) => current = Some(watch),
                Ok(None) => return LoopExit::Deleted,
                Err(e) => {
                    let failures = store_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        watch_id = %id,
                        error = %e,
                        store_failures = failures,
                        "failed to load watch"
                    );
                }
            }

            let Some(watch) = current.as_ref() else {
                if sleep_or_cancel(&cancel, self.load_retry).await {
                    return LoopExit::Cancelled;
                }
                continue;
            };
            let state = state.get_or_insert_with(|| watch.state());

            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }
            let report = self.check.execute(watch, state).await;
            match report.write {
                WriteOutcome::Written => store_failures.store(0, Ordering::Relaxed),
                WriteOutcome::RecordMissing => return LoopExit::Deleted,
                WriteOutcome::Failed(_) => {
                    let failures = store_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        watch_id = %id,
                        store_failures = failures,
                        "state write will be retried next tick"
                    );
                }
            }
            debug!(watch_id = %id, transition = ?report.transition, "tick complete");

            let wait = watch.interval().max(Duration::from_secs(MIN_INTERVAL_SECS));
            if sleep_or_cancel(&cancel, wait).await {
                return LoopExit::Cancelled;
            }
        }
    }
}

/// Returns true when cancelled before `dur` elapsed.
async fn sleep_or_cancel(cancel: &CancellationToken, dur: Duration) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(dur) => cancel.is_cancelled(),
    }
}
