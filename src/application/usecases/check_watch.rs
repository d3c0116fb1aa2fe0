use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::application::{FetchFailure, Fetcher, Notifier, NotifyError, RepositoryError, WatchRepository};
use crate::domain::{ChangeEvent, Digest, Observation, Transition, Watch, WatchState, fingerprint};

/// One tick for one watch: fetch, fingerprint, compare, notify, persist.
#[derive(Clone)]
pub struct CheckWatchUseCase {
    pub fetcher: Arc<dyn Fetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub repo: Arc<dyn WatchRepository>,
    pub fetch_timeout: Duration,
    /// Upper bound on one notification; the state write waits for nothing
    /// longer than this.
    pub notify_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The record was deleted underneath the loop.
    RecordMissing,
    Failed(RepositoryError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickReport {
    pub transition: Transition,
    /// `None` unless the tick produced a change event.
    pub notified: Option<Result<(), NotifyError>>,
    pub write: WriteOutcome,
}

/// Result of a read-only check against the stored digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    pub digest: Digest,
    pub final_url: String,
    /// `None` when the watch has no baseline yet.
    pub changed: Option<bool>,
}

impl CheckWatchUseCase {
    /// Runs one tick and folds the result into `state`.
    ///
    /// `state` is the loop's own copy of the watch state and is updated even
    /// when the repository write fails, so the next tick persists it again.
    /// A failed notification never rolls back the digest update.
    pub async fn execute(&self, watch: &Watch, state: &mut WatchState) -> TickReport {
        let fetched = self.fetcher.fetch(&watch.url, self.fetch_timeout).await;
        let now = Utc::now();

        let observation = match &fetched {
            Ok(page) => Observation::Content(fingerprint(&page.body)),
            Err(e) => {
                warn!(
                    watch_id = %watch.id,
                    url = %watch.url,
                    error = %e,
                    consecutive_failures = state.consecutive_failures + 1,
                    "fetch failed"
                );
                Observation::Failure
            }
        };

        let transition = state.observe(observation, now);
        let notified = match transition {
            Transition::Baseline(digest) => {
                info!(watch_id = %watch.id, digest = %digest.short(), "baseline recorded");
                None
            }
            Transition::Unchanged => {
                debug!(watch_id = %watch.id, "no change");
                None
            }
            Transition::Changed { previous, current } => {
                info!(
                    watch_id = %watch.id,
                    url = %watch.url,
                    from = %previous.short(),
                    to = %current.short(),
                    "change detected"
                );
                let event = ChangeEvent::change(watch.id, &watch.url, now, previous, current);
                let delivery = self.notifier.notify(&event);
                let result = tokio::time::timeout(self.notify_timeout, delivery)
                    .await
                    .unwrap_or_else(|_| {
                        Err(NotifyError::Transport(format!(
                            "no answer within {}s",
                            self.notify_timeout.as_secs()
                        )))
                    });
                if let Err(e) = &result {
                    warn!(watch_id = %watch.id, error = %e, "notification failed");
                }
                Some(result)
            }
            Transition::Failed { .. } => None,
        };

        let write = match self.repo.update_fields(watch.id, &state.to_patch()).await {
            Ok(true) => WriteOutcome::Written,
            Ok(false) => WriteOutcome::RecordMissing,
            Err(e) => {
                warn!(watch_id = %watch.id, error = %e, "failed to persist watch state");
                WriteOutcome::Failed(e)
            }
        };

        TickReport {
            transition,
            notified,
            write,
        }
    }

    /// Fetch once and compare with the stored digest without writing anything.
    pub async fn probe(&self, watch: &Watch) -> Result<Probe, FetchFailure> {
        let page = self.fetcher.fetch(&watch.url, self.fetch_timeout).await?;
        let digest = fingerprint(&page.body);
        Ok(Probe {
            digest,
            final_url: page.final_url,
            changed: watch.last_digest.map(|stored| stored != digest),
        })
    }
}
