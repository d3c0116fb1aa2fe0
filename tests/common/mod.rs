#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pagewatch::application::usecases::CheckWatchUseCase;
use pagewatch::application::{
    ChangeEngine, FetchResult, FetchedPage, Fetcher, Notifier, NotifyError, RepoResult,
    RepositoryError, Supervisor, SupervisorConfig, WatchRepository,
};
use pagewatch::domain::{ChangeEvent, IntervalPolicy, NewWatch, Watch, WatchId, WatchPatch};
use pagewatch::infrastructure::memory_store::InMemoryWatchRepository;

pub const TIMEOUT: Duration = Duration::from_secs(10);
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the event, then reports a transport failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            return Err(NotifyError::Transport("smtp unreachable".into()));
        }
        Ok(())
    }
}

/// Accepts the event and never answers.
#[derive(Clone, Default)]
pub struct StalledNotifier {
    calls: Arc<AtomicU32>,
}

impl StalledNotifier {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for StalledNotifier {
    async fn notify(&self, _event: &ChangeEvent) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Panics on the first `panics` calls, then serves `body`.
pub struct PanickingFetcher {
    panics: u32,
    calls: AtomicU32,
    body: &'static str,
}

impl PanickingFetcher {
    pub fn new(panics: u32, body: &'static str) -> Self {
        Self {
            panics,
            calls: AtomicU32::new(0),
            body,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for PanickingFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> FetchResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.panics {
            panic!("fetcher blew up on call {n}");
        }
        Ok(FetchedPage {
            body: self.body.as_bytes().to_vec(),
            final_url: url.to_string(),
        })
    }
}

/// Wraps the in-memory repository and fails the next `n` state writes.
#[derive(Clone, Default)]
pub struct FlakyRepository {
    pub inner: InMemoryWatchRepository,
    failing_writes: Arc<AtomicU32>,
}

impl FlakyRepository {
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl WatchRepository for FlakyRepository {
    async fn create(&self, watch: NewWatch) -> RepoResult<WatchId> {
        self.inner.create(watch).await
    }

    async fn get(&self, id: WatchId) -> RepoResult<Option<Watch>> {
        self.inner.get(id).await
    }

    async fn list(&self) -> RepoResult<Vec<Watch>> {
        self.inner.list().await
    }

    async fn update_fields(&self, id: WatchId, patch: &WatchPatch) -> RepoResult<bool> {
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Io("database is locked".into()));
        }
        self.inner.update_fields(id, patch).await
    }

    async fn delete(&self, id: WatchId) -> RepoResult<bool> {
        self.inner.delete(id).await
    }

    async fn set_active(&self, id: WatchId, active: bool) -> RepoResult<bool> {
        self.inner.set_active(id, active).await
    }
}

pub fn new_watch(url: &str, interval_secs: u64) -> NewWatch {
    NewWatch::new(url, interval_secs, &IntervalPolicy::default()).unwrap()
}

pub fn use_case(
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    repo: Arc<dyn WatchRepository>,
) -> CheckWatchUseCase {
    CheckWatchUseCase {
        fetcher,
        notifier,
        repo,
        fetch_timeout: TIMEOUT,
        notify_timeout: NOTIFY_TIMEOUT,
    }
}

pub fn supervisor(
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    repo: Arc<dyn WatchRepository>,
    config: SupervisorConfig,
) -> Arc<Supervisor> {
    let engine = Arc::new(ChangeEngine::new(use_case(fetcher, notifier, repo.clone())));
    Arc::new(Supervisor::new(repo, engine, config))
}
