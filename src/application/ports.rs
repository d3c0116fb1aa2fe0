use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ChangeEvent, DomainError, NewWatch, Watch, WatchId, WatchPatch};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("too many redirects")]
    TooManyRedirects,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport error: {0}")]
    Transport(String),
    #[error("notification auth error: {0}")]
    Auth(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Io(String),
    #[error("watch {0} not found")]
    NotFound(WatchId),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("watch {0} is already running")]
    AlreadyRunning(WatchId),
    #[error("watch {0} is still stopping, retry shortly")]
    Stopping(WatchId),
    #[error("refusing to start watch: {max} watches already running")]
    MaxWatchesExceeded { max: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Fetch(#[from] FetchFailure),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

pub type AppResult<T> = Result<T, AppError>;
pub type RepoResult<T> = Result<T, RepositoryError>;

/// Body and final location of a successful fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedPage {
    pub body: Vec<u8>,
    pub final_url: String,
}

pub type FetchResult = Result<FetchedPage, FetchFailure>;

/// One HTTP GET. Ordinary network and HTTP failures come back as
/// `Err(FetchFailure)`, never as a panic.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchResult;
}

/// Deliver a change event to one or more channels.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError>;
}

/// Durable store of watch definitions and their last-known state.
///
/// `update_fields` writes only the fields named in the patch, so concurrent
/// writers of disjoint fields do not clobber each other. The boolean results
/// report whether the record existed.
#[async_trait]
pub trait WatchRepository: Send + Sync {
    async fn create(&self, watch: NewWatch) -> RepoResult<WatchId>;
    async fn get(&self, id: WatchId) -> RepoResult<Option<Watch>>;
    async fn list(&self) -> RepoResult<Vec<Watch>>;
    async fn update_fields(&self, id: WatchId, patch: &WatchPatch) -> RepoResult<bool>;
    async fn delete(&self, id: WatchId) -> RepoResult<bool>;
    async fn set_active(&self, id: WatchId, active: bool) -> RepoResult<bool>;
}
