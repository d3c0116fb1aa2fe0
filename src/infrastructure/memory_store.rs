use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::application::{RepoResult, RepositoryError, WatchRepository};
use crate::domain::{NewWatch, Watch, WatchId, WatchPatch};

/// Process-local repository. Every operation runs under one lock, so each
/// read-modify-write of a record is serialized.
#[derive(Clone, Default)]
pub struct InMemoryWatchRepository {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Ids are never reused, even after delete.
    next_id: i64,
    watches: BTreeMap<WatchId, Watch>,
}

impl InMemoryWatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| RepositoryError::Io("lock poisoned".into()))
    }
}

#[async_trait]
impl WatchRepository for InMemoryWatchRepository {
    async fn create(&self, new: NewWatch) -> RepoResult<WatchId> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = WatchId::new(inner.next_id);
        inner.watches.insert(
            id,
            Watch {
                id,
                url: new.url,
                interval_secs: new.interval_secs,
                active: false,
                last_digest: None,
                last_checked_at: None,
                last_changed_at: None,
                consecutive_failures: 0,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn get(&self, id: WatchId) -> RepoResult<Option<Watch>> {
        Ok(self.lock()?.watches.get(&id).cloned())
    }

    async fn list(&self) -> RepoResult<Vec<Watch>> {
        Ok(self.lock()?.watches.values().cloned().collect())
    }

    async fn update_fields(&self, id: WatchId, patch: &WatchPatch) -> RepoResult<bool> {
        let mut inner = self.lock()?;
        match inner.watches.get_mut(&id) {
            Some(watch) => {
                watch.apply(patch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: WatchId) -> RepoResult<bool> {
        Ok(self.lock()?.watches.remove(&id).is_some())
    }

    async fn set_active(&self, id: WatchId, active: bool) -> RepoResult<bool> {
        let mut inner = self.lock()?;
        match inner.watches.get_mut(&id) {
            Some(watch) => {
                watch.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
