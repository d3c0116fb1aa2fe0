//! Process-level owner of all check loops.
//!
//! The supervisor maps each watch id to at most one running loop. The
//! registry is the only shared mutable state in the scheduler; every insert
//! and removal happens under its write lock, which is what makes two racing
//! `start(id)` calls produce exactly one loop.
//!
//! # Loop lifecycle
//!
//! ```text
//!  start ──► Running ──stop/delete──► Stopping ──loop exits──► Idle
//!               │                                               ▲
//!               └──── record deleted / marked inactive ─────────┘
//! ```
//!
//! Each loop runs inside a supervising task that restarts it after a panic
//! (bounded by [`RestartPolicy`]) and deregisters it once it is done.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::application::{
    AppError, AppResult, ChangeEngine, LoopExit, RepositoryError, SchedulerError, WatchRepository,
};
use crate::domain::{IntervalPolicy, NewWatch, RestartPolicy, Watch, WatchId, WatchPatch};

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub max_watches: usize,
    /// How long `delete` and `shutdown` wait for a loop to acknowledge.
    pub stop_grace: Duration,
    pub restart: RestartPolicy,
    pub intervals: IntervalPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_watches: 200,
            stop_grace: Duration::from_secs(20),
            restart: RestartPolicy::default(),
            intervals: IntervalPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopPhase {
    Idle,
    Running,
    Stopping,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WatchStatus {
    #[serde(flatten)]
    pub watch: Watch,
    pub phase: LoopPhase,
    /// Consecutive repository failures seen by the running loop; 0 when idle.
    pub store_failures: u32,
}

struct LoopHandle {
    /// Distinguishes this loop from any later one for the same id.
    generation: u64,
    cancel: CancellationToken,
    /// Taken by whoever waits for termination.
    task: Option<JoinHandle<()>>,
    store_failures: Arc<AtomicU32>,
}

type Registry = Arc<RwLock<HashMap<WatchId, LoopHandle>>>;

pub struct Supervisor {
    repo: Arc<dyn WatchRepository>,
    engine: Arc<ChangeEngine>,
    config: SupervisorConfig,
    registry: Registry,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        repo: Arc<dyn WatchRepository>,
        engine: Arc<ChangeEngine>,
        config: SupervisorConfig,
    ) -> Self {
        Self::new_with_shutdown(repo, engine, config, CancellationToken::new())
    }

    /// Loops are cancelled through children of `shutdown`.
    pub fn new_with_shutdown(
        repo: Arc<dyn WatchRepository>,
        engine: Arc<ChangeEngine>,
        config: SupervisorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            max_watches = config.max_watches,
            stop_grace_secs = config.stop_grace.as_secs(),
            "creating supervisor"
        );
        Self {
            repo,
            engine,
            config,
            registry: Arc::new(RwLock::new(HashMap::new())),
            generation: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<ChangeEngine> {
        &self.engine
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Creates an inactive watch. Duplicate urls get distinct ids.
    #[instrument(skip(self))]
    pub async fn add(&self, url: &str, interval_secs: u64) -> AppResult<Watch> {
        let new = NewWatch::new(url, interval_secs, &self.config.intervals)?;
        let id = self.repo.create(new).await?;
        let watch = self
            .repo
            .get(id)
            .await?
            .ok_or(RepositoryError::NotFound(id))?;
        info!(watch_id = %id, url = %watch.url, interval_secs, "watch added");
        Ok(watch)
    }

    /// Marks the watch active and launches its loop.
    ///
    /// Refused with `AlreadyRunning` if a loop is registered, or `Stopping` if
    /// the registered loop has been signalled but not exited yet.
    #[instrument(skip(self))]
    pub async fn start(&self, id: WatchId) -> AppResult<()> {
        let mut registry = self.registry.write().await;

        if let Some(handle) = registry.get(&id) {
            let err = if handle.cancel.is_cancelled() {
                SchedulerError::Stopping(id)
            } else {
                SchedulerError::AlreadyRunning(id)
            };
            return Err(err.into());
        }
        if registry.len() >= self.config.max_watches {
            return Err(SchedulerError::MaxWatchesExceeded {
                max: self.config.max_watches,
            }
            .into());
        }
        if !self.repo.set_active(id, true).await? {
            return Err(RepositoryError::NotFound(id).into());
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let store_failures = Arc::new(AtomicU32::new(0));
        let task = tokio::spawn(supervise(
            id,
            generation,
            self.engine.clone(),
            cancel.clone(),
            store_failures.clone(),
            self.config.restart.clone(),
            self.registry.clone(),
        ));
        registry.insert(
            id,
            LoopHandle {
                generation,
                cancel,
                task: Some(task),
                store_failures,
            },
        );

        info!(watch_id = %id, running = registry.len(), "check loop started");
        Ok(())
    }

    /// Marks the watch active without launching a loop in this process. The
    /// process that owns the loops picks it up on its next reconcile.
    #[instrument(skip(self))]
    pub async fn activate(&self, id: WatchId) -> AppResult<()> {
        if !self.repo.set_active(id, true).await? {
            return Err(RepositoryError::NotFound(id).into());
        }
        info!(watch_id = %id, "watch marked active");
        Ok(())
    }

    /// Marks the watch inactive and signals its loop. Does not wait for the
    /// loop to exit.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: WatchId) -> AppResult<()> {
        if let Some(handle) = self.registry.read().await.get(&id) {
            handle.cancel.cancel();
            debug!(watch_id = %id, "stop signalled");
        }
        if !self.repo.set_active(id, false).await? {
            return Err(RepositoryError::NotFound(id).into());
        }
        info!(watch_id = %id, "watch stopped");
        Ok(())
    }

    /// Stops the loop, waits for it up to the stop grace, then removes the
    /// record.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: WatchId) -> AppResult<()> {
        let pending = {
            let mut registry = self.registry.write().await;
            registry.get_mut(&id).map(|handle| {
                handle.cancel.cancel();
                (handle.generation, handle.task.take())
            })
        };

        if let Some((generation, task)) = pending {
            if let Some(task) = task {
                if tokio::time::timeout(self.config.stop_grace, task).await.is_err() {
                    warn!(
                        watch_id = %id,
                        grace_secs = self.config.stop_grace.as_secs(),
                        "check loop did not stop within grace period, deleting anyway"
                    );
                }
            }
            let mut registry = self.registry.write().await;
            if registry.get(&id).is_some_and(|h| h.generation == generation) {
                registry.remove(&id);
            }
        }

        if !self.repo.delete(id).await? {
            return Err(RepositoryError::NotFound(id).into());
        }
        info!(watch_id = %id, "watch deleted");
        Ok(())
    }

    /// Takes effect at the next wait of a running loop; digest and failure
    /// counter are left alone.
    #[instrument(skip(self))]
    pub async fn set_interval(&self, id: WatchId, interval_secs: u64) -> AppResult<()> {
        self.config.intervals.validate(interval_secs)?;
        if !self
            .repo
            .update_fields(id, &WatchPatch::interval(interval_secs))
            .await?
        {
            return Err(RepositoryError::NotFound(id).into());
        }
        info!(watch_id = %id, interval_secs, "interval updated");
        Ok(())
    }

    pub async fn get(&self, id: WatchId) -> AppResult<WatchStatus> {
        let watch = self
            .repo
            .get(id)
            .await?
            .ok_or(RepositoryError::NotFound(id))?;
        let registry = self.registry.read().await;
        Ok(status_of(watch, registry.get(&id)))
    }

    pub async fn list(&self) -> AppResult<Vec<WatchStatus>> {
        let watches = self.repo.list().await?;
        let registry = self.registry.read().await;
        Ok(watches
            .into_iter()
            .map(|watch| {
                let handle = registry.get(&watch.id);
                status_of(watch, handle)
            })
            .collect())
    }

    pub async fn phase(&self, id: WatchId) -> LoopPhase {
        phase_of(self.registry.read().await.get(&id))
    }

    pub async fn running_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Starts a loop for every active watch that has none. Returns how many
    /// were started.
    #[instrument(skip(self))]
    pub async fn resume_all(&self) -> AppResult<usize> {
        let mut started = 0;
        for watch in self.repo.list().await? {
            if !watch.active {
                continue;
            }
            match self.start(watch.id).await {
                Ok(()) => started += 1,
                Err(AppError::Scheduler(
                    SchedulerError::AlreadyRunning(_) | SchedulerError::Stopping(_),
                )) => {}
                Err(e) => warn!(watch_id = %watch.id, error = %e, "failed to resume watch"),
            }
        }
        if started > 0 {
            info!(started, "resumed active watches");
        }
        Ok(started)
    }

    /// Brings the registry in line with the repository: resumes active
    /// watches and signals loops whose record is gone or inactive.
    pub async fn reconcile(&self) -> AppResult<usize> {
        let watches = self.repo.list().await?;
        {
            let registry = self.registry.read().await;
            for (id, handle) in registry.iter() {
                let wanted = watches.iter().any(|w| w.id == *id && w.active);
                if !wanted && !handle.cancel.is_cancelled() {
                    debug!(watch_id = %id, "reconcile: signalling unwanted loop");
                    handle.cancel.cancel();
                }
            }
        }
        self.resume_all().await
    }

    /// Cancels every loop and waits for each up to the stop grace. Watches
    /// stay `active`, so the next `resume_all` picks them up again.
    pub async fn shutdown(&self) {
        info!("shutting down all check loops");
        self.shutdown.cancel();

        let tasks: Vec<(WatchId, JoinHandle<()>)> = {
            let mut registry = self.registry.write().await;
            registry
                .iter_mut()
                .filter_map(|(id, h)| h.task.take().map(|t| (*id, t)))
                .collect()
        };
        for (id, task) in tasks {
            if tokio::time::timeout(self.config.stop_grace, task).await.is_err() {
                warn!(watch_id = %id, "check loop did not stop within grace period");
            }
        }
    }
}

fn status_of(watch: Watch, handle: Option<&LoopHandle>) -> WatchStatus {
    WatchStatus {
        watch,
        phase: phase_of(handle),
        store_failures: handle.map_or(0, |h| h.store_failures.load(Ordering::Relaxed)),
    }
}

fn phase_of(handle: Option<&LoopHandle>) -> LoopPhase {
    match handle {
        None => LoopPhase::Idle,
        Some(h) if h.cancel.is_cancelled() => LoopPhase::Stopping,
        Some(_) => LoopPhase::Running,
    }
}

async fn supervise(
    id: WatchId,
    generation: u64,
    engine: Arc<ChangeEngine>,
    cancel: CancellationToken,
    store_failures: Arc<AtomicU32>,
    restart: RestartPolicy,
    registry: Registry,
) {
    let mut restarts = 0u32;
    loop {
        let run = tokio::spawn({
            let engine = engine.clone();
            let cancel = cancel.clone();
            let store_failures = store_failures.clone();
            async move { engine.run(id, cancel, &store_failures).await }
        });

        match run.await {
            Ok(exit) => {
                log_exit(id, exit);
                break;
            }
            Err(e) if e.is_panic() => {
                if cancel.is_cancelled() {
                    break;
                }
                if restarts >= restart.max_restarts {
                    error!(watch_id = %id, restarts, "check loop keeps crashing, giving up");
                    break;
                }
                restarts += 1;
                error!(
                    watch_id = %id,
                    restarts,
                    delay_secs = restart.delay.as_secs(),
                    "check loop panicked, restarting"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(restart.delay) => {}
                }
            }
            Err(e) => {
                warn!(watch_id = %id, error = %e, "check loop aborted");
                break;
            }
        }
    }

    let mut registry = registry.write().await;
    if registry.get(&id).is_some_and(|h| h.generation == generation) {
        registry.remove(&id);
    }
}

fn log_exit(id: WatchId, exit: LoopExit) {
    match exit {
        LoopExit::Cancelled => debug!(watch_id = %id, "check loop cancelled"),
        LoopExit::Deactivated => info!(watch_id = %id, "check loop exited: watch inactive"),
        LoopExit::Deleted => info!(watch_id = %id, "check loop exited: watch deleted"),
    }
}
