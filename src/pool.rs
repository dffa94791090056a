//! Admission-controlled worker pool for whole-file downloads.
//!
//! The [`WorkerPool`] accepts [`DownloadTask`]s through a bounded intake
//! queue. A dispatcher pulls them in submission order and waits for one of
//! `capacity` semaphore permits before launching each task on its own tokio
//! task, so at most `capacity` downloads run at any instant.
//!
//! # Task lifecycle
//!
//! ```text
//! Queued -> Admitted -> Downloading -> Failed
//!                                   -> Downloaded -> [BackpressureWait] -> Relocating
//!                                                        -> Completed | RelocationFailed
//! ```
//!
//! A failed download fires the task's failure hook once, removes the partial
//! staging file and skips relocation. A successful download whose final path
//! differs from its staging path waits on the [`BackpressureGate`] (when one is
//! configured) and is then relocated. One task failing never stops the pool.
//!
//! # Example
//!
//! ```no_run
//! use segfetch_core::download::{DownloadTask, Downloader};
//! use segfetch_core::pool::{PoolConfig, WorkerPool};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = WorkerPool::new(Downloader::default(), PoolConfig::new(4))?;
//! pool.submit(DownloadTask::new("https://example.com/a.iso", "./staging", "a.iso")).await?;
//! pool.wait_idle().await;
//! println!("completed: {}", pool.stats().completed());
//! pool.close_and_join().await;
//! # Ok(())
//! # }
//! ```

pub mod backpressure;
pub mod relocate;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::download::{DownloadError, DownloadTask, Downloader};
pub use backpressure::{
    BackpressureGate, CacheMonitor, DEFAULT_CACHE_ENDPOINT, GateConfig, ProbeError,
    RcloneVfsMonitor,
};
pub use relocate::{RelocateError, RelocationMethod, relocate};

/// Minimum allowed pool capacity.
pub const MIN_CAPACITY: usize = 1;

/// Maximum allowed pool capacity.
pub const MAX_CAPACITY: usize = 100;

/// Default pool capacity.
pub const DEFAULT_CAPACITY: usize = 4;

/// Error type for worker pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Invalid capacity value provided.
    #[error("invalid pool capacity {value}: must be between {MIN_CAPACITY} and {MAX_CAPACITY}")]
    InvalidCapacity {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The pool no longer accepts tasks.
    #[error("worker pool is closed")]
    Closed,

    /// The resume threshold is not below the pause threshold.
    #[error(
        "invalid backpressure thresholds: resume ({resume} bytes) must be below pause ({pause} bytes)"
    )]
    InvalidThresholds {
        /// Pause threshold in bytes.
        pause: u64,
        /// Resume threshold in bytes.
        resume: u64,
    },
}

/// Where a task is in its lifecycle; used as a structured log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in the intake queue.
    Queued,
    /// Holding a permit, not yet transferring.
    Admitted,
    /// Transfer in progress.
    Downloading,
    /// Transfer failed (terminal).
    Failed,
    /// Transfer finished; relocation pending.
    Downloaded,
    /// Waiting for the downstream cache to drain.
    BackpressureWait,
    /// Moving the file to its final path.
    Relocating,
    /// Done (terminal).
    Completed,
    /// Relocation failed; staging file kept (terminal).
    RelocationFailed,
}

impl TaskState {
    /// Returns the state name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Admitted => "admitted",
            Self::Downloading => "downloading",
            Self::Failed => "failed",
            Self::Downloaded => "downloaded",
            Self::BackpressureWait => "backpressure_wait",
            Self::Relocating => "relocating",
            Self::Completed => "completed",
            Self::RelocationFailed => "relocation_failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Downloaded, and relocated when a distinct final path was set.
    Completed,
    /// Download failed; the failure hook fired.
    Failed,
    /// Cancelled by shutdown or the task's own token.
    Cancelled,
    /// Downloaded, but the staging file could not be relocated.
    RelocationFailed,
}

/// Counters accumulated over the pool's lifetime.
///
/// Updated atomically from concurrent task executors.
#[derive(Debug, Default)]
pub struct PoolStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    relocated: AtomicUsize,
    relocation_failed: AtomicUsize,
    peak_active: AtomicUsize,
}

impl PoolStats {
    /// Tasks that finished successfully.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Tasks whose download failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Tasks cancelled before finishing (including queued tasks dropped at shutdown).
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Files moved from staging to their final path.
    #[must_use]
    pub fn relocated(&self) -> usize {
        self.relocated.load(Ordering::SeqCst)
    }

    /// Downloads whose relocation failed.
    #[must_use]
    pub fn relocation_failed(&self) -> usize {
        self.relocation_failed.load(Ordering::SeqCst)
    }

    /// Highest number of tasks observed running at once.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Tasks that reached a terminal state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed() + self.cancelled() + self.relocation_failed()
    }

    fn record(&self, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.completed,
            TaskOutcome::Failed => &self.failed,
            TaskOutcome::Cancelled => &self.cancelled,
            TaskOutcome::RelocationFailed => &self.relocation_failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Construction-time settings of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of tasks running at once (1-100).
    pub capacity: usize,
    /// Gate consulted before each relocation; `None` relocates immediately.
    pub gate: Option<BackpressureGate>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PoolConfig {
    /// Creates a configuration with `capacity` and no backpressure gate.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            gate: None,
        }
    }

    /// Installs a backpressure gate.
    #[must_use]
    pub fn with_gate(mut self, gate: BackpressureGate) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// State shared between the pool handle, the dispatcher and task executors.
struct Shared {
    downloader: Downloader,
    gate: Option<BackpressureGate>,
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    stats: PoolStats,
    /// Submitted tasks that have not reached a terminal state.
    outstanding: watch::Sender<usize>,
    shutdown: CancellationToken,
}

impl Shared {
    fn finish_one(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn discard(&self, task: &DownloadTask) {
        debug!(url = %task.url(), state = %TaskState::Queued, "dropping queued task on shutdown");
        self.stats.record(TaskOutcome::Cancelled);
        self.finish_one();
    }
}

/// Bounded-concurrency executor for download tasks.
///
/// # Concurrency Model
///
/// - A semaphore with `capacity` permits gates admission; permits are handed
///   out in FIFO order, so tasks start in submission order
/// - Each admitted task runs in its own tokio task
/// - The active count is raised after a permit is acquired and lowered
///   before it is released, so `active() <= capacity()` always holds
/// - [`shutdown`](Self::shutdown) cancels every in-flight task and drops
///   queued ones
pub struct WorkerPool {
    shared: Arc<Shared>,
    capacity: usize,
    intake: Mutex<Option<mpsc::Sender<DownloadTask>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("active", &self.active())
            .field("stats", &self.shared.stats)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates the pool and starts its dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidCapacity`] if the capacity is outside 1-100.
    #[instrument(level = "debug", skip(downloader, config), fields(capacity = config.capacity))]
    pub fn new(downloader: Downloader, config: PoolConfig) -> Result<Self, PoolError> {
        let capacity = config.capacity;
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
            return Err(PoolError::InvalidCapacity { value: capacity });
        }

        debug!(
            capacity,
            backpressure = config.gate.is_some(),
            rate_limit = downloader.rate_limiter().bytes_per_sec(),
            "creating worker pool"
        );

        let (outstanding, _) = watch::channel(0usize);
        let shared = Arc::new(Shared {
            downloader,
            gate: config.gate,
            semaphore: Arc::new(Semaphore::new(capacity)),
            active: AtomicUsize::new(0),
            stats: PoolStats::default(),
            outstanding,
            shutdown: CancellationToken::new(),
        });

        let (sender, receiver) = mpsc::channel(capacity);
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), receiver));

        Ok(Self {
            shared,
            capacity,
            intake: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Returns the configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples the number of tasks currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Returns the pool statistics.
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    /// Enqueues `task`, waiting while the intake queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] after [`shutdown`](Self::shutdown) or
    /// [`close_and_join`](Self::close_and_join).
    pub async fn submit(&self, task: DownloadTask) -> Result<(), PoolError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(PoolError::Closed);
        }
        let sender = self
            .intake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::Closed)?;

        debug!(url = %task.url(), state = %TaskState::Queued, "task submitted");
        self.shared.outstanding.send_modify(|n| *n += 1);
        if sender.send(task).await.is_err() {
            self.shared.finish_one();
            return Err(PoolError::Closed);
        }
        Ok(())
    }

    /// Waits until every submitted task has reached a terminal state.
    pub async fn wait_idle(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        if outstanding.wait_for(|n| *n == 0).await.is_err() {
            debug!("pool state dropped while waiting for idle");
        }
    }

    /// Cancels in-flight tasks and drops queued ones.
    ///
    /// Cancelled tasks do not fire their failure hook. Further submissions fail.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!(active = self.active(), "shutting down worker pool");
            self.shared.shutdown.cancel();
        }
    }

    /// Returns whether [`shutdown`](Self::shutdown) was requested.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stops accepting tasks and waits for the dispatcher and every running task to finish.
    pub async fn close_and_join(&self) {
        drop(
            self.intake
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "pool dispatcher panicked");
        }

        let stats = self.stats();
        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            cancelled = stats.cancelled(),
            relocated = stats.relocated(),
            relocation_failed = stats.relocation_failed(),
            peak_active = stats.peak_active(),
            "worker pool finished"
        );
    }
}

/// Holds a task's permit and its slot in the active count.
struct ActiveSlot {
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl ActiveSlot {
    fn admit(shared: Arc<Shared>, permit: OwnedSemaphorePermit) -> Self {
        let active = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.stats.peak_active.fetch_max(active, Ordering::SeqCst);
        Self {
            shared,
            _permit: permit,
        }
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        // Runs before the permit field is dropped.
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.finish_one();
    }
}

/// Pulls tasks in order and launches each once a permit is free.
async fn dispatch(shared: Arc<Shared>, mut intake: mpsc::Receiver<DownloadTask>) {
    let mut running = JoinSet::new();

    loop {
        let task = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            task = intake.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => {
                shared.discard(&task);
                break;
            }
            permit = Arc::clone(&shared.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    shared.discard(&task);
                    break;
                }
            },
        };

        let slot = ActiveSlot::admit(Arc::clone(&shared), permit);
        let executor = Arc::clone(&shared);
        running.spawn(async move {
            let _slot = slot;
            execute(&executor, task).await
        });

        while let Some(joined) = running.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "task executor panicked");
            }
        }
    }

    intake.close();
    while let Ok(task) = intake.try_recv() {
        shared.discard(&task);
    }

    debug!(running = running.len(), "waiting for running tasks");
    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "task executor panicked");
        }
    }
}

/// Runs one admitted task to its terminal state.
#[instrument(skip_all, fields(url = %task.url(), file = %task.file_name()))]
async fn execute(shared: &Shared, task: DownloadTask) -> TaskOutcome {
    debug!(state = %TaskState::Admitted, retry = task.retry_count(), "task admitted");

    let download = shared.downloader.download(&task);
    tokio::pin!(download);
    debug!(state = %TaskState::Downloading, "starting download");
    let result = tokio::select! {
        result = &mut download => result,
        () = shared.shutdown.cancelled() => {
            task.cancellation().cancel();
            download.await
        }
    };

    let outcome = match result {
        Err(error) => fail(&task, &error).await,
        Ok(report) => {
            info!(
                state = %TaskState::Downloaded,
                bytes = report.bytes,
                mode = ?report.mode,
                "download finished"
            );
            match task.relocation_target() {
                None => TaskOutcome::Completed,
                Some(_) => place(shared, &task).await,
            }
        }
    };

    shared.stats.record(outcome);
    outcome
}

/// Handles a failed download: log, remove the partial file, notify.
async fn fail(task: &DownloadTask, error: &DownloadError) -> TaskOutcome {
    let outcome = if error.is_cancelled() {
        info!(state = %TaskState::Failed, "download cancelled");
        TaskOutcome::Cancelled
    } else {
        error!(state = %TaskState::Failed, error = %error, "download failed");
        TaskOutcome::Failed
    };

    let staging = task.staging_path();
    match tokio::fs::remove_file(staging).await {
        Ok(()) => debug!(path = %staging.display(), "removed partial staging file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %staging.display(), error = %e, "failed to remove staging file"),
    }

    if outcome == TaskOutcome::Failed {
        task.notify_failure(error);
    }
    outcome
}

/// Waits on the gate (if any), then moves the staging file to its final path.
async fn place(shared: &Shared, task: &DownloadTask) -> TaskOutcome {
    let Some(target) = task.relocation_target() else {
        return TaskOutcome::Completed;
    };

    if let Some(gate) = &shared.gate {
        debug!(state = %TaskState::BackpressureWait, "checking downstream cache");
        let cleared = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => false,
            () = task.cancellation().cancelled() => false,
            _ = gate.wait() => true,
        };
        if !cleared {
            warn!(
                path = %task.staging_path().display(),
                "relocation abandoned by cancellation, staging file kept"
            );
            return TaskOutcome::Cancelled;
        }
    }

    debug!(state = %TaskState::Relocating, target = %target.display(), "relocating");
    match relocate(task.staging_path(), target).await {
        Ok(method) => {
            shared.stats.relocated.fetch_add(1, Ordering::SeqCst);
            info!(
                state = %TaskState::Completed,
                target = %target.display(),
                ?method,
                "file relocated"
            );
            TaskOutcome::Completed
        }
        Err(e) => {
            error!(
                state = %TaskState::RelocationFailed,
                staging = %task.staging_path().display(),
                target = %target.display(),
                error = %e,
                "relocation failed, staging file kept"
            );
            TaskOutcome::RelocationFailed
        }
    }
}
