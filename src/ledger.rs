//! Retry ledger fed by task failure hooks.
//!
//! The [`FailureLedger`] collects failed attempts as they are reported and
//! hands them back in rounds: every failed task below the retry limit is
//! returned for resubmission with its retry count raised by one, the rest are
//! kept as permanent failures.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use segfetch_core::ledger::FailureLedger;
//!
//! let ledger = Arc::new(FailureLedger::new(3));
//! let hook = ledger.hook();
//! // Install `hook` on each task with `DownloadTask::with_failure_hook`.
//! # drop(hook);
//! assert!(ledger.take_retry_round().is_empty());
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::header::HeaderMap;
use tracing::{info, warn};

use crate::download::{DownloadTask, FailureHook, FailureNotice};

/// Default retry limit.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One failed attempt as recorded by the ledger.
#[derive(Debug, Clone)]
pub struct FailedTask {
    /// Source URL.
    pub url: String,
    /// Staging directory.
    pub staging_dir: PathBuf,
    /// File name inside the staging directory.
    pub file_name: String,
    /// Final path, if the task relocates.
    pub final_path: Option<PathBuf>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Retries already spent.
    pub retry_count: u32,
    /// Rendered terminal error of the attempt.
    pub error: String,
}

impl FailedTask {
    fn from_notice(notice: &FailureNotice<'_>) -> Self {
        Self {
            url: notice.url.to_string(),
            staging_dir: notice.staging_dir.to_path_buf(),
            file_name: notice.file_name.to_string(),
            final_path: notice.final_path.map(std::path::Path::to_path_buf),
            headers: notice.headers.clone(),
            retry_count: notice.retry_count,
            error: notice.error.to_string(),
        }
    }

    /// Rebuilds the task descriptor (without hook, progress or thread count).
    #[must_use]
    pub fn to_task(&self) -> DownloadTask {
        let task = DownloadTask::new(&self.url, &self.staging_dir, &self.file_name)
            .with_headers(self.headers.clone())
            .with_retry_count(self.retry_count);
        match &self.final_path {
            Some(final_path) => task.with_final_path(final_path),
            None => task,
        }
    }
}

/// Thread-safe record of failed downloads.
#[derive(Debug)]
pub struct FailureLedger {
    max_retries: u32,
    pending: Mutex<Vec<FailedTask>>,
    permanent: Mutex<Vec<FailedTask>>,
}

impl Default for FailureLedger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl FailureLedger {
    /// Creates a ledger allowing `max_retries` retries per task.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            pending: Mutex::new(Vec::new()),
            permanent: Mutex::new(Vec::new()),
        }
    }

    /// Configured retry limit.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Records one failed attempt.
    pub fn record(&self, notice: &FailureNotice<'_>) {
        warn!(
            url = %notice.url,
            file = %notice.file_name,
            retry = notice.retry_count,
            error = %notice.error,
            "recording failed download"
        );
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FailedTask::from_notice(notice));
    }

    /// Returns a failure hook that records into this ledger.
    #[must_use]
    pub fn hook(self: &Arc<Self>) -> FailureHook {
        let ledger = Arc::clone(self);
        Arc::new(move |notice: FailureNotice<'_>| ledger.record(&notice))
    }

    /// Number of failures waiting for the next round.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drains pending failures into the next retry round.
    ///
    /// Tasks that already spent `max_retries` retries move to the permanent
    /// list; the others are returned with `retry_count + 1`.
    pub fn take_retry_round(&self) -> Vec<FailedTask> {
        let drained =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));

        let (exhausted, retry): (Vec<_>, Vec<_>) = drained
            .into_iter()
            .partition(|failed| failed.retry_count >= self.max_retries);

        if !exhausted.is_empty() {
            for failed in &exhausted {
                warn!(
                    url = %failed.url,
                    retries = failed.retry_count,
                    error = %failed.error,
                    "giving up on download"
                );
            }
            self.permanent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(exhausted);
        }

        let round: Vec<FailedTask> = retry
            .into_iter()
            .map(|mut failed| {
                failed.retry_count += 1;
                failed
            })
            .collect();
        if !round.is_empty() {
            info!(count = round.len(), "scheduling retry round");
        }
        round
    }

    /// Tasks that exhausted their retries.
    #[must_use]
    pub fn permanently_failed(&self) -> Vec<FailedTask> {
        self.permanent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
