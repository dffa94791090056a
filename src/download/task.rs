//! The download task descriptor and its collaborator hooks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

use super::constants::DEFAULT_THREAD_COUNT;
use super::error::DownloadError;
use super::progress::ProgressSink;

/// What the failure hook receives for a failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct FailureNotice<'a> {
    /// Source URL of the task.
    pub url: &'a str,
    /// Staging directory the task wrote into.
    pub staging_dir: &'a Path,
    /// File name inside the staging directory.
    pub file_name: &'a str,
    /// Terminal error of the attempt.
    pub error: &'a DownloadError,
    /// How many times this download had already been retried.
    pub retry_count: u32,
    /// Final path the file would have been relocated to.
    pub final_path: Option<&'a Path>,
    /// Headers the attempt was made with.
    pub headers: &'a HeaderMap,
}

/// Callback invoked at most once per failed attempt.
pub type FailureHook = Arc<dyn Fn(FailureNotice<'_>) + Send + Sync>;

/// One whole-file download submitted to the worker pool.
///
/// The descriptor is immutable once built; progress flows out through the
/// optional [`ProgressSink`].
///
/// # Example
///
/// ```
/// use segfetch_core::download::DownloadTask;
///
/// let task = DownloadTask::new("https://example.com/a.zip", "/tmp/staging", "a.zip")
///     .with_final_path("/mnt/remote/a.zip")
///     .with_thread_count(8);
/// assert_eq!(task.staging_path().to_str(), Some("/tmp/staging/a.zip"));
/// ```
#[derive(Clone)]
pub struct DownloadTask {
    url: String,
    staging_dir: PathBuf,
    file_name: String,
    staging_path: PathBuf,
    final_path: Option<PathBuf>,
    headers: HeaderMap,
    thread_count: usize,
    retry_count: u32,
    on_failure: Option<FailureHook>,
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTask")
            .field("url", &self.url)
            .field("staging_path", &self.staging_path)
            .field("final_path", &self.final_path)
            .field("thread_count", &self.thread_count)
            .field("retry_count", &self.retry_count)
            .field("has_failure_hook", &self.on_failure.is_some())
            .field("has_progress", &self.progress.is_some())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl DownloadTask {
    /// Creates a task that downloads `url` into `staging_dir/file_name`.
    pub fn new(
        url: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        let staging_dir = staging_dir.into();
        let file_name = file_name.into();
        let staging_path = staging_dir.join(&file_name);
        Self {
            url: url.into(),
            staging_dir,
            file_name,
            staging_path,
            final_path: None,
            headers: HeaderMap::new(),
            thread_count: DEFAULT_THREAD_COUNT,
            retry_count: 0,
            on_failure: None,
            progress: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Sets the path the file is relocated to after a successful download.
    #[must_use]
    pub fn with_final_path(mut self, final_path: impl Into<PathBuf>) -> Self {
        self.final_path = Some(final_path.into());
        self
    }

    /// Sets the request headers sent with every request of the task.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the desired number of concurrent segments (below 2 means single stream).
    #[must_use]
    pub fn with_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Sets how many times this download has already been retried.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Installs the failure hook.
    #[must_use]
    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Installs a progress sink.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Uses `token` to cancel this task.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Bounds the whole download (all segments) by `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Staging directory.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// File name inside the staging directory.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Full staging path (`staging_dir/file_name`).
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Final path, if the task relocates after download.
    #[must_use]
    pub fn final_path(&self) -> Option<&Path> {
        self.final_path.as_deref()
    }

    /// Returns the final path when it differs from the staging path.
    #[must_use]
    pub fn relocation_target(&self) -> Option<&Path> {
        self.final_path()
            .filter(|final_path| *final_path != self.staging_path.as_path())
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Desired number of segments.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Retry count of this attempt.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Progress sink, if any.
    #[must_use]
    pub fn progress(&self) -> Option<&Arc<dyn ProgressSink>> {
        self.progress.as_ref()
    }

    /// Cancellation token of the task.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deadline of the task.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Invokes the failure hook, if one is installed.
    pub(crate) fn notify_failure(&self, error: &DownloadError) {
        if let Some(hook) = &self.on_failure {
            hook(FailureNotice {
                url: &self.url,
                staging_dir: &self.staging_dir,
                file_name: &self.file_name,
                error,
                retry_count: self.retry_count,
                final_path: self.final_path.as_deref(),
                headers: &self.headers,
            });
        }
    }
}
