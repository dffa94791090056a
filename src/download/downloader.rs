//! Whole-file download: probe, fan out segments, join.
//!
//! [`Downloader`] runs one [`DownloadTask`] to completion. Tasks with a thread
//! count of 2 or more are probed first (see the `initializer` module); the
//! resulting segments are spawned onto a [`JoinSet`] and joined before the
//! call returns, so a successful return means every byte is on disk.
//!
//! Cancellation and the optional per-task deadline wrap the whole attempt.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Response;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, ensure_success};
use super::constants::WRITE_BUFFER_SIZE;
use super::error::DownloadError;
use super::initializer::{Initialized, initialize};
use super::rate_limiter::RateLimiter;
use super::segment::{Segment, SegmentContext};
use super::task::DownloadTask;

/// How a finished download was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    /// One streamed request.
    SingleStream,
    /// Concurrent range requests.
    Segmented {
        /// Number of segments.
        segments: usize,
    },
}

/// Summary of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Where the file was written.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// Transfer mode used.
    pub mode: DownloadMode,
}

/// Executes download tasks with a shared client and per-stream rate limit.
#[derive(Debug, Clone, Default)]
pub struct Downloader {
    client: HttpClient,
    rate_limiter: RateLimiter,
}

impl Downloader {
    /// Creates a downloader.
    #[must_use]
    pub fn new(client: HttpClient, rate_limiter: RateLimiter) -> Self {
        Self {
            client,
            rate_limiter,
        }
    }

    /// Shared HTTP client.
    #[must_use]
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Per-stream rate limit.
    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter {
        self.rate_limiter
    }

    /// Downloads `task` into its staging path.
    ///
    /// A partially written staging file is left in place on error; the
    /// caller decides whether to remove it.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Cancelled`] when the task's token fires
    /// - [`DownloadError::DeadlineExceeded`] when the task's deadline elapses
    /// - the first error of any probe, segment or single-stream transfer
    #[instrument(skip(self, task), fields(url = %task.url(), path = %task.staging_path().display()))]
    pub async fn download(&self, task: &DownloadTask) -> Result<DownloadReport, DownloadError> {
        let cancel = task.cancellation();
        if cancel.is_cancelled() {
            return Err(DownloadError::cancelled(task.url()));
        }

        let bounded = async {
            match task.deadline() {
                Some(deadline) => tokio::time::timeout(deadline, self.run(task))
                    .await
                    .map_err(|_| DownloadError::deadline_exceeded(task.url(), deadline))?,
                None => self.run(task).await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("download cancelled");
                Err(DownloadError::cancelled(task.url()))
            }
            result = bounded => result,
        }
    }

    async fn run(&self, task: &DownloadTask) -> Result<DownloadReport, DownloadError> {
        if task.file_name().is_empty() {
            return Err(DownloadError::invalid_task("file name is empty"));
        }
        if task.thread_count() < 2 {
            let response = self.client.get(task.url(), task.headers(), None).await?;
            ensure_success(task.url(), &response)?;
            return self.single_stream(task, response).await;
        }

        match initialize(&self.client, task).await? {
            Initialized::SingleStream(response) => self.single_stream(task, response).await,
            Initialized::Segmented {
                content_length,
                segments,
            } => self.segmented(task, content_length, segments).await,
        }
    }

    async fn single_stream(
        &self,
        task: &DownloadTask,
        response: Response,
    ) -> Result<DownloadReport, DownloadError> {
        let expected = response.content_length();
        if let (Some(progress), Some(total)) = (task.progress(), expected) {
            progress.start(total);
        }

        let bytes = stream_to_file(task, response, self.rate_limiter).await?;
        if let Some(expected) = expected
            && bytes < expected
        {
            return Err(DownloadError::short_read(
                task.url(),
                0,
                expected.saturating_sub(1),
                bytes,
            ));
        }

        if let Some(progress) = task.progress() {
            progress.finish();
        }
        debug!(bytes, "single-stream download complete");
        Ok(DownloadReport {
            path: task.staging_path().to_path_buf(),
            bytes,
            mode: DownloadMode::SingleStream,
        })
    }

    async fn segmented(
        &self,
        task: &DownloadTask,
        content_length: u64,
        segments: Vec<Segment>,
    ) -> Result<DownloadReport, DownloadError> {
        if let Some(progress) = task.progress() {
            progress.start(content_length);
        }

        let context = SegmentContext {
            client: self.client.clone(),
            url: Arc::from(task.url()),
            headers: Arc::new(task.headers().clone()),
            path: Arc::from(task.staging_path()),
            rate_limiter: self.rate_limiter,
            progress: task.progress().cloned(),
        };

        let count = segments.len();
        let mut set = JoinSet::new();
        for segment in segments {
            let context = context.clone();
            set.spawn(async move { context.download(segment).await });
        }

        let mut bytes = 0u64;
        let mut first_error: Option<DownloadError> = None;
        while let Some(joined) = set.join_next().await {
            let error = match joined {
                Ok(Ok(segment)) => {
                    bytes += segment.downloaded();
                    continue;
                }
                Ok(Err(error)) => error,
                Err(join_error) if join_error.is_cancelled() => continue,
                Err(join_error) => DownloadError::io(
                    task.staging_path(),
                    std::io::Error::other(format!("segment task failed: {join_error}")),
                ),
            };

            if first_error.is_none() {
                warn!(error = %error, "segment failed, stopping remaining segments");
                set.abort_all();
                first_error = Some(error);
            } else {
                debug!(error = %error, "further segment error ignored");
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        if let Some(progress) = task.progress() {
            progress.finish();
        }
        debug!(bytes, segments = count, "segmented download complete");
        Ok(DownloadReport {
            path: task.staging_path().to_path_buf(),
            bytes,
            mode: DownloadMode::Segmented { segments: count },
        })
    }
}

/// Streams `response` into the task's staging path, truncating it first.
///
/// Returns the number of bytes written. The buffer is flushed even when the
/// transfer fails part-way.
async fn stream_to_file(
    task: &DownloadTask,
    response: Response,
    rate_limiter: RateLimiter,
) -> Result<u64, DownloadError> {
    let path = task.staging_path();
    let file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    let transfer = copy_body(task, path, response, rate_limiter, &mut writer).await;
    let flushed = writer.flush().await.map_err(|e| DownloadError::io(path, e));

    let bytes = transfer?;
    flushed?;
    Ok(bytes)
}

async fn copy_body(
    task: &DownloadTask,
    path: &Path,
    response: Response,
    rate_limiter: RateLimiter,
    writer: &mut BufWriter<File>,
) -> Result<u64, DownloadError> {
    let mut body = rate_limiter.throttle(response.bytes_stream());
    let mut bytes = 0u64;
    while let Some(chunk) = body.next_chunk().await {
        let chunk = chunk.map_err(|e| DownloadError::network(task.url(), e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        let written = chunk.len() as u64;
        bytes += written;
        if let Some(progress) = task.progress() {
            progress.add(written);
        }
    }
    Ok(bytes)
}
