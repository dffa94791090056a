//! Byte-range segments: partitioning a content length and downloading one range.
//!
//! # Partitioning
//!
//! For a content length above [`SEGMENTING_THRESHOLD`] the block size is
//! `content_length / threads - BLOCK_SIZE_MARGIN`; `threads - 1` segments of
//! exactly one block are laid out from offset 0 and the last segment absorbs
//! the remainder, so it always ends at `content_length - 1`. Smaller files,
//! and any layout whose block size collapses to the whole length (or to
//! nothing), are downloaded as a single stream.
//!
//! # Writing
//!
//! Each segment opens its own handle on the shared destination file, seeks
//! once to `begin` and then writes strictly forward. Segments never overlap,
//! so concurrent writers need no lock.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::client::{HttpClient, range_header};
use super::constants::{BLOCK_SIZE_MARGIN, SEGMENTING_THRESHOLD, WRITE_BUFFER_SIZE};
use super::error::DownloadError;
use super::progress::ProgressSink;
use super::rate_limiter::RateLimiter;

/// One contiguous byte range of the target file.
///
/// `end` is inclusive and fixed at creation; `begin` moves forward as bytes
/// are written and the segment is complete once `begin > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    begin: u64,
    end: u64,
    downloaded: u64,
}

impl Segment {
    /// Creates a segment covering `begin..=end`.
    #[must_use]
    pub const fn new(begin: u64, end: u64) -> Self {
        Self {
            begin,
            end,
            downloaded: 0,
        }
    }

    /// Next offset to be written.
    #[must_use]
    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// Last offset (inclusive) of the segment.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Bytes written so far.
    #[must_use]
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Bytes still to be written.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        if self.is_complete() {
            0
        } else {
            self.end - self.begin + 1
        }
    }

    /// Whether every byte of the range has been written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.begin > self.end
    }

    fn advance(&mut self, written: u64) {
        self.begin += written;
        self.downloaded += written;
    }
}

/// How a download of known length will be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentPlan {
    /// One streamed request for the whole body.
    Single,
    /// Concurrent range requests, one per segment.
    Segmented(Vec<Segment>),
}

impl SegmentPlan {
    /// Number of concurrent range requests the plan issues (0 for single stream).
    #[must_use]
    pub fn segment_count(&self) -> usize {
        match self {
            Self::Single => 0,
            Self::Segmented(segments) => segments.len(),
        }
    }
}

/// Computes the block size for `content_length` split across `thread_count` streams.
///
/// Returns `content_length` itself at or below [`SEGMENTING_THRESHOLD`].
#[must_use]
pub fn block_size(content_length: u64, thread_count: usize) -> u64 {
    if content_length <= SEGMENTING_THRESHOLD {
        return content_length;
    }
    let threads = u64::try_from(thread_count.max(1)).unwrap_or(u64::MAX);
    (content_length / threads).saturating_sub(BLOCK_SIZE_MARGIN)
}

/// Partitions `[0, content_length)` into segments for `thread_count` streams.
///
/// # Example
///
/// ```
/// use segfetch_core::download::{SegmentPlan, plan_segments};
///
/// let SegmentPlan::Segmented(segments) = plan_segments(10_000_000, 4) else {
///     panic!("expected segments");
/// };
/// assert_eq!(segments.len(), 4);
/// assert_eq!(segments[3].end(), 9_999_999);
/// ```
#[must_use]
pub fn plan_segments(content_length: u64, thread_count: usize) -> SegmentPlan {
    if thread_count < 2 || content_length == 0 {
        return SegmentPlan::Single;
    }

    let block = block_size(content_length, thread_count);
    if block == content_length || block == 0 {
        return SegmentPlan::Single;
    }

    let mut segments = Vec::with_capacity(thread_count);
    let mut offset = 0u64;
    for _ in 1..thread_count {
        segments.push(Segment::new(offset, offset + block - 1));
        offset += block;
    }
    segments.push(Segment::new(offset, content_length - 1));
    SegmentPlan::Segmented(segments)
}

/// Everything a segment writer needs, shared by all segments of one task.
#[derive(Clone)]
pub(crate) struct SegmentContext {
    pub(crate) client: HttpClient,
    pub(crate) url: Arc<str>,
    pub(crate) headers: Arc<HeaderMap>,
    pub(crate) path: Arc<Path>,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) progress: Option<Arc<dyn ProgressSink>>,
}

impl SegmentContext {
    /// Downloads `segment` into its range of the destination file.
    ///
    /// The write buffer is flushed whether or not the transfer succeeded; the
    /// transfer error wins over a flush error.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Io`] when the file cannot be opened, sought or written
    /// - [`DownloadError::HttpStatus`] for any answer other than 206
    /// - [`DownloadError::ShortRead`] when the body ends before `end`
    /// - [`DownloadError::Network`] when the transfer breaks
    #[instrument(level = "debug", skip(self), fields(url = %self.url, begin = segment.begin(), end = segment.end()))]
    pub(crate) async fn download(&self, mut segment: Segment) -> Result<Segment, DownloadError> {
        // The file was sized by the probe; a missing file is an error, not a fresh start.
        let mut file = OpenOptions::new()
            .write(true)
            .open(&*self.path)
            .await
            .map_err(|e| DownloadError::io(self.path.to_path_buf(), e))?;
        file.seek(SeekFrom::Start(segment.begin))
            .await
            .map_err(|e| DownloadError::io(self.path.to_path_buf(), e))?;

        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        let transfer = self.transfer(&mut segment, &mut writer).await;
        let flushed = writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(self.path.to_path_buf(), e));

        transfer?;
        flushed?;
        debug!(bytes = segment.downloaded(), "segment complete");
        Ok(segment)
    }

    async fn transfer<W>(&self, segment: &mut Segment, writer: &mut W) -> Result<(), DownloadError>
    where
        W: AsyncWrite + Unpin,
    {
        let first = segment.begin;
        let range = range_header(segment.begin, Some(segment.end));
        let response = self.client.get(&self.url, &self.headers, Some(&range)).await?;

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::http_status(&*self.url, status.as_u16()));
        }

        let mut body = self.rate_limiter.throttle(response.bytes_stream());
        while !segment.is_complete() {
            let Some(chunk) = body.next_chunk().await else {
                return Err(DownloadError::short_read(
                    &*self.url,
                    first,
                    segment.end,
                    segment.downloaded,
                ));
            };
            let chunk = chunk.map_err(|e| DownloadError::network(&*self.url, e))?;

            // Servers may send more than asked for; never write past `end`.
            let allowed = usize::try_from(segment.remaining()).unwrap_or(usize::MAX);
            let take = chunk.len().min(allowed);
            writer
                .write_all(&chunk[..take])
                .await
                .map_err(|e| DownloadError::io(self.path.to_path_buf(), e))?;

            let written = take as u64;
            segment.advance(written);
            if let Some(progress) = &self.progress {
                progress.add(written);
            }
        }
        Ok(())
    }
}
