//! Segmented HTTP range downloads streamed to disk.
//!
//! This module downloads one file per [`DownloadTask`]. When the server
//! honours byte ranges and the file is large enough, the body is split into
//! contiguous segments fetched concurrently into one preallocated file;
//! otherwise it is streamed with a single request.
//!
//! # Features
//!
//! - Range probing with single-stream fallback (200 answers, small files)
//! - Concurrent segment writers with independent file handles
//! - Per-stream rate limiting
//! - Short-read detection per segment
//! - Cancellation and optional per-task deadlines
//!
//! # Example
//!
//! ```no_run
//! use segfetch_core::download::{DownloadTask, Downloader, HttpClient, RateLimiter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(HttpClient::new(), RateLimiter::default());
//! let task = DownloadTask::new("https://example.com/big.iso", "./staging", "big.iso")
//!     .with_thread_count(8);
//! let report = downloader.download(&task).await?;
//! println!("wrote {} bytes to {}", report.bytes, report.path.display());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod downloader;
mod error;
mod filename;
mod initializer;
pub mod progress;
pub mod rate_limiter;
mod segment;
mod task;

pub use client::HttpClient;
pub use downloader::{DownloadMode, DownloadReport, Downloader};
pub use error::DownloadError;
pub use filename::{file_name_from_url, sanitize_filename};
pub use progress::ProgressSink;
pub use rate_limiter::{RateLimiter, ThrottledStream};
pub use segment::{Segment, SegmentPlan, block_size, plan_segments};
pub use task::{DownloadTask, FailureHook, FailureNotice};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
