//! Error types for the download module.
//!
//! This module defines structured errors for all download operations,
//! providing context-rich error messages for debugging and for the
//! failure hook consumers.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while downloading one task.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, reset mid-stream, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The transport reported a timeout (connect timeout).
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response (4xx, 5xx, or a non-206 answer to a segment request).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The range probe answered with a 2xx status that is neither 200 nor 206.
    #[error("unexpected probe status {status} for {url}")]
    UnexpectedStatus {
        /// The probed URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The body ended before the requested byte range was delivered.
    #[error(
        "short read downloading {url}: range {begin}-{end} stopped after {received} of {expected} bytes"
    )]
    ShortRead {
        /// The URL being downloaded.
        url: String,
        /// First byte of the requested range.
        begin: u64,
        /// Last byte (inclusive) of the requested range.
        end: u64,
        /// Bytes actually written for the range.
        received: u64,
        /// Bytes the range should have delivered.
        expected: u64,
    },

    /// File system error (open, seek, write, flush).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The task descriptor cannot be executed as given.
    #[error("invalid download task: {reason}")]
    InvalidTask {
        /// What is wrong with the task.
        reason: String,
    },

    /// The task was cancelled before it finished.
    #[error("download of {url} cancelled")]
    Cancelled {
        /// The URL being downloaded.
        url: String,
    },

    /// The task ran past its deadline.
    #[error("download of {url} exceeded its deadline of {}s", deadline.as_secs())]
    DeadlineExceeded {
        /// The URL being downloaded.
        url: String,
        /// The configured deadline.
        deadline: Duration,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    ///
    /// Timeouts reported by reqwest are mapped to [`DownloadError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an unexpected probe status error.
    pub fn unexpected_status(url: impl Into<String>, status: u16) -> Self {
        Self::UnexpectedStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a short read error for the inclusive range `begin..=end`.
    pub fn short_read(url: impl Into<String>, begin: u64, end: u64, received: u64) -> Self {
        Self::ShortRead {
            url: url.into(),
            begin,
            end,
            received,
            expected: end.saturating_sub(begin).saturating_add(1),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid task error.
    pub fn invalid_task(reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            reason: reason.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates a deadline error.
    pub fn deadline_exceeded(url: impl Into<String>, deadline: Duration) -> Self {
        Self::DeadlineExceeded {
            url: url.into(),
            deadline,
        }
    }

    /// Returns true when the failure came from cancellation rather than the transfer itself.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs the
// url or path, which the source errors do not carry.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://example.com/file.bin", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(
            msg.contains("https://example.com/file.bin"),
            "Expected URL in: {msg}"
        );
    }

    #[test]
    fn test_download_error_short_read_computes_expected() {
        let error = DownloadError::short_read("https://example.com/a", 100, 199, 40);
        match &error {
            DownloadError::ShortRead {
                expected, received, ..
            } => {
                assert_eq!(*expected, 100);
                assert_eq!(*received, 40);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        let msg = error.to_string();
        assert!(msg.contains("short read"), "Expected 'short read' in: {msg}");
        assert!(msg.contains("100-199"), "Expected range in: {msg}");
    }

    #[test]
    fn test_download_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/staging/a.bin"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/staging/a.bin"), "Expected path in: {msg}");
    }

    #[test]
    fn test_download_error_deadline_display() {
        let error =
            DownloadError::deadline_exceeded("https://example.com/a", Duration::from_secs(90));
        assert!(error.to_string().contains("90s"));
        assert!(!error.is_cancelled());
    }

    #[test]
    fn test_download_error_cancelled_flag() {
        assert!(DownloadError::cancelled("https://example.com/a").is_cancelled());
        assert!(!DownloadError::invalid_url("nope").is_cancelled());
    }

    #[test]
    fn test_download_error_unexpected_status_display() {
        let msg = DownloadError::unexpected_status("https://example.com/a", 204).to_string();
        assert!(msg.contains("204"), "Expected status in: {msg}");
    }
}
