//! Constants for the download module (buffer sizes, segmenting, timeouts, throttling).

/// Write buffer size per stream (8 MiB).
pub const WRITE_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Content length at or below which a download is never segmented (1 MiB).
pub const SEGMENTING_THRESHOLD: u64 = 1024 * 1024;

/// Bytes subtracted from `content_length / threads` when sizing segments.
pub const BLOCK_SIZE_MARGIN: u64 = 10;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-stream rate limit (50 MiB/s).
pub const DEFAULT_RATE_LIMIT_BYTES_PER_SEC: u64 = 50 * 1024 * 1024;

/// Default number of segments per task.
pub const DEFAULT_THREAD_COUNT: usize = 4;

/// Upper bound on segments per task.
pub const MAX_THREAD_COUNT: usize = 64;
