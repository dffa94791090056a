//! Per-stream byte-rate throttling.
//!
//! This module provides the [`RateLimiter`] value and the [`ThrottledStream`]
//! wrapper. A limiter is plain configuration: it is copied into every stream,
//! and each stream paces itself independently against it.
//!
//! # Overview
//!
//! After each physical read of `n` bytes the stream computes
//! `expected = n / bytes_per_sec` and sleeps for `expected - elapsed` when the
//! read finished faster than that. Nothing is shared between streams, so `C`
//! concurrent segments of one task can together reach `C` times the
//! configured rate.
//!
//! # Example
//!
//! ```
//! use segfetch_core::download::RateLimiter;
//!
//! let limiter = RateLimiter::new(1024 * 1024);
//! assert!(!limiter.is_disabled());
//! assert!(RateLimiter::disabled().is_disabled());
//! ```

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::time::Instant;
use tracing::trace;

use super::constants::DEFAULT_RATE_LIMIT_BYTES_PER_SEC;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Per-stream byte-rate limit.
///
/// A rate of zero disables throttling entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    bytes_per_sec: u64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_BYTES_PER_SEC)
    }
}

impl RateLimiter {
    /// Creates a limiter allowing `bytes_per_sec` per stream (0 disables).
    #[must_use]
    pub const fn new(bytes_per_sec: u64) -> Self {
        Self { bytes_per_sec }
    }

    /// Creates a limiter that never sleeps.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { bytes_per_sec: 0 }
    }

    /// Creates a limiter from a signed setting; any non-positive value disables it.
    #[must_use]
    pub fn from_signed(limit: i64) -> Self {
        Self::new(u64::try_from(limit).unwrap_or(0))
    }

    /// Returns whether throttling is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.bytes_per_sec == 0
    }

    /// Returns the configured rate in bytes per second (0 when disabled).
    #[must_use]
    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Minimum time a read of `bytes` must take at this rate.
    #[must_use]
    pub fn expected_duration(&self, bytes: usize) -> Duration {
        if self.is_disabled() || bytes == 0 {
            return Duration::ZERO;
        }
        let nanos = (bytes as u128) * NANOS_PER_SEC / u128::from(self.bytes_per_sec);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Sleeps for whatever remains of the expected duration of a read of
    /// `bytes` that began at `started`.
    pub async fn pace(&self, bytes: usize, started: Instant) {
        let expected = self.expected_duration(bytes);
        let elapsed = started.elapsed();
        if elapsed < expected {
            let delay = expected - elapsed;
            trace!(bytes, delay_us = delay.as_micros(), "throttling stream");
            tokio::time::sleep(delay).await;
        }
    }

    /// Wraps a byte-chunk stream so every chunk is paced by this limiter.
    pub fn throttle<S>(&self, stream: S) -> ThrottledStream<S> {
        ThrottledStream {
            inner: stream,
            limiter: *self,
        }
    }
}

/// A chunk stream paced by a [`RateLimiter`].
#[derive(Debug)]
pub struct ThrottledStream<S> {
    inner: S,
    limiter: RateLimiter,
}

impl<S, B, E> ThrottledStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    /// Reads the next chunk, then sleeps as needed to hold the configured rate.
    ///
    /// Errors and end-of-stream are returned without delay.
    pub async fn next_chunk(&mut self) -> Option<Result<B, E>> {
        let started = Instant::now();
        let item = self.inner.next().await;
        if let Some(Ok(chunk)) = &item {
            self.limiter.pace(chunk.as_ref().len(), started).await;
        }
        item
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::stream;

    use super::*;

    fn chunks(count: usize, size: usize) -> impl Stream<Item = Result<Vec<u8>, ()>> + Unpin {
        stream::iter((0..count).map(move |_| Ok(vec![0u8; size])))
    }

    #[test]
    fn test_rate_limiter_expected_duration() {
        let limiter = RateLimiter::new(1000);
        assert_eq!(limiter.expected_duration(500), Duration::from_millis(500));
        assert_eq!(limiter.expected_duration(2000), Duration::from_secs(2));
        assert_eq!(limiter.expected_duration(0), Duration::ZERO);
    }

    #[test]
    fn test_rate_limiter_non_positive_disables() {
        assert!(RateLimiter::from_signed(0).is_disabled());
        assert!(RateLimiter::from_signed(-5).is_disabled());
        assert!(!RateLimiter::from_signed(10).is_disabled());
        assert_eq!(
            RateLimiter::disabled().expected_duration(1 << 30),
            Duration::ZERO
        );
    }

    #[test]
    fn test_rate_limiter_default_rate() {
        assert_eq!(
            RateLimiter::default().bytes_per_sec(),
            DEFAULT_RATE_LIMIT_BYTES_PER_SEC
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_stream_takes_at_least_n_over_l() {
        let limiter = RateLimiter::new(1024);
        let mut throttled = limiter.throttle(chunks(4, 512));

        let started = Instant::now();
        let mut total = 0;
        while let Some(chunk) = throttled.next_chunk().await {
            total += chunk.unwrap().len();
        }

        assert_eq!(total, 2048);
        assert!(
            started.elapsed() >= Duration::from_secs(2),
            "2048 bytes at 1024 B/s must take >= 2s, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_limiter_adds_no_delay() {
        let mut throttled = RateLimiter::disabled().throttle(chunks(8, 4096));

        let started = Instant::now();
        while throttled.next_chunk().await.is_some() {}

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_streams_throttle_independently() {
        // Two streams at L each finish in ~n/L, so together they move 2L.
        let limiter = RateLimiter::new(1000);
        let started = Instant::now();

        let a = tokio::spawn(async move {
            let mut s = limiter.throttle(chunks(2, 500));
            while s.next_chunk().await.is_some() {}
        });
        let b = tokio::spawn(async move {
            let mut s = limiter.throttle(chunks(2, 500));
            while s.next_chunk().await.is_some() {}
        });
        a.await.unwrap();
        b.await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "took {elapsed:?}");
        assert!(
            elapsed < Duration::from_secs(2),
            "streams should not share one budget, took {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_pass_through_without_delay() {
        let items: Vec<Result<Vec<u8>, &str>> = vec![Err("boom")];
        let mut throttled = RateLimiter::new(1).throttle(stream::iter(items));

        let started = Instant::now();
        assert!(matches!(throttled.next_chunk().await, Some(Err("boom"))));
        assert!(throttled.next_chunk().await.is_none());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
