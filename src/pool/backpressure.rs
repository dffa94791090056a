//! Relocation gate driven by the occupancy of a downstream disk cache.
//!
//! Before a finished download is moved to its final path, the gate samples
//! the cache through a [`CacheMonitor`]. Above the pause threshold it polls at
//! a fixed interval until usage falls below the lower resume threshold; the
//! gap between the two avoids flapping around a single limit.
//!
//! Probe failures are never fatal: they are logged and the probe is retried
//! after a fixed interval, for as long as it takes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use super::PoolError;
use crate::download::HttpClient;

/// Default rclone remote-control endpoint for VFS statistics.
pub const DEFAULT_CACHE_ENDPOINT: &str = "http://127.0.0.1:5572/vfs/stats";

const GIB: u64 = 1024 * 1024 * 1024;

/// Default pause threshold (18 GiB).
pub const DEFAULT_PAUSE_THRESHOLD: u64 = 18 * GIB;

/// Default resume threshold (15 GiB).
pub const DEFAULT_RESUME_THRESHOLD: u64 = 15 * GIB;

/// Default interval between samples while paused.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default delay before retrying a failed probe.
pub const DEFAULT_PROBE_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Error sampling the cache. Always treated as transient.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The endpoint could not be reached.
    #[error("cache endpoint {endpoint} unreachable: {source}")]
    Unreachable {
        /// Probed endpoint.
        endpoint: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status.
    #[error("cache endpoint {endpoint} returned HTTP {status}")]
    Status {
        /// Probed endpoint.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// The answer did not carry `diskCache.bytesUsed`.
    #[error("malformed answer from cache endpoint {endpoint}: {reason}")]
    Malformed {
        /// Probed endpoint.
        endpoint: String,
        /// What was wrong with the body.
        reason: String,
    },
}

/// Source of cache occupancy samples.
#[async_trait]
pub trait CacheMonitor: Send + Sync {
    /// Returns the bytes currently held by the cache.
    async fn bytes_used(&self) -> Result<u64, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct VfsStats {
    #[serde(rename = "diskCache")]
    disk_cache: DiskCache,
}

#[derive(Debug, Deserialize)]
struct DiskCache {
    #[serde(rename = "bytesUsed")]
    bytes_used: u64,
}

/// Samples an rclone VFS cache through its remote-control API.
///
/// Sends `POST <endpoint>` with an empty JSON object and reads
/// `diskCache.bytesUsed` from the answer.
#[derive(Debug, Clone)]
pub struct RcloneVfsMonitor {
    client: reqwest::Client,
    endpoint: String,
}

impl RcloneVfsMonitor {
    /// Creates a monitor for `endpoint`, reusing `client`'s connection pool.
    #[must_use]
    pub fn new(client: &HttpClient, endpoint: impl Into<String>) -> Self {
        Self {
            client: client.inner().clone(),
            endpoint: endpoint.into(),
        }
    }

    /// Probed endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CacheMonitor for RcloneVfsMonitor {
    #[instrument(level = "debug", skip(self), fields(endpoint = %self.endpoint))]
    async fn bytes_used(&self) -> Result<u64, ProbeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|source| ProbeError::Unreachable {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| ProbeError::Unreachable {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        let stats: VfsStats =
            serde_json::from_str(&body).map_err(|e| ProbeError::Malformed {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;
        Ok(stats.disk_cache.bytes_used)
    }
}

/// Thresholds and intervals of a [`BackpressureGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    /// Usage (bytes) above which relocation pauses.
    pub pause_threshold: u64,
    /// Usage (bytes) below which a paused relocation resumes.
    pub resume_threshold: u64,
    /// Interval between samples while paused.
    pub poll_interval: Duration,
    /// Delay before retrying a failed probe.
    pub probe_retry_interval: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            pause_threshold: DEFAULT_PAUSE_THRESHOLD,
            resume_threshold: DEFAULT_RESUME_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_retry_interval: DEFAULT_PROBE_RETRY_INTERVAL,
        }
    }
}

impl GateConfig {
    /// Checks that the resume threshold lies below the pause threshold.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidThresholds`] otherwise.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.resume_threshold >= self.pause_threshold {
            return Err(PoolError::InvalidThresholds {
                pause: self.pause_threshold,
                resume: self.resume_threshold,
            });
        }
        Ok(())
    }
}

/// Blocks relocations while the downstream cache is too full.
///
/// Every waiting task polls on its own; concurrent waiters do not share
/// samples.
#[derive(Clone)]
pub struct BackpressureGate {
    monitor: Arc<dyn CacheMonitor>,
    config: GateConfig,
}

impl fmt::Debug for BackpressureGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackpressureGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BackpressureGate {
    /// Creates a gate sampling `monitor`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidThresholds`] if the resume threshold is
    /// not below the pause threshold.
    pub fn new(monitor: Arc<dyn CacheMonitor>, config: GateConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self { monitor, config })
    }

    /// Gate thresholds and intervals.
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Waits until relocation may proceed.
    ///
    /// Returns the number of successful samples taken.
    pub async fn wait(&self) -> u32 {
        let mut samples = 0u32;
        loop {
            match self.monitor.bytes_used().await {
                Ok(used) => {
                    samples += 1;
                    if used <= self.config.pause_threshold {
                        debug!(used_bytes = used, "cache below pause threshold");
                        return samples;
                    }
                    warn!(
                        used_gib = gib(used),
                        pause_gib = gib(self.config.pause_threshold),
                        "cache above pause threshold, holding relocation"
                    );
                    samples += self.wait_for_drain().await;
                    return samples;
                }
                Err(e) => {
                    error!(error = %e, "cache probe failed, retrying");
                    tokio::time::sleep(self.config.probe_retry_interval).await;
                }
            }
        }
    }

    async fn wait_for_drain(&self) -> u32 {
        let mut samples = 0u32;
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            match self.monitor.bytes_used().await {
                Ok(used) => {
                    samples += 1;
                    if used < self.config.resume_threshold {
                        info!(used_gib = gib(used), "cache drained, resuming relocation");
                        return samples;
                    }
                    debug!(used_gib = gib(used), "cache still above resume threshold");
                }
                Err(e) => error!(error = %e, "cache probe failed while paused"),
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}
