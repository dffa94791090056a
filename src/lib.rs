//! Segfetch Core Library
//!
//! This library downloads large remote files by splitting them into byte
//! ranges fetched concurrently, while a bounded worker pool limits how many
//! whole-file downloads run at once and holds back final placement while a
//! downstream disk cache is too full.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - range probing, segment partitioning, segment writers,
//!   per-stream rate limiting and single-task orchestration
//! - [`pool`] - admission-controlled worker pool, cache backpressure gate
//!   and staging-to-final relocation
//! - [`ledger`] - retry ledger fed by task failure hooks

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod ledger;
pub mod pool;
mod user_agent;

// Re-export commonly used types
pub use download::{
    DownloadError, DownloadReport, DownloadTask, Downloader, HttpClient, ProgressSink,
    RateLimiter,
};
pub use ledger::{FailedTask, FailureLedger};
pub use pool::{
    BackpressureGate, GateConfig, PoolConfig, PoolError, PoolStats, RcloneVfsMonitor, WorkerPool,
};
