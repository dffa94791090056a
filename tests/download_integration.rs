//! Integration tests for the download module.
//!
//! These tests verify the full probe, segment and join flow against mock
//! HTTP servers.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use segfetch_core::download::{
    DownloadError, DownloadMode, DownloadTask, Downloader, HttpClient, ProgressSink, RateLimiter,
};
use support::{RangeResponder, payload, range_server};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MIB: usize = 1024 * 1024;

fn downloader() -> Downloader {
    Downloader::new(HttpClient::new(), RateLimiter::disabled())
}

#[derive(Debug, Default)]
struct CountingSink {
    total: AtomicU64,
    added: AtomicU64,
    finished: AtomicBool,
}

impl ProgressSink for CountingSink {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn add(&self, delta: u64) {
        self.added.fetch_add(delta, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_segmented_download_reassembles_exact_content() {
    let content = payload(3 * MIB + 7);
    let (server, ranged) = range_server("/big.bin", content.clone()).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let sink = Arc::new(CountingSink::default());

    let task = DownloadTask::new(format!("{}/big.bin", server.uri()), temp_dir.path(), "big.bin")
        .with_thread_count(4)
        .with_progress(Arc::clone(&sink) as Arc<dyn ProgressSink>);
    let report = downloader().download(&task).await.expect("download succeeds");

    assert_eq!(report.mode, DownloadMode::Segmented { segments: 4 });
    assert_eq!(report.bytes, content.len() as u64);
    let written = std::fs::read(task.staging_path()).expect("should read file");
    assert_eq!(written.len(), content.len());
    assert!(written == content, "segments were reassembled out of place");

    // One probe plus one request per segment.
    assert_eq!(ranged.load(Ordering::SeqCst), 5);
    assert_eq!(sink.total.load(Ordering::SeqCst), content.len() as u64);
    assert_eq!(sink.added.load(Ordering::SeqCst), content.len() as u64);
    assert!(sink.finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_segmented_download_with_many_threads() {
    let content = payload(2 * MIB + 3);
    let (server, ranged) = range_server("/many.bin", content.clone()).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let task = DownloadTask::new(format!("{}/many.bin", server.uri()), temp_dir.path(), "many.bin")
        .with_thread_count(16);
    let report = downloader().download(&task).await.expect("download succeeds");

    assert_eq!(report.mode, DownloadMode::Segmented { segments: 16 });
    assert_eq!(ranged.load(Ordering::SeqCst), 17);
    assert!(std::fs::read(task.staging_path()).expect("read") == content);
}

#[tokio::test]
async fn test_server_without_range_support_streams_once() {
    let content = payload(2 * MIB);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/norange.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let task = DownloadTask::new(
        format!("{}/norange.bin", server.uri()),
        temp_dir.path(),
        "norange.bin",
    )
    .with_thread_count(8);
    let report = downloader().download(&task).await.expect("download succeeds");

    assert_eq!(report.mode, DownloadMode::SingleStream);
    assert!(std::fs::read(task.staging_path()).expect("read") == content);
}

#[tokio::test]
async fn test_small_file_is_not_split() {
    let content = payload(64 * 1024);
    let (server, ranged) = range_server("/small.bin", content.clone()).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let task = DownloadTask::new(format!("{}/small.bin", server.uri()), temp_dir.path(), "small.bin")
        .with_thread_count(4);
    let report = downloader().download(&task).await.expect("download succeeds");

    assert_eq!(report.mode, DownloadMode::SingleStream);
    assert_eq!(ranged.load(Ordering::SeqCst), 1, "probe body must be reused");
    assert_eq!(std::fs::read(task.staging_path()).expect("read"), content);
}

#[tokio::test]
async fn test_truncated_segment_reports_short_read() {
    let content = payload(2 * MIB);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(RangeResponder::truncating(content))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let task = DownloadTask::new(format!("{}/flaky.bin", server.uri()), temp_dir.path(), "flaky.bin")
        .with_thread_count(4);
    let result = downloader().download(&task).await;

    match result {
        Err(DownloadError::ShortRead {
            received, expected, ..
        }) => assert!(received < expected),
        other => panic!("expected ShortRead, got {other:?}"),
    }
}

#[tokio::test]
async fn test_download_404_returns_http_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    for threads in [1, 4] {
        let task = DownloadTask::new(
            format!("{}/missing.bin", server.uri()),
            temp_dir.path(),
            "missing.bin",
        )
        .with_thread_count(threads);
        let result = downloader().download(&task).await;

        assert!(
            matches!(result, Err(DownloadError::HttpStatus { status: 404, .. })),
            "threads={threads}: {result:?}"
        );
    }
}

#[tokio::test]
async fn test_extra_headers_reach_every_request() {
    let content = payload(2 * MIB);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private.bin"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(RangeResponder::new(content.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private.bin"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_static("Bearer secret"),
    );
    let task = DownloadTask::new(
        format!("{}/private.bin", server.uri()),
        temp_dir.path(),
        "private.bin",
    )
    .with_headers(headers)
    .with_thread_count(4);
    let report = downloader().download(&task).await.expect("download succeeds");

    assert_eq!(report.mode, DownloadMode::Segmented { segments: 4 });
    assert!(std::fs::read(task.staging_path()).expect("read") == content);
}

#[tokio::test]
async fn test_overlong_segment_responses_are_clipped() {
    let content = payload(3 * MIB);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/overrun.bin"))
        .respond_with(RangeResponder::overrunning(content.clone(), 4096))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let sink = Arc::new(CountingSink::default());

    let task = DownloadTask::new(
        format!("{}/overrun.bin", server.uri()),
        temp_dir.path(),
        "overrun.bin",
    )
    .with_thread_count(4)
    .with_progress(Arc::clone(&sink) as Arc<dyn ProgressSink>);
    let report = downloader().download(&task).await.expect("download succeeds");

    assert_eq!(report.mode, DownloadMode::Segmented { segments: 4 });
    assert_eq!(report.bytes, content.len() as u64);
    let written = std::fs::read(task.staging_path()).expect("should read file");
    assert_eq!(written.len(), content.len());
    assert!(written == content, "bytes past a segment end overwrote its neighbour");
    assert_eq!(sink.added.load(Ordering::SeqCst), content.len() as u64);
}
