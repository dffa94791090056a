//! Range probe that decides between segmented and single-stream downloads.

use reqwest::{Response, StatusCode};
use tokio::fs::File;
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, partial_total_length, range_header};
use super::constants::MAX_THREAD_COUNT;
use super::error::DownloadError;
use super::segment::{Segment, SegmentPlan, plan_segments};
use super::task::DownloadTask;

/// Result of probing a task's URL.
#[derive(Debug)]
pub(crate) enum Initialized {
    /// The destination was created at full size; download these segments into it.
    Segmented {
        content_length: u64,
        segments: Vec<Segment>,
    },
    /// Stream this response body into the destination.
    ///
    /// Produced when the server ignores ranges (200), does not report a
    /// length, or the file is too small to split. The body is the full
    /// entity, so it is consumed exactly once.
    SingleStream(Response),
}

/// Probes `task`'s URL with `Range: bytes=0-` and prepares the destination.
///
/// # Errors
///
/// - [`DownloadError::HttpStatus`] for a non-2xx probe answer
/// - [`DownloadError::UnexpectedStatus`] for a 2xx answer other than 200/206
/// - [`DownloadError::Io`] when the destination cannot be created or sized
/// - transport errors from [`HttpClient`]
#[instrument(level = "debug", skip(client, task), fields(url = %task.url()))]
pub(crate) async fn initialize(
    client: &HttpClient,
    task: &DownloadTask,
) -> Result<Initialized, DownloadError> {
    let url = task.url();
    let response = client
        .get(url, task.headers(), Some(&range_header(0, None)))
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::http_status(url, status.as_u16()));
    }
    if status == StatusCode::OK {
        info!("server does not support ranges, using a single stream");
        return Ok(Initialized::SingleStream(response));
    }
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::unexpected_status(url, status.as_u16()));
    }

    let Some(content_length) = partial_total_length(&response) else {
        warn!("partial response without a length, using a single stream");
        return Ok(Initialized::SingleStream(response));
    };

    match plan_segments(content_length, task.thread_count().min(MAX_THREAD_COUNT)) {
        SegmentPlan::Single => {
            debug!(content_length, "file too small to split");
            Ok(Initialized::SingleStream(response))
        }
        SegmentPlan::Segmented(segments) => {
            // The probe body is not needed once the layout is known.
            drop(response);
            preallocate(task, content_length).await?;
            debug!(content_length, segments = segments.len(), "segmented layout");
            Ok(Initialized::Segmented {
                content_length,
                segments,
            })
        }
    }
}

/// Creates (or truncates) the destination and sizes it to `content_length`.
async fn preallocate(task: &DownloadTask, content_length: u64) -> Result<(), DownloadError> {
    let path = task.staging_path();
    let file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.set_len(content_length)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn probe(
        server: &MockServer,
        template: ResponseTemplate,
        threads: usize,
    ) -> (TempDir, DownloadTask, Result<Initialized, DownloadError>) {
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .and(header("Range", "bytes=0-"))
            .respond_with(template)
            .mount(server)
            .await;

        let dir = TempDir::new().unwrap();
        let task = DownloadTask::new(format!("{}/file.bin", server.uri()), dir.path(), "file.bin")
            .with_thread_count(threads);
        let result = initialize(&HttpClient::new(), &task).await;
        (dir, task, result)
    }

    #[tokio::test]
    async fn test_initialize_partial_content_preallocates_destination() {
        let server = MockServer::start().await;
        let template = ResponseTemplate::new(206)
            .insert_header("Content-Range", "bytes 0-9999999/10000000")
            .set_body_bytes(vec![0u8; 16]);

        let (_dir, task, result) = probe(&server, template, 4).await;

        match result.unwrap() {
            Initialized::Segmented {
                content_length,
                segments,
            } => {
                assert_eq!(content_length, 10_000_000);
                assert_eq!(segments.len(), 4);
            }
            Initialized::SingleStream(_) => panic!("expected segmented layout"),
        }
        let metadata = std::fs::metadata(task.staging_path()).unwrap();
        assert_eq!(metadata.len(), 10_000_000);
    }

    #[tokio::test]
    async fn test_initialize_ok_status_falls_back_without_creating_file() {
        let server = MockServer::start().await;
        let template = ResponseTemplate::new(200).set_body_bytes(b"whole body".to_vec());

        let (_dir, task, result) = probe(&server, template, 4).await;

        assert!(matches!(result.unwrap(), Initialized::SingleStream(_)));
        assert!(!task.staging_path().exists());
    }

    #[tokio::test]
    async fn test_initialize_small_partial_content_is_single_stream() {
        let server = MockServer::start().await;
        let template = ResponseTemplate::new(206)
            .insert_header("Content-Range", "bytes 0-511/512")
            .set_body_bytes(vec![7u8; 512]);

        let (_dir, _task, result) = probe(&server, template, 8).await;

        assert!(matches!(result.unwrap(), Initialized::SingleStream(_)));
    }

    #[tokio::test]
    async fn test_initialize_not_found_is_http_status() {
        let server = MockServer::start().await;
        let (_dir, task, result) = probe(&server, ResponseTemplate::new(404), 4).await;

        match result {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected HttpStatus, got {other:?}"),
        }
        assert!(!task.staging_path().exists());
    }

    #[tokio::test]
    async fn test_initialize_no_content_is_unexpected() {
        let server = MockServer::start().await;
        let (_dir, _task, result) = probe(&server, ResponseTemplate::new(204), 4).await;

        assert!(matches!(
            result,
            Err(DownloadError::UnexpectedStatus { status: 204, .. })
        ));
    }
}
