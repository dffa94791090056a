//! Shared utilities for integration tests: range-aware mock servers and
//! deterministic test payloads.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Returns `len` bytes of a non-repeating-looking pattern, so misplaced
/// segments show up as content mismatches.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from((i * 31 + i / 251) % 256).unwrap_or(0))
        .collect()
}

/// Parses `bytes=<first>-[<last>]` into an inclusive range clipped to `len`.
fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let ranges = value.trim().strip_prefix("bytes=")?;
    let (first, last) = ranges.split_once('-')?;
    let first: u64 = first.trim().parse().ok()?;
    let last = match last.trim() {
        "" => len.checked_sub(1)?,
        raw => raw.parse::<u64>().ok()?.min(len.checked_sub(1)?),
    };
    (first <= last).then_some((first, last))
}

/// Serves a fixed body, honouring `Range` requests with 206 slices.
///
/// `truncate_after_first` drops the second half of every slice that does not
/// start at byte 0, simulating a server that closes segment connections early.
/// `overrun` appends that many junk bytes to every closed range (`bytes=a-b`),
/// simulating a server that ignores the requested end.
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    truncate_after_first: bool,
    overrun: usize,
    ranged_requests: Arc<AtomicUsize>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            truncate_after_first: false,
            overrun: 0,
            ranged_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[allow(dead_code)]
    pub fn truncating(body: Vec<u8>) -> Self {
        Self {
            truncate_after_first: true,
            ..Self::new(body)
        }
    }

    #[allow(dead_code)]
    pub fn overrunning(body: Vec<u8>, overrun: usize) -> Self {
        Self {
            overrun,
            ..Self::new(body)
        }
    }

    /// Counter of requests that carried a `Range` header.
    pub fn ranged_requests(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.ranged_requests)
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len() as u64;
        let Some(range) = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
        else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.to_vec());
        };
        self.ranged_requests.fetch_add(1, Ordering::SeqCst);

        let Some((first, last)) = parse_range(range, len) else {
            return ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{len}"));
        };

        let start = usize::try_from(first).unwrap_or(usize::MAX);
        let end = usize::try_from(last).unwrap_or(usize::MAX);
        let mut slice = self.body[start..=end].to_vec();
        if self.truncate_after_first && first > 0 {
            slice.truncate(slice.len() / 2);
        }
        if self.overrun > 0 && !range.trim_end().ends_with('-') {
            slice.extend(std::iter::repeat_n(0xEE, self.overrun));
        }

        ResponseTemplate::new(206)
            .insert_header("Content-Range", format!("bytes {first}-{last}/{len}"))
            .set_body_bytes(slice)
    }
}

/// Starts a server exposing `body` at `file_path` with range support.
///
/// Returns the server and the counter of ranged requests it received.
pub async fn range_server(file_path: &str, body: Vec<u8>) -> (MockServer, Arc<AtomicUsize>) {
    let server = MockServer::start().await;
    let responder = RangeResponder::new(body);
    let counter = responder.ranged_requests();
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(responder)
        .mount(&server)
        .await;
    (server, counter)
}

/// An rclone-style `/vfs/stats` answer reporting `bytes_used`.
#[allow(dead_code)]
pub fn vfs_stats(bytes_used: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "diskCache": {
            "bytesUsed": bytes_used,
            "erroredFiles": 0,
            "files": 3,
            "uploadsInProgress": 1,
            "uploadsQueued": 0
        },
        "fs": "remote:",
        "inUse": 1
    }))
}
