//! HTTP client wrapper for range and streaming downloads.
//!
//! This module provides the [`HttpClient`] struct: one typed, cloneable handle
//! over a connection-pooled `reqwest` client. Clones share the pool, so a
//! single client is built per process and handed to every task and segment.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use super::constants::CONNECT_TIMEOUT_SECS;
use super::error::DownloadError;
use crate::user_agent;

/// HTTP client for downloading files with range support.
///
/// The client applies a connect timeout but no whole-request timeout: large
/// transfers are bounded by the owning task's deadline instead.
///
/// # Example
///
/// ```no_run
/// use segfetch_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let size = client
///     .remote_content_length("https://example.com/archive.zip", &Default::default())
///     .await?;
/// println!("remote size: {size:?}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with the default connect timeout (30 seconds).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_connect_timeout(CONNECT_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with an explicit connect timeout.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_connect_timeout(connect_timeout_secs: u64) -> Self {
        Self::try_with_connect_timeout(connect_timeout_secs)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Fallible variant of [`with_connect_timeout`](Self::with_connect_timeout).
    ///
    /// # Errors
    ///
    /// Returns the builder error when TLS or system proxy setup fails.
    #[instrument(level = "debug")]
    pub fn try_with_connect_timeout(connect_timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .user_agent(user_agent::default_download_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an already configured `reqwest` client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Sends a GET request with the task headers and an optional `Range` header.
    ///
    /// The response status is not checked; callers decide what a status means.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for unparsable URLs and
    /// [`DownloadError::Network`]/[`DownloadError::Timeout`] for transport failures.
    pub(crate) async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        range: Option<&str>,
    ) -> Result<Response, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let mut request = self.client.get(url).headers(headers.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        request
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))
    }

    /// Looks up the remote size with a HEAD request.
    ///
    /// Returns `Ok(None)` when the server does not report a length.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::HttpStatus`] for non-success responses and
    /// transport errors as for downloads.
    #[instrument(skip(self, headers), fields(url = %url))]
    pub async fn remote_content_length(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<Option<u64>, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .head(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        ensure_success(url, &response)?;

        let length = header_u64(&response, CONTENT_LENGTH);
        debug!(?length, "remote content length");
        Ok(length)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Formats a `Range` header value; `end` is inclusive, `None` means open-ended.
#[must_use]
pub(crate) fn range_header(begin: u64, end: Option<u64>) -> String {
    match end {
        Some(end) => format!("bytes={begin}-{end}"),
        None => format!("bytes={begin}-"),
    }
}

/// Fails with [`DownloadError::HttpStatus`] unless the response is 2xx.
pub(crate) fn ensure_success(url: &str, response: &Response) -> Result<(), DownloadError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(DownloadError::http_status(url, status.as_u16()))
    }
}

/// Total entity length of a 206 response.
///
/// Prefers the `/total` of `Content-Range`, falling back to `Content-Length`
/// (which equals the total for an open-ended `bytes=0-` request).
pub(crate) fn partial_total_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
        .or_else(|| header_u64(response, CONTENT_LENGTH))
        .or_else(|| response.content_length())
}

/// Parses the total from `bytes <first>-<last>/<total>`; `*` yields `None`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (unit, rest) = value.trim().split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let (_, total) = rest.split_once('/')?;
    total.trim().parse().ok()
}

fn header_u64(response: &Response, name: reqwest::header::HeaderName) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
