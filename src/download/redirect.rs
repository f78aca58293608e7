//! HTTP GET with explicit, bounded redirect following.
//!
//! The underlying reqwest client never follows redirects itself. Instead
//! [`RedirectResolver::fetch`] runs a loop with a hop counter so the bound is a
//! plain parameter, and so caller headers (`Range`, `Referer`, `User-Agent`)
//! are re-sent unchanged on every hop.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, LOCATION, RANGE};
use reqwest::{Client, StatusCode, redirect};
use tracing::{debug, instrument};
use url::Url;

use super::TransferError;
use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_MAX_REDIRECTS, READ_TIMEOUT_SECS};
use crate::user_agent;

/// Boxed body stream handed to the progress meter.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Follows redirect chains up to a fixed number of hops.
#[derive(Debug, Clone)]
pub struct RedirectResolver {
    client: Client,
    max_redirects: usize,
}

/// First non-redirect response of a chain, body not yet read.
#[derive(Debug)]
pub struct FetchedResponse {
    response: reqwest::Response,
    final_url: Url,
    hops: usize,
}

impl RedirectResolver {
    /// Creates a resolver with default timeouts and redirect bound.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialize.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_settings(
            DEFAULT_MAX_REDIRECTS,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a resolver with an explicit redirect bound and timeouts.
    ///
    /// The read timeout applies per read, not to the whole transfer, so long
    /// segments are not cut off.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialize.
    pub fn with_settings(
        max_redirects: usize,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .redirect(redirect::Policy::none())
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self {
            client,
            max_redirects,
        })
    }

    /// Returns the configured redirect bound.
    #[must_use]
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// Issues a GET for `url` with `headers`, following redirects.
    ///
    /// # Errors
    ///
    /// - [`TransferError::InvalidUrl`] for unparsable or non-HTTP(S) URLs
    /// - [`TransferError::Network`] / [`TransferError::Timeout`] on transport failure,
    ///   with the URL of the failing hop
    /// - [`TransferError::TooManyRedirects`] when the chain exceeds the bound
    /// - [`TransferError::Protocol`] for a redirect without a usable `Location`
    /// - [`TransferError::HttpStatus`] for a 4xx/5xx final response, except a
    ///   `416` to a request carrying `Range`, which is returned for the caller
    ///   to judge
    #[instrument(skip(self, headers), fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<FetchedResponse, TransferError> {
        let mut current = parse_http_url(url)?;
        let mut hops = 0usize;

        loop {
            debug!(url = %current, hop = hops, "sending GET");
            let response = self
                .client
                .get(current.clone())
                .headers(headers.clone())
                .send()
                .await
                .map_err(|e| TransferError::network(current.as_str(), e))?;

            let status = response.status();
            if is_followable_redirect(status) {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        TransferError::protocol(
                            current.as_str(),
                            format!("HTTP {} without Location header", status.as_u16()),
                        )
                    })?;
                let next = current.join(location).map_err(|_| {
                    TransferError::protocol(
                        current.as_str(),
                        format!("unresolvable Location header: {location}"),
                    )
                })?;

                if hops >= self.max_redirects {
                    return Err(TransferError::too_many_redirects(url, self.max_redirects));
                }
                hops += 1;
                debug!(
                    from = %current,
                    to = %next,
                    status = status.as_u16(),
                    hop = hops,
                    "following redirect"
                );
                current = next;
                continue;
            }

            let unsatisfiable_range =
                status == StatusCode::RANGE_NOT_SATISFIABLE && headers.contains_key(RANGE);
            if !status.is_success() && !unsatisfiable_range {
                return Err(TransferError::http_status(current.as_str(), status.as_u16()));
            }

            debug!(url = %current, status = status.as_u16(), hops, "response received");
            return Ok(FetchedResponse {
                response,
                final_url: current,
                hops,
            });
        }
    }
}

fn parse_http_url(url: &str) -> Result<Url, TransferError> {
    let parsed = Url::parse(url).map_err(|_| TransferError::invalid_url(url))?;
    if matches!(parsed.scheme(), "http" | "https") {
        Ok(parsed)
    } else {
        Err(TransferError::invalid_url(url))
    }
}

fn is_followable_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

impl FetchedResponse {
    /// Status of the final response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// URL that produced the final response.
    #[must_use]
    pub fn final_url(&self) -> &Url {
        &self.final_url
    }

    /// Number of redirects followed.
    #[must_use]
    pub fn hops(&self) -> usize {
        self.hops
    }

    /// Returns true for `206 Partial Content`.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.status() == StatusCode::PARTIAL_CONTENT
    }

    /// Returns true for `416 Range Not Satisfiable`.
    #[must_use]
    pub fn is_range_not_satisfiable(&self) -> bool {
        self.status() == StatusCode::RANGE_NOT_SATISFIABLE
    }

    /// Resource size from a `416` answer's `Content-Range: bytes */<total>`.
    #[must_use]
    pub fn unsatisfied_range_total(&self) -> Option<u64> {
        let raw = self.response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
        parse_unsatisfied_range(raw)
    }

    /// Declared body length from `Content-Length`; `None` when absent or invalid.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Parsed `Content-Range: bytes <start>-<end>/<total>`; total is `None` for `*`.
    #[must_use]
    pub fn content_range(&self) -> Option<(u64, Option<u64>)> {
        let raw = self.response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
        parse_content_range(raw)
    }

    /// Size of the whole resource given the offset this response starts at.
    ///
    /// For a partial response the `Content-Range` total wins; otherwise the
    /// body length is added to `offset`. A full response ignores `offset`.
    #[must_use]
    pub fn total_length(&self, offset: u64) -> Option<u64> {
        if self.is_partial() {
            if let Some((_, Some(total))) = self.content_range() {
                return Some(total);
            }
            self.content_length()
                .map(|remaining| offset.saturating_add(remaining))
        } else {
            self.content_length()
        }
    }

    /// Consumes the response into its body stream.
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        Box::pin(self.response.bytes_stream())
    }
}

fn parse_content_range(raw: &str) -> Option<(u64, Option<u64>)> {
    let spec = raw.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = spec.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let total = match total.trim() {
        "*" => None,
        value => Some(value.parse::<u64>().ok()?),
    };
    Some((start, total))
}

fn parse_unsatisfied_range(raw: &str) -> Option<u64> {
    let total = raw.trim().strip_prefix("bytes")?.trim_start().strip_prefix("*/")?;
    total.trim().parse::<u64>().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::ErrorKind;
    use crate::test_support::socket_guard::{
        should_skip_socket_bound_test, start_mock_server_or_skip,
    };
    use reqwest::header::{HeaderValue, RANGE, REFERER};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn test_parse_content_range_variants() {
        assert_eq!(parse_content_range("bytes 100-199/200"), Some((100, Some(200))));
        assert_eq!(parse_content_range("bytes 0-9/*"), Some((0, None)));
        assert_eq!(parse_content_range("bytes */200"), None);
        assert_eq!(parse_content_range("items 0-9/10"), None);
    }

    #[test]
    fn test_parse_unsatisfied_range() {
        assert_eq!(parse_unsatisfied_range("bytes */1000"), Some(1000));
        assert_eq!(parse_unsatisfied_range("bytes 0-9/10"), None);
        assert_eq!(parse_unsatisfied_range("bytes */*"), None);
    }

    #[test]
    fn test_followable_redirect_codes() {
        assert!(is_followable_redirect(StatusCode::FOUND));
        assert!(is_followable_redirect(StatusCode::MOVED_PERMANENTLY));
        assert!(is_followable_redirect(StatusCode::TEMPORARY_REDIRECT));
        assert!(!is_followable_redirect(StatusCode::NOT_MODIFIED));
        assert!(!is_followable_redirect(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http_scheme() {
        let resolver = RedirectResolver::new().unwrap();
        let err = resolver
            .fetch("ftp://example.com/seg.flv", &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_fetch_follows_relative_302_and_keeps_headers() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/cdn/seg.flv"))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cdn/seg.flv"))
            .and(header("Range", "bytes=4-"))
            .and(header("Referer", "https://www.example.com/video/1"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 4-9/10")
                    .set_body_bytes(b"456789".to_vec()),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=4-"));
        headers.insert(
            REFERER,
            HeaderValue::from_static("https://www.example.com/video/1"),
        );

        let resolver = RedirectResolver::new().unwrap();
        let fetched = resolver
            .fetch(&format!("{}/start", mock_server.uri()), &headers)
            .await
            .unwrap();

        assert_eq!(fetched.hops(), 1);
        assert!(fetched.is_partial());
        assert_eq!(fetched.final_url().path(), "/cdn/seg.flv");
        assert_eq!(fetched.content_range(), Some((4, Some(10))));
        assert_eq!(fetched.total_length(4), Some(10));
    }

    #[tokio::test]
    async fn test_fetch_redirect_loop_hits_bound() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            // Initial request plus two permitted hops.
            .expect(3)
            .mount(&mock_server)
            .await;

        let resolver =
            RedirectResolver::with_settings(2, Duration::from_secs(5), Duration::from_secs(5))
                .unwrap();
        let err = resolver
            .fetch(&format!("{}/loop", mock_server.uri()), &HeaderMap::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TooManyRedirects);
        assert!(matches!(err, TransferError::TooManyRedirects { limit: 2, .. }));
    }

    #[tokio::test]
    async fn test_fetch_redirect_without_location_is_protocol_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/bare"))
            .respond_with(ResponseTemplate::new(302))
            .mount(&mock_server)
            .await;

        let resolver = RedirectResolver::new().unwrap();
        let err = resolver
            .fetch(&format!("{}/bare", mock_server.uri()), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_fetch_404_is_http_status_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/missing.flv"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let resolver = RedirectResolver::new().unwrap();
        let err = resolver
            .fetch(&format!("{}/missing.flv", mock_server.uri()), &HeaderMap::new())
            .await
            .unwrap_err();
        match err {
            TransferError::HttpStatus { status, .. } => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_416_passes_through_only_for_ranged_requests() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/done.flv"))
            .respond_with(ResponseTemplate::new(416).insert_header("Content-Range", "bytes */10"))
            .mount(&mock_server)
            .await;
        let url = format!("{}/done.flv", mock_server.uri());
        let resolver = RedirectResolver::new().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=10-"));
        let fetched = resolver.fetch(&url, &headers).await.unwrap();
        assert!(fetched.is_range_not_satisfiable());
        assert_eq!(fetched.unsatisfied_range_total(), Some(10));

        let err = resolver.fetch(&url, &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, TransferError::HttpStatus { status: 416, .. }));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_network_error_with_url() {
        if should_skip_socket_bound_test() {
            return;
        }
        // Bind then drop a listener to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{port}/seg.flv");

        let resolver = RedirectResolver::new().unwrap();
        let err = resolver.fetch(&url, &HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains(&url), "got: {err}");
    }
}
