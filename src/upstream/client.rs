//! Shared HTTP client for upstream catalog calls and stream probes.
//!
//! One [`ApiClient`] is created per process and cloned into source adapters
//! and the stream resolver, taking advantage of reqwest's connection pooling.
//! All requests carry the configured `User-Agent` and a 30-second deadline.

use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, RANGE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::error::UpstreamError;
use super::rate_limiter::parse_retry_after;
use crate::model::SourceId;

/// Default connect timeout for upstream requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default overall deadline for upstream requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Descriptive User-Agent built from the package identity, used when no
/// override is configured.
#[must_use]
pub fn default_user_agent() -> String {
    format!(
        "{}/{} (+https://github.com/fierce/harmonia)",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

/// Headers of interest from a ranged stream probe.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Response status code.
    pub status: u16,
    /// `Content-Type` header value, if present.
    pub content_type: Option<String>,
    /// `Cache-Control` header value, if present.
    pub cache_control: Option<String>,
    /// `Expires` header value, if present.
    pub expires: Option<String>,
}

/// HTTP client wrapper for upstream JSON APIs and stream-URL probes.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new(&default_user_agent())
    }
}

impl ApiClient {
    /// Creates a client with default timeouts and the given User-Agent.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    /// This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(user_agent: &str) -> Self {
        Self::with_timeouts(user_agent, CONNECT_TIMEOUT, REQUEST_TIMEOUT)
    }

    /// Creates a client with explicit timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the supplied
    /// configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_timeouts(user_agent: &str, connect: Duration, total: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect)
            .timeout(total)
            .gzip(true)
            .user_agent(user_agent)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Issues a GET on behalf of `source` and deserializes the JSON body.
    ///
    /// # Errors
    ///
    /// - `Network` / `Timeout` on transport failure
    /// - `HttpStatus` (with parsed `Retry-After`) on non-2xx responses
    /// - `MalformedPayload` when the body does not match the source's schema
    #[instrument(skip(self), fields(source = %source, url = %url))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source: SourceId,
        url: &str,
    ) -> Result<T, UpstreamError> {
        let response = self.send_get(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::network(url, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            debug!(url, error = %e, "response body did not match schema");
            UpstreamError::malformed(source, e.to_string())
        })
    }

    /// Issues a two-byte ranged GET against a candidate stream URL and
    /// returns the headers needed to judge it.
    ///
    /// # Errors
    ///
    /// - `Network` / `Timeout` on transport failure
    /// - `HttpStatus` with `Retry-After` on 429 (so the retry wrapper can
    ///   honor the hint); all other statuses are returned in the outcome for
    ///   the resolver to classify
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe_range(&self, url: &str) -> Result<ProbeOutcome, UpstreamError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-1")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::timeout(url)
                } else {
                    UpstreamError::network(url, e)
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = header_str(&response, RETRY_AFTER).and_then(|v| parse_retry_after(&v));
            return Err(UpstreamError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        Ok(ProbeOutcome {
            status: status.as_u16(),
            content_type: header_str(&response, CONTENT_TYPE),
            cache_control: header_str(&response, CACHE_CONTROL),
            expires: header_str(&response, EXPIRES),
        })
    }

    async fn send_get(&self, url: &str) -> Result<reqwest::Response, UpstreamError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::timeout(url)
            } else {
                UpstreamError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = header_str(&response, RETRY_AFTER).and_then(|v| parse_retry_after(&v));
            return Err(UpstreamError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }
        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, serde::Deserialize)]
    struct Payload {
        value: u32,
    }

    #[test]
    fn test_default_user_agent_identifies_tool() {
        let ua = default_user_agent();
        assert!(ua.contains("harmonia"));
        assert!(ua.contains(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_get_json_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": 7})))
            .mount(&server)
            .await;

        let client = ApiClient::default();
        let url = format!("{}/data", server.uri());
        let payload: Payload = client.get_json(SourceId::Jamendo, &url).await.unwrap();
        assert_eq!(payload.value, 7);
    }

    #[tokio::test]
    async fn test_get_json_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(header("user-agent", default_user_agent()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": 1})))
            .mount(&server)
            .await;

        let client = ApiClient::default();
        let url = format!("{}/data", server.uri());
        let result: Result<Payload, _> = client.get_json(SourceId::Jamendo, &url).await;
        assert!(result.is_ok(), "expected UA to be sent: {result:?}");
    }

    #[tokio::test]
    async fn test_get_json_maps_status_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;

        let client = ApiClient::default();
        let url = format!("{}/data", server.uri());
        let result: Result<Payload, _> = client.get_json(SourceId::Jamendo, &url).await;

        match result {
            Err(UpstreamError::HttpStatus {
                status: 429,
                retry_after,
                ..
            }) => assert_eq!(retry_after, Some(Duration::from_secs(3))),
            other => panic!("expected HttpStatus 429, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_json_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ApiClient::default();
        let url = format!("{}/data", server.uri());
        let result: Result<Payload, _> = client.get_json(SourceId::MusicBrainz, &url).await;
        assert!(matches!(
            result,
            Err(UpstreamError::MalformedPayload {
                source_id: SourceId::MusicBrainz,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_probe_sends_two_byte_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .and(header("range", "bytes=0-1"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Type", "audio/mpeg")
                    .set_body_bytes(b"ID".to_vec()),
            )
            .mount(&server)
            .await;

        let client = ApiClient::default();
        let url = format!("{}/stream", server.uri());
        let outcome = client.probe_range(&url).await.unwrap();
        assert_eq!(outcome.status, 206);
        assert_eq!(outcome.content_type.as_deref(), Some("audio/mpeg"));
    }

    #[tokio::test]
    async fn test_probe_429_is_error_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
            .mount(&server)
            .await;

        let client = ApiClient::default();
        let url = format!("{}/stream", server.uri());
        let result = client.probe_range(&url).await;
        match result {
            Err(UpstreamError::HttpStatus {
                status: 429,
                retry_after,
                ..
            }) => assert_eq!(retry_after, Some(Duration::from_secs(2))),
            other => panic!("expected HttpStatus 429, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_non_429_statuses_are_returned_in_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = ApiClient::default();
        let url = format!("{}/stream", server.uri());
        let outcome = client.probe_range(&url).await.unwrap();
        assert_eq!(outcome.status, 403);
    }

    #[tokio::test]
    async fn test_probe_captures_cache_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "audio/ogg")
                    .insert_header("Cache-Control", "public, max-age=1800"),
            )
            .mount(&server)
            .await;

        let client = ApiClient::default();
        let url = format!("{}/stream", server.uri());
        let outcome = client.probe_range(&url).await.unwrap();
        assert_eq!(
            outcome.cache_control.as_deref(),
            Some("public, max-age=1800")
        );
        assert!(outcome.expires.is_none());
    }
}
