//! Error types for upstream catalog calls.
//!
//! Every external-boundary operation returns a typed [`UpstreamError`]; the
//! retry wrapper inspects [`classify_error`] rather than matching on error
//! text, and `Retry-After` hints ride along on the error itself so the next
//! attempt can honor them.

use std::time::Duration;

use thiserror::Error;

use crate::model::SourceId;

/// Errors surfaced by upstream catalog and probe requests.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error calling {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout calling {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Parsed `Retry-After` value, if the response carried one.
        retry_after: Option<Duration>,
    },

    /// Response body did not match the source's schema, or the source
    /// reported an in-band error envelope.
    #[error("malformed {source_id} payload: {detail}")]
    MalformedPayload {
        /// Source whose payload failed to parse.
        source_id: SourceId,
        /// Short parse or envelope diagnostic.
        detail: String,
    },

    /// The source's adapter does not provide playable URLs.
    #[error("source {source_id} does not support streaming")]
    StreamNotSupported {
        /// The metadata-only source.
        source_id: SourceId,
    },

    /// Probe rejected the URL with a non-retryable status or content type.
    #[error("invalid stream URL {url}: {detail}")]
    InvalidStream {
        /// The URL that failed validation.
        url: String,
        /// Short probe diagnostic.
        detail: String,
    },

    /// The retry budget was exhausted; carries the final attempt's error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: Box<UpstreamError>,
    },
}

impl UpstreamError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error carrying a parsed `Retry-After` value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a malformed-payload error.
    pub fn malformed(source: SourceId, detail: impl Into<String>) -> Self {
        Self::MalformedPayload {
            source_id: source,
            detail: detail.into(),
        }
    }

    /// Creates a stream-not-supported error.
    #[must_use]
    pub fn stream_not_supported(source: SourceId) -> Self {
        Self::StreamNotSupported { source_id: source }
    }

    /// Creates an invalid-stream error.
    pub fn invalid_stream(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidStream {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Server-mandated delay before the next attempt, when the error carries
    /// one (HTTP 429/503 with `Retry-After`). Sees through an exhausted
    /// retry wrapper to the final attempt's hint.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus { retry_after, .. } => *retry_after,
            Self::RetriesExhausted { last, .. } => last.retry_after(),
            _ => None,
        }
    }
}

// No blanket `From<reqwest::Error>`: the variants require the URL context
// that the transport error does not carry, so callers go through the
// constructor helpers.
