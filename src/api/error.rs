//! Mapping from typed core errors to HTTP responses.
//!
//! The body is always `{"error": "<one line>"}`. Internal diagnostics
//! (per-source causes, attempt counts) are logged where they occur, never
//! returned to callers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::auth::AuthError;
use crate::cache::CacheError;
use crate::hub::BusError;
use crate::model::UnknownSource;
use crate::service::{SearchError, TrackError};
use crate::stream::StreamError;
use crate::upstream::UpstreamError;

/// An error ready to be surfaced to an HTTP caller.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Creates an error with an explicit status and one-line message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400 with a caller-facing message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// The mapped status; test observability.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The one-line message; test observability.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Status for an upstream failure: 429 when a rate limit leaked through the
/// retry budget, 502 for everything transient, 500 for capability and
/// validation failures.
fn upstream_status(error: &UpstreamError) -> StatusCode {
    match error {
        UpstreamError::HttpStatus { status: 429, .. } => StatusCode::TOO_MANY_REQUESTS,
        UpstreamError::RetriesExhausted { last, .. } => upstream_status(last),
        UpstreamError::StreamNotSupported { .. } | UpstreamError::InvalidStream { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        UpstreamError::MalformedPayload { .. } => StatusCode::BAD_GATEWAY,
        UpstreamError::Network { .. }
        | UpstreamError::Timeout { .. }
        | UpstreamError::HttpStatus { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl From<UnknownSource> for ApiError {
    fn from(error: UnknownSource) -> Self {
        Self::bad_request(error.to_string())
    }
}

impl From<SearchError> for ApiError {
    fn from(error: SearchError) -> Self {
        match &error {
            SearchError::EmptyQuery => Self::bad_request(error.to_string()),
            SearchError::Aggregator(_) => Self::new(StatusCode::BAD_GATEWAY, error.to_string()),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(error: StreamError) -> Self {
        match &error {
            StreamError::PublicSourceForbidden { .. } => {
                Self::new(StatusCode::FORBIDDEN, error.to_string())
            }
            StreamError::SourceDisabled { .. } => Self::bad_request(error.to_string()),
            StreamError::Upstream(upstream) => Self::new(upstream_status(upstream), error.to_string()),
        }
    }
}

impl From<TrackError> for ApiError {
    fn from(error: TrackError) -> Self {
        match &error {
            TrackError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, error.to_string()),
            TrackError::Upstream(upstream) => Self::new(upstream_status(upstream), error.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(error: CacheError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string())
    }
}

impl From<BusError> for ApiError {
    fn from(error: BusError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string())
    }
}
