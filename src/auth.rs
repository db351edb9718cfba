//! Authentication boundary: delegating bearer-token validation.
//!
//! The core never verifies tokens locally. Every protected request forwards
//! its bearer token to the external identity service's validate endpoint and
//! attaches the resulting [`Principal`] to the request. A transport failure
//! is treated the same as an invalid token - the boundary fails closed.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::model::Principal;

/// Deadline for identity-service calls.
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by the auth boundary.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The authorization value was not a well-formed bearer header.
    #[error("malformed authorization header")]
    MalformedAuth,

    /// The identity service rejected the token or was unreachable.
    #[error("authentication rejected")]
    AuthRejected,
}

/// Identity-service response shape for `POST auth/validate`.
#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(default, rename = "userId")]
    user_id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    error: Option<String>,
}

/// Delegating validator against the external identity service.
#[derive(Debug, Clone)]
pub struct AuthValidator {
    client: reqwest::Client,
    base_url: String,
}

impl AuthValidator {
    /// Creates a validator against `base_url`.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(VALIDATE_TIMEOUT)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Validates an `Authorization` header value and returns the principal.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedAuth`] when the header is not `Bearer <token>`
    /// - [`AuthError::AuthRejected`] when the identity service says no or
    ///   cannot be reached
    #[instrument(skip_all)]
    pub async fn validate(&self, authorization: &str) -> Result<Principal, AuthError> {
        let token = extract_bearer_token(authorization).ok_or(AuthError::MalformedAuth)?;
        self.validate_token(token).await
    }

    /// Validates a raw token (already stripped of the `Bearer` prefix).
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthRejected`] when invalid or the service is down.
    #[instrument(skip_all)]
    pub async fn validate_token(&self, token: &str) -> Result<Principal, AuthError> {
        let url = format!("{}/auth/validate", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| {
                warn!(%error, "identity service unreachable, failing closed");
                AuthError::AuthRejected
            })?;

        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "identity service refused");
            return Err(AuthError::AuthRejected);
        }

        let body: ValidateResponse = response.json().await.map_err(|error| {
            warn!(%error, "unparseable identity service response");
            AuthError::AuthRejected
        })?;

        if !body.valid {
            debug!(error = body.error.as_deref().unwrap_or(""), "token rejected");
            return Err(AuthError::AuthRejected);
        }

        Ok(Principal {
            user_id: body.user_id,
            username: body.username,
            roles: if body.role.is_empty() {
                vec![]
            } else {
                vec![body.role]
            },
        })
    }
}

/// Extracts the token from a `Bearer <token>` header value.
///
/// The scheme comparison is case-insensitive per RFC 7235; the token itself
/// must be non-empty and single-part.
fn extract_bearer_token(authorization: &str) -> Option<&str> {
    let mut parts = authorization.trim().splitn(2, ' ');
    let scheme = parts.next()?;
    let token = parts.next()?.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() && !token.contains(' ') {
        Some(token)
    } else {
        None
    }
}
