//! Upstream plumbing shared by all source adapters: typed errors, per-source
//! rate limiting, the retrying client, and the HTTP wrapper.
//!
//! Layering, leaves first: [`UpstreamError`] classifies every failure an
//! external call can produce; [`SourceRateLimiter`] paces calls per source;
//! [`run_with_retry`] re-attempts retryable failures with exponential
//! backoff; [`ApiClient`] issues the actual requests.

mod client;
mod error;
pub mod rate_limiter;
mod retry;

pub use client::{ApiClient, ProbeOutcome, default_user_agent};
pub use error::UpstreamError;
pub use rate_limiter::{
    JAMENDO_INTERVAL, MUSICBRAINZ_INTERVAL, SourceRateLimiter, parse_retry_after,
};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryPolicy, classify_error, run_with_retry};
