//! Retry wrapper with exponential backoff for transient upstream failures.
//!
//! Failed operations are classified into a [`FailureType`]; retryable
//! failures are re-attempted with `base * multiplier^attempt` delays capped
//! at a maximum, plus a small random jitter. When an error carries a
//! `Retry-After` hint, that value overrides the computed delay for the next
//! attempt.
//!
//! # Example
//!
//! ```no_run
//! use harmonia_core::upstream::{RetryPolicy, run_with_retry, UpstreamError};
//!
//! # async fn example() -> Result<(), UpstreamError> {
//! let policy = RetryPolicy::default();
//! let body = run_with_retry(&policy, "fetch tracks", || async {
//!     // issue the upstream call
//!     Ok::<_, UpstreamError>("payload".to_string())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::error::UpstreamError;

/// Default maximum retries (attempts beyond the first).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier.
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Maximum jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of an upstream failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry: transport errors,
    /// timeouts, HTTP 408 and 5xx.
    Transient,

    /// Failure that will not succeed regardless of retries: other 4xx,
    /// malformed payloads, unsupported capabilities.
    Permanent,

    /// Server rate limiting (HTTP 429); retried, honoring `Retry-After`.
    RateLimited,
}

/// Classifies an upstream error into a failure type.
///
/// | Error | Type |
/// |---|---|
/// | transport / timeout | Transient |
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | other 4xx | Permanent |
/// | malformed payload | Permanent |
/// | stream not supported / invalid stream | Permanent |
#[must_use]
pub fn classify_error(error: &UpstreamError) -> FailureType {
    match error {
        UpstreamError::Network { .. } | UpstreamError::Timeout { .. } => FailureType::Transient,
        UpstreamError::HttpStatus { status, .. } => classify_http_status(*status),
        UpstreamError::MalformedPayload { .. }
        | UpstreamError::StreamNotSupported { .. }
        | UpstreamError::InvalidStream { .. } => FailureType::Permanent,
        // Already the output of a retry loop; never retried again.
        UpstreamError::RetriesExhausted { .. } => FailureType::Permanent,
    }
}

fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        s if (500..600).contains(&s) => FailureType::Transient,
        s if (400..500).contains(&s) => FailureType::Permanent,
        _ => FailureType::Permanent,
    }
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default values
///
/// - `max_retries`: 3 (so at most 4 total attempts)
/// - `base_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0
///
/// Delay before retry `n` (1-indexed) is
/// `min(base * multiplier^(n-1), max_delay) + jitter`, unless the failed
/// attempt's error carries a `Retry-After` hint, which takes precedence.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit settings.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            multiplier,
        }
    }

    /// Creates a policy with a custom retry budget and default delays.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// A policy that never retries. Useful in tests and for probe-once paths.
    #[must_use]
    pub fn no_retries() -> Self {
        Self::with_max_retries(0)
    }

    /// Returns the retry budget (attempts beyond the first).
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Computed delay before retry `retry_number` (1-indexed), without the
    /// `Retry-After` override.
    fn backoff_delay(&self, retry_number: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(retry_number.saturating_sub(1));
        let delay_ms = base_ms * self.multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + jitter()
    }
}

/// Small uniform jitter to avoid synchronized retries across tasks.
fn jitter() -> Duration {
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(0..=MAX_JITTER.as_millis() as u64))
}

/// Runs `op`, retrying on retryable failures per `policy`.
///
/// The total number of attempts never exceeds `max_retries + 1`. Retryable
/// failures sleep out the backoff delay (or the error's `Retry-After` hint)
/// between attempts; non-retryable failures abort immediately with the
/// original error. When the budget is exhausted the final error is wrapped
/// in [`UpstreamError::RetriesExhausted`].
///
/// # Errors
///
/// Returns the first non-retryable error unchanged, or
/// `RetriesExhausted { attempts, last }` once the budget runs out.
#[instrument(skip(policy, op), fields(max_retries = policy.max_retries))]
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let failure = classify_error(&error);
                if failure == FailureType::Permanent {
                    debug!(operation, attempt, error = %error, "non-retryable failure");
                    return Err(error);
                }
                if attempt >= max_attempts {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %error,
                        "retry budget exhausted"
                    );
                    return Err(UpstreamError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }

                // A server-provided Retry-After overrides the computed backoff.
                let delay = error
                    .retry_after()
                    .unwrap_or_else(|| policy.backoff_delay(attempt));

                debug!(
                    operation,
                    attempt,
                    next_attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    ?failure,
                    "will retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
