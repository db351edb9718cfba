//! Stream-URL resolution: generate, validate, cache, and expire ephemeral
//! playable URLs.
//!
//! Resolution is a two-stage caching protocol. The fast tier holds the
//! resolved URL (TTL = remaining lifetime) and, separately, a short-lived
//! [`ValidationRecord`] for the URL (TTL capped at five minutes). A cached
//! URL is only served while its validation record is present, positive, and
//! unexpired; otherwise the resolver re-enters the resolve-validate-cache
//! loop under the retrying client.
//!
//! There is no single-flight: two concurrent resolutions for the same track
//! may both probe upstream; both write only valid results and the fast tier
//! is last-writer-wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cache::{FastTier, get_typed, probe_key, put_typed, stream_key};
use crate::config::{STREAM_FALLBACK_TTL, VALIDATION_TTL};
use crate::model::{SourceId, StreamDescriptor, ValidationRecord, time_to_expiry};
use crate::source::SourceAdapter;
use crate::upstream::{ApiClient, ProbeOutcome, RetryPolicy, UpstreamError, run_with_retry};

/// Errors surfaced by stream resolution.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A public endpoint asked for a source that is not publicly streamable.
    #[error("source {source_id} cannot be streamed through the public endpoint")]
    PublicSourceForbidden {
        /// The non-public source.
        source_id: SourceId,
    },

    /// The requested source is not enabled in this deployment.
    #[error("source {source_id} is not enabled")]
    SourceDisabled {
        /// The disabled source.
        source_id: SourceId,
    },

    /// The underlying upstream failure, already classified.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Resolves and validates stream URLs with fast-tier caching.
pub struct StreamResolver {
    client: ApiClient,
    fast: Arc<dyn FastTier>,
    retry_policy: RetryPolicy,
}

impl StreamResolver {
    /// Creates a resolver using `client` for probes and `fast` for caching.
    #[must_use]
    pub fn new(client: ApiClient, fast: Arc<dyn FastTier>, retry_policy: RetryPolicy) -> Self {
        Self {
            client,
            fast,
            retry_policy,
        }
    }

    /// Resolves a playable URL for `track_id` on the adapter's source.
    ///
    /// # Errors
    ///
    /// - `StreamNotSupported` (typed, immediate) for metadata-only sources
    /// - `InvalidStream` when the probe rejects the URL
    /// - `RetriesExhausted` when transient probe failures outlast the budget
    #[instrument(skip(self, adapter), fields(source = %adapter.id(), track_id))]
    pub async fn resolve(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        track_id: &str,
    ) -> Result<StreamDescriptor, StreamError> {
        let source = adapter.id();
        let cache_key = stream_key(source, track_id);

        if let Some(cached) = self.cached_descriptor(&cache_key).await {
            debug!("stream cache hit");
            return Ok(cached);
        }

        let adapter = Arc::clone(adapter);
        let descriptor = run_with_retry(&self.retry_policy, "resolve_stream", || {
            let adapter = Arc::clone(&adapter);
            async move { self.resolve_once(&adapter, track_id).await }
        })
        .await?;

        // TTL = remaining lifetime of the URL; the descriptor disappears
        // from the cache the moment it would no longer be servable.
        if let Some(ttl) = time_to_expiry(descriptor.expires_at) {
            put_typed(self.fast.as_ref(), &cache_key, &descriptor, ttl).await;
        }
        Ok(descriptor)
    }

    /// Serves from cache only when the URL's validation record is present,
    /// positive, and unexpired.
    async fn cached_descriptor(&self, cache_key: &str) -> Option<StreamDescriptor> {
        let descriptor: StreamDescriptor = get_typed(self.fast.as_ref(), cache_key).await?;
        let record: ValidationRecord =
            get_typed(self.fast.as_ref(), &probe_key(&descriptor.url)).await?;
        if record.valid && record.expires_at > Utc::now() && descriptor.expires_at > Utc::now() {
            Some(descriptor)
        } else {
            None
        }
    }

    /// One pass of the resolve-validate-cache loop.
    async fn resolve_once(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        track_id: &str,
    ) -> Result<StreamDescriptor, UpstreamError> {
        let url = adapter.stream_url(track_id)?;
        let outcome = self.client.probe_range(&url).await?;

        match judge_probe(&url, &outcome) {
            Ok(()) => {}
            Err(error) => {
                // Negative validations are cached too, so repeated requests
                // for a broken URL do not hammer the upstream.
                let record = ValidationRecord {
                    valid: false,
                    expires_at: Utc::now() + chrono::Duration::seconds(60),
                    error: Some(error.to_string()),
                    retry_after_secs: None,
                };
                put_typed(self.fast.as_ref(), &probe_key(&url), &record, VALIDATION_TTL).await;
                return Err(error);
            }
        }

        let mut expires_at = expiry_from_probe(&outcome);
        if expires_at <= Utc::now() {
            // Upstream said "already stale" (max-age=0 or a past Expires);
            // fall back so the returned expiry is strictly in the future.
            warn!(url, "probe returned non-future expiry, using fallback TTL");
            expires_at = fallback_expiry();
        }

        let record = ValidationRecord {
            valid: true,
            expires_at,
            error: None,
            retry_after_secs: None,
        };
        let record_ttl = time_to_expiry(expires_at)
            .map_or(VALIDATION_TTL, |remaining| remaining.min(VALIDATION_TTL));
        put_typed(self.fast.as_ref(), &probe_key(&url), &record, record_ttl).await;

        Ok(StreamDescriptor {
            track_id: track_id.to_string(),
            source: adapter.id(),
            url,
            expires_at,
        })
    }
}

/// Accepts 2xx responses with an audio content type or
/// `application/octet-stream`; 408 stays transient for the retry wrapper;
/// every other status ≥ 400 is a non-retryable `InvalidStream`.
fn judge_probe(url: &str, outcome: &ProbeOutcome) -> Result<(), UpstreamError> {
    match outcome.status {
        200..=299 => {
            let content_type = outcome.content_type.as_deref().unwrap_or("");
            if is_streamable_content_type(content_type) {
                Ok(())
            } else {
                Err(UpstreamError::invalid_stream(
                    url,
                    format!("unacceptable content type: {content_type}"),
                ))
            }
        }
        408 => Err(UpstreamError::http_status(url, 408)),
        status => Err(UpstreamError::invalid_stream(
            url,
            format!("probe returned HTTP {status}"),
        )),
    }
}

/// Whether a probe content type is acceptable for streaming.
fn is_streamable_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .map(str::trim)
        .unwrap_or_default()
        .to_ascii_lowercase();
    mime.starts_with("audio/") || mime == "application/octet-stream"
}

/// Computes the URL expiration from probe headers.
///
/// Precedence: `Cache-Control: max-age`, then `Expires`, then the fallback
/// TTL of one hour from now.
fn expiry_from_probe(outcome: &ProbeOutcome) -> DateTime<Utc> {
    if let Some(max_age) = outcome.cache_control.as_deref().and_then(parse_max_age) {
        return Utc::now()
            + chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));
    }
    if let Some(expires) = outcome
        .expires
        .as_deref()
        .and_then(|v| httpdate::parse_http_date(v).ok())
    {
        return DateTime::<Utc>::from(expires);
    }
    fallback_expiry()
}

fn fallback_expiry() -> DateTime<Utc> {
    Utc::now()
        + chrono::Duration::from_std(STREAM_FALLBACK_TTL)
            .unwrap_or_else(|_| chrono::Duration::hours(1))
}

/// Parses the `max-age` directive out of a `Cache-Control` header value.
fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control.split(',').find_map(|directive| {
        let directive = directive.trim();
        let value = directive
            .strip_prefix("max-age=")
            .or_else(|| directive.strip_prefix("Max-Age="))?;
        value.parse::<u64>().ok().map(Duration::from_secs)
    })
}
