//! Catalog aggregator: concurrent fan-out across source adapters.
//!
//! One task per enabled source acquires that source's rate-limit permit and
//! runs the retry-wrapped search; all tasks are awaited (no early
//! termination). Successes are merged in configuration order; failures are
//! recovered per-source unless every source fails.
//!
//! Deduplication across sources is deliberately not performed here.

use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::model::{SourceId, Track};
use crate::source::SourceAdapter;
use crate::upstream::{RetryPolicy, SourceRateLimiter, UpstreamError, run_with_retry};

/// Errors surfaced by aggregated search.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// Every enabled source failed; carries each source's cause.
    #[error("all {count} sources failed", count = errors.len())]
    AllSourcesFailed {
        /// Per-source failure causes, in configuration order.
        errors: Vec<(SourceId, UpstreamError)>,
    },
}

/// Concurrent fan-out over the configured source adapters.
pub struct CatalogAggregator {
    sources: Vec<Arc<dyn SourceAdapter>>,
    limiter: Arc<SourceRateLimiter>,
    retry_policy: RetryPolicy,
}

impl CatalogAggregator {
    /// Creates an aggregator over `sources` in configuration order.
    #[must_use]
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        limiter: Arc<SourceRateLimiter>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            sources,
            limiter,
            retry_policy,
        }
    }

    /// The configured adapters, in merge order.
    #[must_use]
    pub fn sources(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.sources
    }

    /// Returns the adapter for `source`, if enabled.
    #[must_use]
    pub fn source(&self, source: SourceId) -> Option<&Arc<dyn SourceAdapter>> {
        self.sources.iter().find(|s| s.id() == source)
    }

    /// Shared per-source rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<SourceRateLimiter> {
        &self.limiter
    }

    /// Retry policy applied to every upstream call.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Searches every enabled source concurrently and merges the results.
    ///
    /// Sources may complete in any order but the merged output is
    /// deterministic: tracks appear in configuration order of their source.
    /// Partial failures are logged and the union of successes is returned.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::AllSourcesFailed`] only when every source
    /// failed, with at least one per-source cause.
    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<Track>, AggregatorError> {
        let tasks = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            let limiter = Arc::clone(&self.limiter);
            let policy = self.retry_policy.clone();
            async move {
                limiter.acquire(source.id()).await;
                let outcome =
                    run_with_retry(&policy, "search", || source.search(query, limit)).await;
                (source.id(), outcome)
            }
        });

        // join_all preserves input order, which is configuration order.
        let outcomes = join_all(tasks).await;

        let mut merged = Vec::new();
        let mut errors = Vec::new();
        for (source, outcome) in outcomes {
            match outcome {
                Ok(tracks) => {
                    debug!(source = %source, count = tracks.len(), "source answered");
                    merged.extend(tracks);
                }
                Err(error) => {
                    warn!(source = %source, %error, "source failed, continuing with the rest");
                    // A surviving Retry-After hint also pushes back requests
                    // from other callers to this source.
                    if let Some(hint) = error.retry_after() {
                        self.limiter.record_penalty(source, hint).await;
                    }
                    errors.push((source, error));
                }
            }
        }

        if merged.is_empty() && !errors.is_empty() {
            return Err(AggregatorError::AllSourcesFailed { errors });
        }
        Ok(merged)
    }

    /// Looks up a single track on one source, rate-limited and retried.
    ///
    /// # Errors
    ///
    /// Propagates the adapter's classified error after the retry budget.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn lookup(
        &self,
        source: SourceId,
        external_id: &str,
    ) -> Result<Option<Track>, UpstreamError> {
        let Some(adapter) = self.source(source) else {
            return Ok(None);
        };
        let adapter = Arc::clone(adapter);
        self.limiter.acquire(source).await;
        run_with_retry(&self.retry_policy, "lookup", || {
            adapter.lookup(external_id)
        })
        .await
    }
}
