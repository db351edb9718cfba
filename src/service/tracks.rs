//! Track detail orchestration: slow-tier read-through to the source's
//! detail lookup.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::aggregator::CatalogAggregator;
use crate::cache::SlowTier;
use crate::model::{SourceId, Track};
use crate::upstream::UpstreamError;

/// Errors surfaced by track lookup.
#[derive(Debug, Error)]
pub enum TrackError {
    /// Neither the store nor the source knows this track.
    #[error("track {source_id}:{external_id} not found")]
    NotFound {
        /// Requested source.
        source_id: SourceId,
        /// Requested external id.
        external_id: String,
    },

    /// The source failed, already classified.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Track detail orchestrator.
pub struct TrackService {
    aggregator: Arc<CatalogAggregator>,
    slow: Arc<dyn SlowTier>,
}

impl TrackService {
    /// Creates the orchestrator over the adapter registry and track store.
    #[must_use]
    pub fn new(aggregator: Arc<CatalogAggregator>, slow: Arc<dyn SlowTier>) -> Self {
        Self { aggregator, slow }
    }

    /// Returns the track for `(source, external_id)`, reading through the
    /// store to the source's detail endpoint on a miss.
    ///
    /// # Errors
    ///
    /// - [`TrackError::NotFound`] when the source answers but has no track
    /// - [`TrackError::Upstream`] when the source fails
    #[instrument(skip(self), fields(source = %source, external_id))]
    pub async fn get(&self, source: SourceId, external_id: &str) -> Result<Track, TrackError> {
        match self.slow.get_track(source, external_id).await {
            Ok(Some(track)) => {
                debug!("track served from store");
                return Ok(track);
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "track store read failed, falling through to source"),
        }

        let Some(track) = self.aggregator.lookup(source, external_id).await? else {
            return Err(TrackError::NotFound {
                source_id: source,
                external_id: external_id.to_string(),
            });
        };

        if let Err(error) = self.slow.upsert_track(&track).await {
            warn!(%error, "track upsert failed, continuing");
        }
        Ok(track)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregator::tests::{StubSource, track};
    use crate::cache::MemorySlowTier;
    use crate::upstream::{RetryPolicy, SourceRateLimiter};
    use std::sync::atomic::Ordering;

    fn service(stub: StubSource) -> (TrackService, Arc<StubSource>, Arc<MemorySlowTier>) {
        let stub = Arc::new(stub);
        let aggregator = Arc::new(CatalogAggregator::new(
            vec![stub.clone()],
            Arc::new(SourceRateLimiter::with_default_intervals()),
            RetryPolicy::no_retries(),
        ));
        let slow = Arc::new(MemorySlowTier::new());
        (
            TrackService::new(aggregator, slow.clone()),
            stub,
            slow,
        )
    }

    #[tokio::test]
    async fn test_miss_reads_through_and_upserts() {
        tokio::time::pause();
        let (svc, stub, slow) =
            service(StubSource::ok(SourceId::Jamendo, vec![track(SourceId::Jamendo, "j1")]));

        let found = svc.get(SourceId::Jamendo, "j1").await.unwrap();
        assert_eq!(found.external_id, "j1");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(slow.track_count(), 1);

        // Second read is served from the store.
        let again = svc.get(SourceId::Jamendo, "j1").await.unwrap();
        assert_eq!(again.external_id, "j1");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_track_is_not_found() {
        tokio::time::pause();
        let (svc, _, _) =
            service(StubSource::ok(SourceId::Jamendo, vec![track(SourceId::Jamendo, "j1")]));
        assert!(matches!(
            svc.get(SourceId::Jamendo, "ghost").await,
            Err(TrackError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates() {
        tokio::time::pause();
        let (svc, _, _) = service(StubSource::failing(SourceId::Jamendo, 502));
        assert!(matches!(
            svc.get(SourceId::Jamendo, "j1").await,
            Err(TrackError::Upstream(_))
        ));
    }
}
