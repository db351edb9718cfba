//! Stream orchestration: public-source gating in front of the resolver.

use std::sync::Arc;

use tracing::instrument;

use crate::aggregator::CatalogAggregator;
use crate::model::{SourceId, StreamDescriptor};
use crate::stream::{StreamError, StreamResolver};

/// Stream orchestrator.
pub struct StreamService {
    aggregator: Arc<CatalogAggregator>,
    resolver: StreamResolver,
}

impl StreamService {
    /// Creates the orchestrator over the adapter registry and resolver.
    #[must_use]
    pub fn new(aggregator: Arc<CatalogAggregator>, resolver: StreamResolver) -> Self {
        Self {
            aggregator,
            resolver,
        }
    }

    /// Resolves a stream URL for a track.
    ///
    /// `public` marks requests arriving through the unauthenticated surface;
    /// those may only resolve sources whose adapter declares itself publicly
    /// streamable.
    ///
    /// # Errors
    ///
    /// - [`StreamError::SourceDisabled`] when the source is not configured
    /// - [`StreamError::PublicSourceForbidden`] on a gated public request
    /// - the resolver's typed errors otherwise
    #[instrument(skip(self), fields(source = %source, track_id, public))]
    pub async fn get_stream(
        &self,
        track_id: &str,
        source: SourceId,
        public: bool,
    ) -> Result<StreamDescriptor, StreamError> {
        let Some(adapter) = self.aggregator.source(source) else {
            return Err(StreamError::SourceDisabled { source_id: source });
        };
        if public && !adapter.public_streamable() {
            return Err(StreamError::PublicSourceForbidden { source_id: source });
        }
        self.resolver.resolve(adapter, track_id).await
    }
}
