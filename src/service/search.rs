//! Search orchestration: validation, the two-tier read-through protocol,
//! filtering, sorting, and pagination.
//!
//! Read-through order: fast tier by fingerprint, then slow tier (honoring
//! `expires_at`), then the aggregator. Aggregator results are written to the
//! slow tier with a 24-hour expiration and replicated into the fast tier
//! with a 1-hour TTL, so repeated queries inside the TTL are byte-identical
//! and cost zero upstream calls.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::aggregator::{AggregatorError, CatalogAggregator};
use crate::cache::{FastTier, SlowTier, get_typed, put_typed, search_key};
use crate::config::{SEARCH_FAST_TTL, SEARCH_SLOW_TTL};
use crate::model::{SearchQuery, SearchResult, Track};

/// Errors surfaced by search orchestration.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The query string was empty or whitespace.
    #[error("query must not be empty")]
    EmptyQuery,

    /// Every upstream source failed.
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),
}

/// Search orchestrator.
pub struct SearchService {
    aggregator: Arc<CatalogAggregator>,
    fast: Arc<dyn FastTier>,
    slow: Arc<dyn SlowTier>,
}

impl SearchService {
    /// Creates the orchestrator over its collaborators.
    #[must_use]
    pub fn new(
        aggregator: Arc<CatalogAggregator>,
        fast: Arc<dyn FastTier>,
        slow: Arc<dyn SlowTier>,
    ) -> Self {
        Self {
            aggregator,
            fast,
            slow,
        }
    }

    /// Runs a search through the two-tier cache.
    ///
    /// # Errors
    ///
    /// - [`SearchError::EmptyQuery`] before any upstream call
    /// - [`SearchError::Aggregator`] when every source failed on a cache miss
    #[instrument(skip(self), fields(query = %query.query, page = query.page, limit = query.limit))]
    pub async fn search(&self, query: SearchQuery) -> Result<SearchResult, SearchError> {
        if query.query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let fingerprint = query.fingerprint();
        let cache_key = search_key(&fingerprint);

        // 1. Fast tier.
        if let Some(result) = get_typed::<SearchResult>(self.fast.as_ref(), &cache_key).await {
            debug!("search served from fast tier");
            return Ok(result);
        }

        // 2. Slow tier; a hit is replicated into the fast tier.
        match self.slow.get_search(&fingerprint).await {
            Ok(Some(result)) => {
                debug!("search served from slow tier");
                put_typed(self.fast.as_ref(), &cache_key, &result, SEARCH_FAST_TTL).await;
                return Ok(result);
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "slow tier read failed, treating as miss"),
        }

        // 3. Aggregate upstream and cache through both tiers.
        let merged = self.aggregator.search(&query.query, query.limit).await?;
        let result = assemble(&query, merged);

        for track in &result.results {
            if let Err(error) = self.slow.upsert_track(track).await {
                warn!(%error, "track upsert failed, continuing");
            }
        }
        if let Err(error) = self
            .slow
            .put_search(&fingerprint, &result, SEARCH_SLOW_TTL)
            .await
        {
            warn!(%error, "slow tier write failed, continuing");
        }
        put_typed(self.fast.as_ref(), &cache_key, &result, SEARCH_FAST_TTL).await;

        Ok(result)
    }
}

/// Applies filters, sort, and pagination to the merged union.
fn assemble(query: &SearchQuery, merged: Vec<Track>) -> SearchResult {
    let mut union: Vec<Track> = merged
        .into_iter()
        .filter(|track| matches_filters(query, track))
        .collect();
    sort_tracks(query, &mut union);

    let total = union.len();
    let offset = query.offset() as usize;
    let results: Vec<Track> = union
        .into_iter()
        .skip(offset)
        .take(query.limit as usize)
        .collect();

    SearchResult {
        query: query.query.clone(),
        results,
        total,
        page: query.page,
        limit: query.limit,
        offset: query.offset(),
        filters: query.filters.clone(),
        sort: query.sort.clone(),
    }
}

fn matches_filters(query: &SearchQuery, track: &Track) -> bool {
    if let Some(genre) = &query.filters.genre {
        let wanted = genre.to_ascii_lowercase();
        if !track
            .genres
            .iter()
            .any(|g| g.to_ascii_lowercase() == wanted)
        {
            return false;
        }
    }
    if let Some(min) = query.filters.min_duration {
        if track.duration_secs < min {
            return false;
        }
    }
    if let Some(max) = query.filters.max_duration {
        if track.duration_secs > max {
            return false;
        }
    }
    true
}

/// Sorts in place; `relevance` keeps source-merge order.
fn sort_tracks(query: &SearchQuery, tracks: &mut [Track]) {
    let descending = query.sort.order.eq_ignore_ascii_case("desc");
    match query.sort.by.as_str() {
        "title" => tracks.sort_by(|a, b| a.title.cmp(&b.title)),
        "artist" => tracks.sort_by(|a, b| a.artist.cmp(&b.artist)),
        "duration" => tracks.sort_by_key(|t| t.duration_secs),
        _ => return,
    }
    if descending {
        tracks.reverse();
    }
}
