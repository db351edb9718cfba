//! Source adapters for external music catalogs.
//!
//! Each adapter normalizes one upstream API into the common [`Track`] shape
//! and declares its capability set through the [`SourceAdapter`] trait:
//! every source can `search` and `lookup`, but only catalog-with-stream
//! sources render playable URLs; metadata-only sources fail
//! `StreamNotSupported` at the type boundary instead of at request time.
//!
//! # Object safety
//!
//! The trait uses `async_trait` to support dynamic dispatch via
//! `Arc<dyn SourceAdapter>`; Rust 2024 native async traits are not
//! object-safe, so `async_trait` is required for the registry pattern.

mod jamendo;
mod musicbrainz;

pub use jamendo::JamendoSource;
pub use musicbrainz::MusicBrainzSource;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::model::{SourceId, Track};
use crate::upstream::{ApiClient, UpstreamError};

/// Trait that all source adapters implement.
///
/// Adapters handle source-specific URL construction, credential injection,
/// and response-schema mapping; they surface upstream errors already
/// classified for the retry wrapper.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identity of this source.
    fn id(&self) -> SourceId;

    /// Whether public (unauthenticated) endpoints may resolve streams from
    /// this source.
    fn public_streamable(&self) -> bool;

    /// Searches the catalog, returning normalized tracks.
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Track>, UpstreamError>;

    /// Looks up a single track by its external id. `Ok(None)` means the
    /// source answered but has no such track.
    async fn lookup(&self, external_id: &str) -> Result<Option<Track>, UpstreamError>;

    /// Renders a candidate stream URL for a track.
    ///
    /// # Errors
    ///
    /// Fails `StreamNotSupported` for metadata-only sources.
    fn stream_url(&self, external_id: &str) -> Result<String, UpstreamError>;
}

/// Builds the default adapter set in configuration order.
///
/// Order is deterministic and defines the merge order of aggregated search
/// results: Jamendo first, then MusicBrainz.
#[must_use]
pub fn build_default_sources(config: &Config, client: &ApiClient) -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(JamendoSource::new(
            client.clone(),
            config.jamendo_base_url.clone(),
            config.jamendo_api_key.clone(),
        )),
        Arc::new(MusicBrainzSource::new(
            client.clone(),
            config.musicbrainz_base_url.clone(),
        )),
    ]
}
