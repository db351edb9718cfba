//! MusicBrainz adapter - metadata-only source.
//!
//! MusicBrainz yields descriptive records but no playable URLs, so
//! [`MusicBrainzSource::stream_url`] fails `StreamNotSupported` at the type
//! boundary. Recording lengths arrive in milliseconds and are normalized to
//! whole seconds.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::SourceAdapter;
use crate::model::{SourceId, Track};
use crate::upstream::{ApiClient, UpstreamError};

/// Production API base.
const DEFAULT_BASE_URL: &str = "https://musicbrainz.org/ws/2";

// ==================== MusicBrainz API response types ====================

#[derive(Debug, Deserialize)]
pub(crate) struct RecordingSearchResponse {
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Recording {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Length in milliseconds; absent for some recordings.
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default, rename = "artist-credit")]
    pub artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    pub releases: Vec<Release>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArtistCredit {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Release {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Tag {
    pub name: String,
}

// ==================== MusicBrainzSource ====================

/// Metadata-only adapter for the MusicBrainz web service.
pub struct MusicBrainzSource {
    client: ApiClient,
    base_url: String,
}

impl MusicBrainzSource {
    /// Creates an adapter against the given base URL (production or a mock
    /// server in tests).
    #[must_use]
    pub fn new(client: ApiClient, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if base_url.is_empty() {
            base_url = DEFAULT_BASE_URL.to_string();
        }
        Self { client, base_url }
    }

    fn normalize(recording: Recording) -> Track {
        #[allow(clippy::cast_possible_truncation)]
        let duration_secs = recording.length.map_or(0, |ms| (ms / 1000) as u32);
        Track {
            source: SourceId::MusicBrainz,
            external_id: recording.id,
            title: recording.title,
            artist: recording
                .artist_credit
                .first()
                .map(|c| c.name.clone())
                .unwrap_or_default(),
            album: recording
                .releases
                .first()
                .map(|r| r.title.clone())
                .unwrap_or_default(),
            duration_secs,
            genres: recording.tags.into_iter().map(|t| t.name).collect(),
            image: None,
            fetched_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for MusicBrainzSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicBrainzSource")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for MusicBrainzSource {
    fn id(&self) -> SourceId {
        SourceId::MusicBrainz
    }

    fn public_streamable(&self) -> bool {
        false
    }

    #[tracing::instrument(skip(self), fields(source = "musicbrainz"))]
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Track>, UpstreamError> {
        let url = format!(
            "{}/recording?query={}&fmt=json&limit={}",
            self.base_url,
            urlencoding::encode(query),
            limit,
        );
        let response: RecordingSearchResponse =
            self.client.get_json(SourceId::MusicBrainz, &url).await?;
        debug!(count = response.recordings.len(), "musicbrainz search results");
        Ok(response
            .recordings
            .into_iter()
            .map(Self::normalize)
            .collect())
    }

    #[tracing::instrument(skip(self), fields(source = "musicbrainz"))]
    async fn lookup(&self, external_id: &str) -> Result<Option<Track>, UpstreamError> {
        let url = format!(
            "{}/recording/{}?fmt=json&inc=artist-credits+releases",
            self.base_url,
            urlencoding::encode(external_id),
        );
        match self.client.get_json::<Recording>(SourceId::MusicBrainz, &url).await {
            Ok(recording) => Ok(Some(Self::normalize(recording))),
            Err(UpstreamError::HttpStatus { status: 404, .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    fn stream_url(&self, _external_id: &str) -> Result<String, UpstreamError> {
        Err(UpstreamError::stream_not_supported(SourceId::MusicBrainz))
    }
}
