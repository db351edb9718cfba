//! Jamendo adapter - catalog-with-stream source.
//!
//! Jamendo is a Creative-Commons catalog whose tracks are directly playable:
//! search responses carry full track metadata and the stream URL is a
//! deterministic template over the track id and the API credential, so
//! [`JamendoSource::stream_url`] never touches the network.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::SourceAdapter;
use crate::model::{SourceId, Track};
use crate::upstream::{ApiClient, UpstreamError};

/// Production API base.
const DEFAULT_BASE_URL: &str = "https://api.jamendo.com/v3.0";

// ==================== Jamendo API response types ====================

/// Top-level Jamendo envelope. Errors are reported in-band through
/// `headers.code` even when the HTTP status is 200.
#[derive(Debug, Deserialize)]
pub(crate) struct JamendoResponse {
    pub headers: JamendoHeaders,
    #[serde(default)]
    pub results: Vec<JamendoTrack>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JamendoHeaders {
    pub code: i32,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JamendoTrack {
    /// Numeric id, but delivered as a JSON string by the API.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub album_name: String,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub album_image: Option<String>,
    #[serde(default)]
    pub musicinfo_genres: Vec<String>,
}

// ==================== JamendoSource ====================

/// Catalog-with-stream adapter for the Jamendo API.
pub struct JamendoSource {
    client: ApiClient,
    base_url: String,
    client_id: String,
}

impl JamendoSource {
    /// Creates an adapter against the given base URL (production or a mock
    /// server in tests).
    #[must_use]
    pub fn new(client: ApiClient, base_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if base_url.is_empty() {
            base_url = DEFAULT_BASE_URL.to_string();
        }
        Self {
            client,
            base_url,
            client_id: client_id.into(),
        }
    }

    fn normalize(&self, raw: JamendoTrack) -> Track {
        Track {
            source: SourceId::Jamendo,
            external_id: raw.id,
            title: raw.name,
            artist: raw.artist_name,
            album: raw.album_name,
            duration_secs: raw.duration,
            genres: raw.musicinfo_genres,
            image: raw.album_image.filter(|s| !s.is_empty()),
            fetched_at: Utc::now(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<JamendoTrack>, UpstreamError> {
        let response: JamendoResponse = self.client.get_json(SourceId::Jamendo, url).await?;

        // A 200 with a non-zero envelope code is an in-band upstream error.
        if response.headers.code != 0 {
            return Err(UpstreamError::malformed(
                SourceId::Jamendo,
                format!(
                    "error code {} ({})",
                    response.headers.code, response.headers.error_message
                ),
            ));
        }
        Ok(response.results)
    }
}

impl std::fmt::Debug for JamendoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JamendoSource")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for JamendoSource {
    fn id(&self) -> SourceId {
        SourceId::Jamendo
    }

    fn public_streamable(&self) -> bool {
        true
    }

    #[tracing::instrument(skip(self), fields(source = "jamendo"))]
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Track>, UpstreamError> {
        let url = format!(
            "{}/tracks/?client_id={}&search={}&limit={}&format=json&include=musicinfo",
            self.base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(query),
            limit,
        );
        let results = self.fetch(&url).await?;
        debug!(count = results.len(), "jamendo search results");
        Ok(results.into_iter().map(|raw| self.normalize(raw)).collect())
    }

    #[tracing::instrument(skip(self), fields(source = "jamendo"))]
    async fn lookup(&self, external_id: &str) -> Result<Option<Track>, UpstreamError> {
        let url = format!(
            "{}/tracks/?client_id={}&id={}&format=json&include=musicinfo",
            self.base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(external_id),
        );
        let mut results = self.fetch(&url).await?;
        if results.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.normalize(results.remove(0))))
    }

    fn stream_url(&self, external_id: &str) -> Result<String, UpstreamError> {
        Ok(format!(
            "{}/tracks/stream?client_id={}&id={}",
            self.base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(external_id),
        ))
    }
}
