//! Core data model shared across the aggregation pipeline.
//!
//! The central type is [`Track`], the normalized catalog entry produced by
//! source adapters and persisted in the slow tier. Stream URLs are never
//! stored on a `Track`; they live in ephemeral [`StreamDescriptor`] values
//! produced by the stream resolver and cached only until expiration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identity of an external music catalog.
///
/// The string tags are part of the public API surface (request parameters,
/// cache keys, persisted documents) and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// Jamendo - Creative-Commons catalog with directly playable URLs.
    Jamendo,
    /// MusicBrainz - metadata database, no playable URLs.
    MusicBrainz,
}

impl SourceId {
    /// Returns the stable string tag for this source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jamendo => "jamendo",
            Self::MusicBrainz => "musicbrainz",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown source tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for SourceId {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jamendo" => Ok(Self::Jamendo),
            "musicbrainz" => Ok(Self::MusicBrainz),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// Normalized catalog entry.
///
/// `(source, external_id)` is unique across the system. Adapters normalize
/// upstream payloads into this shape before any merging happens, so the
/// aggregator and caches never see source-specific schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Catalog that produced this entry.
    pub source: SourceId,
    /// Opaque identifier within the source catalog.
    pub external_id: String,
    /// Track title.
    pub title: String,
    /// Primary artist name.
    pub artist: String,
    /// Album or release title, empty when the source has none.
    #[serde(default)]
    pub album: String,
    /// Duration in whole seconds.
    pub duration_secs: u32,
    /// Free-form genre tags.
    #[serde(default)]
    pub genres: Vec<String>,
    /// Cover image reference when the source provides one.
    #[serde(default)]
    pub image: Option<String>,
    /// When this entry was last refreshed from its source.
    pub fetched_at: DateTime<Utc>,
}

/// Ephemeral resolved stream: produced by the resolver, cached in the fast
/// tier until `expires_at`, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// External track identifier the URL was resolved for.
    pub track_id: String,
    /// Source the URL belongs to.
    pub source: SourceId,
    /// Absolute playable URL.
    pub url: String,
    /// Instant after which the URL must not be served.
    pub expires_at: DateTime<Utc>,
}

/// Cached outcome of probing a stream URL.
///
/// Lives in the fast tier for a short bounded window (at most five minutes)
/// independent of the URL's own expiration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Whether the probe accepted the URL.
    pub valid: bool,
    /// Expiration derived from response headers (or the fallback TTL).
    pub expires_at: DateTime<Utc>,
    /// Short failure description when `valid` is false.
    #[serde(default)]
    pub error: Option<String>,
    /// Server-mandated wait before the next probe, when one was given.
    #[serde(default)]
    pub retry_after_secs: Option<u64>,
}

/// Filter snapshot applied to a search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict results to this genre tag.
    #[serde(default)]
    pub genre: Option<String>,
    /// Minimum duration in seconds.
    #[serde(default)]
    pub min_duration: Option<u32>,
    /// Maximum duration in seconds.
    #[serde(default)]
    pub max_duration: Option<u32>,
}

/// Sort snapshot applied to a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSort {
    /// Field to sort by (`relevance`, `title`, `artist`, `duration`).
    pub by: String,
    /// `asc` or `desc`.
    pub order: String,
}

impl Default for SearchSort {
    fn default() -> Self {
        Self {
            by: "relevance".to_string(),
            order: "desc".to_string(),
        }
    }
}

/// Maximum accepted `limit` value; larger requests are clamped.
pub const MAX_SEARCH_LIMIT: u32 = 100;

/// Default `limit` when the caller does not specify one.
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// A validated, normalized search request.
///
/// Construction clamps `limit` to `[1, 100]` and floors `page` at 1 so the
/// fingerprint is computed over canonical values only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Raw query string (non-empty; emptiness is rejected by the orchestrator).
    pub query: String,
    /// 1-based page number.
    pub page: u32,
    /// Page size, clamped to `[1, 100]`.
    pub limit: u32,
    /// Filter snapshot.
    pub filters: SearchFilters,
    /// Sort snapshot.
    pub sort: SearchSort,
}

impl SearchQuery {
    /// Creates a normalized query: `limit` clamped to `[1, 100]`, `page`
    /// floored at 1.
    #[must_use]
    pub fn new(query: impl Into<String>, page: u32, limit: u32) -> Self {
        Self {
            query: query.into(),
            page: page.max(1),
            limit: limit.clamp(1, MAX_SEARCH_LIMIT),
            filters: SearchFilters::default(),
            sort: SearchSort::default(),
        }
    }

    /// Replaces the filter snapshot.
    #[must_use]
    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Replaces the sort snapshot.
    #[must_use]
    pub fn with_sort(mut self, sort: SearchSort) -> Self {
        self.sort = sort;
        self
    }

    /// Zero-based offset of the first result on this page.
    #[must_use]
    pub fn offset(&self) -> u32 {
        (self.page - 1) * self.limit
    }

    /// Deterministic cache key over every field that affects the result set.
    ///
    /// Two queries fingerprint identically if and only if they would produce
    /// the same cached page, so the fast and slow tiers can be keyed by this
    /// value alone.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "q={}|page={}|limit={}|genre={}|min={}|max={}|by={}|order={}",
            self.query,
            self.page,
            self.limit,
            self.filters.genre.as_deref().unwrap_or(""),
            self.filters
                .min_duration
                .map(|v| v.to_string())
                .unwrap_or_default(),
            self.filters
                .max_duration
                .map(|v| v.to_string())
                .unwrap_or_default(),
            self.sort.by,
            self.sort.order,
        );
        let digest = Sha256::digest(canonical.as_bytes());
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

/// Assembled search response as surfaced to callers and stored in caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Original query string.
    pub query: String,
    /// Result window for the requested page.
    pub results: Vec<Track>,
    /// Total matches across the merged union, before pagination.
    pub total: usize,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Zero-based offset of the window.
    pub offset: u32,
    /// Filter snapshot this result was computed under.
    pub filters: SearchFilters,
    /// Sort snapshot this result was computed under.
    pub sort: SearchSort,
}

/// Validated request identity. Lifetime is one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable user identifier from the identity service.
    pub user_id: String,
    /// Display username.
    pub username: String,
    /// Role tags granted to this user.
    pub roles: Vec<String>,
}

/// Message envelope flowing between the bus and live connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Message kind tag (`notification`, `now_playing`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload.
    pub data: serde_json::Value,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// A user-facing notification payload.
    #[must_use]
    pub fn notification(data: serde_json::Value) -> Self {
        Self::new("notification", data)
    }

    /// A playlist change payload.
    #[must_use]
    pub fn playlist_update(data: serde_json::Value) -> Self {
        Self::new("playlist_update", data)
    }

    /// A presence change payload.
    #[must_use]
    pub fn user_presence(data: serde_json::Value) -> Self {
        Self::new("user_presence", data)
    }

    /// A now-playing update payload.
    #[must_use]
    pub fn now_playing(data: serde_json::Value) -> Self {
        Self::new("now_playing", data)
    }

    /// A live playlist (room) payload.
    #[must_use]
    pub fn live_playlist(data: serde_json::Value) -> Self {
        Self::new("live_playlist", data)
    }

    /// An operator broadcast payload.
    #[must_use]
    pub fn system_notification(data: serde_json::Value) -> Self {
        Self::new("system_notification", data)
    }

    /// Keepalive reply to a client `ping` frame.
    #[must_use]
    pub fn pong() -> Self {
        Self::new("pong", serde_json::Value::Null)
    }
}

/// Remaining time until `expires_at`, or `None` when already past.
#[must_use]
pub fn time_to_expiry(expires_at: DateTime<Utc>) -> Option<Duration> {
    let remaining = expires_at - Utc::now();
    remaining.to_std().ok().filter(|d| !d.is_zero())
}
