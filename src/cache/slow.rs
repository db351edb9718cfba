//! Slow cache tier: the persistent document store.
//!
//! Collections: `tracks` keyed by `(source, external_id)` and `search_cache`
//! keyed by query fingerprint with an `expires_at` field. Expired search
//! documents are reaped on read and by the periodic sweep the binary runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use mongodb::Database;
use mongodb::options::ReplaceOptions;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::CacheError;
use crate::model::{SearchResult, SourceId, Track};

/// Persistent second cache tier and track store.
#[async_trait]
pub trait SlowTier: Send + Sync {
    /// Returns the cached search page for `fingerprint` when one exists and
    /// has not expired. Expired documents are deleted on the way out.
    async fn get_search(&self, fingerprint: &str) -> Result<Option<SearchResult>, CacheError>;

    /// Stores a search page under `fingerprint`, expiring after `ttl`.
    async fn put_search(
        &self,
        fingerprint: &str,
        result: &SearchResult,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Stores an opaque value under an arbitrary cache key, expiring after
    /// `ttl`. Used by collaborators for cache keys that outlive the fast
    /// tier.
    async fn put_value(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Returns the opaque value for `key` when present and unexpired.
    /// Expired documents are deleted on the way out.
    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    /// Upserts a track; last writer wins.
    async fn upsert_track(&self, track: &Track) -> Result<(), CacheError>;

    /// Returns a track by its unique `(source, external_id)` key.
    async fn get_track(
        &self,
        source: SourceId,
        external_id: &str,
    ) -> Result<Option<Track>, CacheError>;

    /// Deletes every expired search document; returns how many were removed.
    async fn sweep_expired(&self) -> Result<u64, CacheError>;
}

// ==================== In-memory implementation ====================

/// In-memory slow tier for tests.
#[derive(Debug, Default)]
pub struct MemorySlowTier {
    searches: Mutex<HashMap<String, (SearchResult, DateTime<Utc>)>>,
    values: Mutex<HashMap<String, (serde_json::Value, DateTime<Utc>)>>,
    tracks: Mutex<HashMap<(SourceId, String), Track>>,
}

impl MemorySlowTier {
    /// Creates an empty tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a search document with an explicit expiration; lets tests
    /// exercise the expired-on-read path directly.
    pub fn insert_search_with_expiry(
        &self,
        fingerprint: &str,
        result: SearchResult,
        expires_at: DateTime<Utc>,
    ) {
        self.searches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(fingerprint.to_string(), (result, expires_at));
    }

    /// Number of stored tracks; test observability.
    #[must_use]
    pub fn track_count(&self) -> usize {
        self.tracks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SlowTier for MemorySlowTier {
    async fn get_search(&self, fingerprint: &str) -> Result<Option<SearchResult>, CacheError> {
        let mut searches = self
            .searches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match searches.get(fingerprint) {
            Some((result, expires_at)) if *expires_at > Utc::now() => Ok(Some(result.clone())),
            Some(_) => {
                searches.remove(fingerprint);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_search(
        &self,
        fingerprint: &str,
        result: &SearchResult,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        self.searches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(fingerprint.to_string(), (result.clone(), expires_at));
        Ok(())
    }

    async fn put_value(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), (value.clone(), expires_at));
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let mut values = self
            .values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match values.get(key) {
            Some((value, expires_at)) if *expires_at > Utc::now() => Ok(Some(value.clone())),
            Some(_) => {
                values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn upsert_track(&self, track: &Track) -> Result<(), CacheError> {
        self.tracks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert((track.source, track.external_id.clone()), track.clone());
        Ok(())
    }

    async fn get_track(
        &self,
        source: SourceId,
        external_id: &str,
    ) -> Result<Option<Track>, CacheError> {
        Ok(self
            .tracks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(source, external_id.to_string()))
            .cloned())
    }

    async fn sweep_expired(&self) -> Result<u64, CacheError> {
        let now = Utc::now();
        let mut removed = 0;
        {
            let mut searches = self
                .searches
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let before = searches.len();
            searches.retain(|_, (_, expires_at)| *expires_at > now);
            removed += before - searches.len();
        }
        {
            let mut values = self
                .values
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let before = values.len();
            values.retain(|_, (_, expires_at)| *expires_at > now);
            removed += before - values.len();
        }
        Ok(removed as u64)
    }
}

// ==================== MongoDB implementation ====================

/// Search-cache document shape.
#[derive(Debug, Serialize, Deserialize)]
struct SearchCacheDoc {
    #[serde(rename = "_id")]
    fingerprint: String,
    result: SearchResult,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    expires_at: DateTime<Utc>,
}

/// Opaque key-value document shape.
#[derive(Debug, Serialize, Deserialize)]
struct ValueDoc {
    #[serde(rename = "_id")]
    key: String,
    value: serde_json::Value,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    expires_at: DateTime<Utc>,
}

/// Track document shape; `_id` is the composite `source:external_id` key.
#[derive(Debug, Serialize, Deserialize)]
struct TrackDoc {
    #[serde(rename = "_id")]
    id: String,
    track: Track,
}

fn track_doc_id(source: SourceId, external_id: &str) -> String {
    format!("{source}:{external_id}")
}

/// MongoDB-backed slow tier.
#[derive(Debug, Clone)]
pub struct MongoSlowTier {
    db: Database,
}

impl MongoSlowTier {
    /// Database name used by this service.
    pub const DATABASE: &'static str = "harmonia";

    /// Connects to the document store at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] when the client cannot be built.
    #[instrument(skip(uri))]
    pub async fn connect(uri: &str) -> Result<Self, CacheError> {
        let client = mongodb::Client::with_uri_str(uri)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        debug!("connected to document store");
        Ok(Self {
            db: client.database(Self::DATABASE),
        })
    }

    /// Wraps an existing database handle.
    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    fn searches(&self) -> mongodb::Collection<SearchCacheDoc> {
        self.db.collection("search_cache")
    }

    fn tracks(&self) -> mongodb::Collection<TrackDoc> {
        self.db.collection("tracks")
    }

    fn values(&self) -> mongodb::Collection<ValueDoc> {
        self.db.collection("kv_cache")
    }
}

#[async_trait]
impl SlowTier for MongoSlowTier {
    async fn get_search(&self, fingerprint: &str) -> Result<Option<SearchResult>, CacheError> {
        let found = self
            .searches()
            .find_one(doc! { "_id": fingerprint }, None)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;

        match found {
            Some(doc) if doc.expires_at > Utc::now() => Ok(Some(doc.result)),
            Some(_) => {
                // Orphan reap: expired entries are deleted on the next read.
                self.searches()
                    .delete_one(doc! { "_id": fingerprint }, None)
                    .await
                    .map_err(|e| CacheError::unavailable(e.to_string()))?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_search(
        &self,
        fingerprint: &str,
        result: &SearchResult,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        let document = SearchCacheDoc {
            fingerprint: fingerprint.to_string(),
            result: result.clone(),
            expires_at,
        };
        self.searches()
            .replace_one(
                doc! { "_id": fingerprint },
                document,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        Ok(())
    }

    async fn put_value(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        let document = ValueDoc {
            key: key.to_string(),
            value: value.clone(),
            expires_at,
        };
        self.values()
            .replace_one(
                doc! { "_id": key },
                document,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let found = self
            .values()
            .find_one(doc! { "_id": key }, None)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        match found {
            Some(doc) if doc.expires_at > Utc::now() => Ok(Some(doc.value)),
            Some(_) => {
                self.values()
                    .delete_one(doc! { "_id": key }, None)
                    .await
                    .map_err(|e| CacheError::unavailable(e.to_string()))?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn upsert_track(&self, track: &Track) -> Result<(), CacheError> {
        let id = track_doc_id(track.source, &track.external_id);
        let document = TrackDoc {
            id: id.clone(),
            track: track.clone(),
        };
        self.tracks()
            .replace_one(
                doc! { "_id": id },
                document,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_track(
        &self,
        source: SourceId,
        external_id: &str,
    ) -> Result<Option<Track>, CacheError> {
        let found = self
            .tracks()
            .find_one(doc! { "_id": track_doc_id(source, external_id) }, None)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        Ok(found.map(|doc| doc.track))
    }

    async fn sweep_expired(&self) -> Result<u64, CacheError> {
        let cutoff = bson::DateTime::from_chrono(Utc::now());
        let searches = self
            .searches()
            .delete_many(doc! { "expires_at": { "$lt": cutoff } }, None)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        let values = self
            .values()
            .delete_many(doc! { "expires_at": { "$lt": cutoff } }, None)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        Ok(searches.deleted_count + values.deleted_count)
    }
}
