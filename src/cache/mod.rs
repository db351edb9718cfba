//! Two-tier cache: an ephemeral shared fast tier and a persistent slow tier.
//!
//! The fast tier is a TTL key-value store (redis in production, in-memory in
//! tests and degraded deployments); the slow tier is the document store.
//! Search pages live in both tiers, stream URLs and validation records only
//! in the fast tier, tracks only in the slow tier.
//!
//! Fast-tier failures are a degradation, not an error: the typed helpers
//! below log the failure and behave as a miss / dropped write so request
//! processing continues against the backing sources.

mod fast;
mod slow;

pub use fast::{FastTier, MemoryFastTier, RedisFastTier};
pub use slow::{MemorySlowTier, MongoSlowTier, SlowTier};

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::model::SourceId;

/// Errors from cache tiers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The tier is unreachable or refused the operation. Callers degrade.
    #[error("cache tier unavailable: {detail}")]
    Unavailable {
        /// Short backend diagnostic.
        detail: String,
    },

    /// A cached value could not be encoded or decoded.
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Creates an unavailable error from any backend diagnostic.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::Unavailable {
            detail: detail.into(),
        }
    }
}

/// Fast-tier key for a cached search page.
#[must_use]
pub fn search_key(fingerprint: &str) -> String {
    format!("search:{fingerprint}")
}

/// Fast-tier key for a resolved stream URL.
#[must_use]
pub fn stream_key(source: SourceId, track_id: &str) -> String {
    format!("stream:{source}:{track_id}")
}

/// Fast-tier key for a URL validation record.
///
/// The URL itself is hashed so credentials embedded in query strings never
/// appear in cache keys.
#[must_use]
pub fn probe_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut short = String::with_capacity(32);
    for byte in &digest[..16] {
        short.push_str(&format!("{byte:02x}"));
    }
    format!("probe:{short}")
}

/// Reads and decodes a fast-tier value, degrading to a miss on tier failure.
pub async fn get_typed<T: DeserializeOwned>(tier: &dyn FastTier, key: &str) -> Option<T> {
    match tier.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key, %error, "dropping undecodable fast-tier entry");
                None
            }
        },
        Ok(None) => None,
        Err(error) => {
            warn!(key, %error, "fast tier read failed, treating as miss");
            None
        }
    }
}

/// Encodes and writes a fast-tier value, degrading to a no-op on tier
/// failure.
pub async fn put_typed<T: Serialize>(tier: &dyn FastTier, key: &str, value: &T, ttl: Duration) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(key, %error, "failed to encode fast-tier value");
            return;
        }
    };
    if let Err(error) = tier.set(key, &raw, ttl).await {
        warn!(key, %error, "fast tier write failed, continuing without cache");
    }
}
