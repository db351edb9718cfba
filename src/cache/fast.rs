//! Fast cache tier: shared TTL key-value store.
//!
//! [`RedisFastTier`] is the production backend; [`MemoryFastTier`] backs
//! tests and deployments running without redis. Both enforce TTLs on read so
//! expired entries are never served.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::CacheError;

/// Ephemeral shared key-value store with per-entry TTL.
#[async_trait]
pub trait FastTier: Send + Sync {
    /// Returns the value for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key` for at most `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Administrative bulk delete of every key starting with `prefix`.
    /// Returns the number of removed entries.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

// ==================== In-memory implementation ====================

/// In-memory fast tier used by tests and cache-less deployments.
#[derive(Debug, Default)]
pub struct MemoryFastTier {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryFastTier {
    /// Creates an empty tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries; test observability.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().1 > now)
            .count()
    }

    /// Whether the tier holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FastTier for MemoryFastTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        // The read guard must be released before remove() touches the same
        // shard, so the expired branch only records the fact here.
        let expired = match self.entries.get(key) {
            Some(entry) if entry.value().1 > Instant::now() => {
                return Ok(Some(entry.value().0.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - self.entries.len()) as u64)
    }
}

// ==================== Redis implementation ====================

/// Redis-backed fast tier.
///
/// Uses a [`ConnectionManager`], which transparently reconnects, so a redis
/// restart shows up as a few failed operations (degraded) rather than a
/// wedged process.
#[derive(Clone)]
pub struct RedisFastTier {
    conn: ConnectionManager,
}

impl RedisFastTier {
    /// Connects to redis at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] when the initial connection fails.
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        debug!("connected to redis fast tier");
        Ok(Self { conn })
    }

    /// Wraps an existing connection manager (shared with the bus bridge).
    #[must_use]
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for RedisFastTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFastTier").finish_non_exhaustive()
    }
}

#[async_trait]
impl FastTier for RedisFastTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        // Redis EX takes whole seconds; floor at one so short TTLs still expire.
        let seconds = ttl.as_secs().max(1);
        conn.set_ex(key, value, seconds)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del(key)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(format!("{prefix}*"))
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = conn
            .del(keys)
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))?;
        Ok(removed)
    }
}
