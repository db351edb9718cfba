//! Request orchestrators: thin compositions of the aggregator, caches,
//! resolver, and bus for each use case.
//!
//! Orchestrators own input validation and the read-through protocol; they
//! hold no locks, are reentrant, and degrade (rather than fail) when a cache
//! tier is unavailable.

mod notify;
mod search;
mod stream;
mod tracks;

pub use notify::NotifyService;
pub use search::{SearchError, SearchService};
pub use stream::StreamService;
pub use tracks::{TrackError, TrackService};

use std::sync::Arc;

use tracing::{info, instrument};

use crate::cache::{CacheError, FastTier};

/// Administrative cache operations.
#[derive(Clone)]
pub struct CacheAdmin {
    fast: Arc<dyn FastTier>,
}

impl CacheAdmin {
    /// Creates the admin facade over the fast tier.
    #[must_use]
    pub fn new(fast: Arc<dyn FastTier>) -> Self {
        Self { fast }
    }

    /// Bulk-deletes every fast-tier key under `prefix`; returns the count.
    ///
    /// # Errors
    ///
    /// Propagates [`CacheError`] when the tier is unavailable.
    #[instrument(skip(self))]
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let removed = self.fast.delete_prefix(prefix).await?;
        info!(prefix, removed, "invalidated fast-tier prefix");
        Ok(removed)
    }
}
