//! Per-source rate limiting for upstream catalog requests.
//!
//! Each external source gets one pacing state releasing at most one permit
//! per fixed interval (500 ms for Jamendo, 1 s for MusicBrainz by default).
//! Permits are not banked: a long quiet period does not allow a burst, only
//! the next request is immediate.
//!
//! # Overview
//!
//! Rate limiting is per-source, so requests to different catalogs proceed in
//! parallel without waiting for each other. Only subsequent requests to the
//! *same* source are delayed. Waits are plain `tokio::time::sleep`s, so a
//! cancelled caller releases its wait immediately.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harmonia_core::model::SourceId;
//! use harmonia_core::upstream::SourceRateLimiter;
//!
//! # async fn example() {
//! let limiter = SourceRateLimiter::with_default_intervals();
//!
//! // First permit for a source is immediate.
//! limiter.acquire(SourceId::Jamendo).await;
//!
//! // Second permit waits out the source's interval.
//! limiter.acquire(SourceId::Jamendo).await;
//!
//! // A different source proceeds immediately.
//! limiter.acquire(SourceId::MusicBrainz).await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::model::SourceId;

/// Default interval between Jamendo requests.
pub const JAMENDO_INTERVAL: Duration = Duration::from_millis(500);

/// Default interval between MusicBrainz requests.
pub const MUSICBRAINZ_INTERVAL: Duration = Duration::from_millis(1000);

/// Maximum accepted `Retry-After` value; larger hints are capped.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-source pacing state.
#[derive(Debug)]
struct SourceState {
    /// Minimum spacing between permit releases for this source.
    interval: Duration,
    /// Pacing gate. The lock is held across the wait so concurrent callers
    /// for the same source queue up and release one interval apart.
    gate: Mutex<Gate>,
}

#[derive(Debug, Default)]
struct Gate {
    /// When the last permit was released. `None` means no request yet.
    last_release: Option<Instant>,
    /// Server-mandated floor for the next release (from `Retry-After`).
    not_before: Option<Instant>,
}

/// Per-source rate limiter.
///
/// Designed to be wrapped in `Arc` and shared across the aggregator's
/// fan-out tasks. `DashMap` gives lock-free access to per-source state; the
/// map shard lock is released before the pacing wait so only same-source
/// callers serialize.
#[derive(Debug)]
pub struct SourceRateLimiter {
    sources: DashMap<SourceId, Arc<SourceState>>,
    fallback_interval: Duration,
}

impl SourceRateLimiter {
    /// Creates a limiter with the compiled default intervals for all known
    /// sources.
    #[must_use]
    pub fn with_default_intervals() -> Self {
        let limiter = Self {
            sources: DashMap::new(),
            fallback_interval: MUSICBRAINZ_INTERVAL,
        };
        limiter.set_interval(SourceId::Jamendo, JAMENDO_INTERVAL);
        limiter.set_interval(SourceId::MusicBrainz, MUSICBRAINZ_INTERVAL);
        limiter
    }

    /// Sets (or replaces) the interval for one source.
    ///
    /// Replacing an interval resets that source's pacing state.
    pub fn set_interval(&self, source: SourceId, interval: Duration) {
        self.sources.insert(
            source,
            Arc::new(SourceState {
                interval,
                gate: Mutex::new(Gate::default()),
            }),
        );
    }

    /// Returns the configured interval for a source.
    #[must_use]
    pub fn interval(&self, source: SourceId) -> Duration {
        self.sources
            .get(&source)
            .map_or(self.fallback_interval, |s| s.interval)
    }

    /// Waits until a permit is available for `source`, then takes it.
    ///
    /// The first request to a source proceeds immediately; subsequent
    /// requests wait out the remainder of the interval. Dropping the returned
    /// future before completion takes no permit.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn acquire(&self, source: SourceId) {
        // Clone the Arc so the DashMap shard lock is released before any await.
        let state = self
            .sources
            .entry(source)
            .or_insert_with(|| {
                warn!(source = %source, "no interval configured, using fallback");
                Arc::new(SourceState {
                    interval: self.fallback_interval,
                    gate: Mutex::new(Gate::default()),
                })
            })
            .clone();

        let mut gate = state.gate.lock().await;
        let now = Instant::now();

        let mut ready_at = match gate.last_release {
            Some(last) => last + state.interval,
            None => now,
        };
        if let Some(floor) = gate.not_before {
            ready_at = ready_at.max(floor);
        }

        if ready_at > now {
            let wait = ready_at - now;
            debug!(source = %source, wait_ms = wait.as_millis(), "waiting for permit");
            tokio::time::sleep(wait).await;
        }

        gate.last_release = Some(Instant::now());
        gate.not_before = None;
    }

    /// Records a server-mandated delay (from a `Retry-After` header) so the
    /// next permit for `source` is not released before it elapses.
    #[instrument(skip(self), fields(source = %source, delay_ms = delay.as_millis()))]
    pub async fn record_penalty(&self, source: SourceId, delay: Duration) {
        let delay = delay.min(MAX_RETRY_AFTER);
        let state = self
            .sources
            .entry(source)
            .or_insert_with(|| {
                Arc::new(SourceState {
                    interval: self.fallback_interval,
                    gate: Mutex::new(Gate::default()),
                })
            })
            .clone();

        let mut gate = state.gate.lock().await;
        let floor = Instant::now() + delay;
        gate.not_before = Some(gate.not_before.map_or(floor, |prev| prev.max(floor)));
        debug!(source = %source, "recorded server rate limit");
    }
}

/// Parses a `Retry-After` header value into a `Duration`.
///
/// Supports both RFC 7231 forms:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2026 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Values above one hour are
/// capped; dates in the past yield zero.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        match datetime.duration_since(now) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            // Date in the past: no wait required.
            Err(_) => Some(Duration::ZERO),
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_acquire_is_immediate() {
        tokio::time::pause();

        let limiter = SourceRateLimiter::with_default_intervals();
        let start = Instant::now();
        limiter.acquire(SourceId::Jamendo).await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_second_acquire_waits_out_interval() {
        tokio::time::pause();

        let limiter = SourceRateLimiter::with_default_intervals();
        let start = Instant::now();
        limiter.acquire(SourceId::Jamendo).await;
        limiter.acquire(SourceId::Jamendo).await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_sources_pace_independently() {
        tokio::time::pause();

        let limiter = SourceRateLimiter::with_default_intervals();
        limiter.acquire(SourceId::Jamendo).await;

        let start = Instant::now();
        limiter.acquire(SourceId::MusicBrainz).await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_no_burst_after_idle_period() {
        tokio::time::pause();

        let limiter = SourceRateLimiter::with_default_intervals();
        limiter.acquire(SourceId::Jamendo).await;

        // A long idle period banks nothing: the next permit is immediate but
        // the one after still waits a full interval.
        tokio::time::sleep(Duration::from_secs(10)).await;

        let start = Instant::now();
        limiter.acquire(SourceId::Jamendo).await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire(SourceId::Jamendo).await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_at_most_k_permits_per_k_intervals() {
        tokio::time::pause();

        let limiter = Arc::new(SourceRateLimiter::with_default_intervals());
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire(SourceId::Jamendo).await;
        }
        // Four permits require three full intervals of spacing.
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_record_penalty_delays_next_acquire() {
        tokio::time::pause();

        let limiter = SourceRateLimiter::with_default_intervals();
        limiter.acquire(SourceId::Jamendo).await;
        limiter
            .record_penalty(SourceId::Jamendo, Duration::from_secs(3))
            .await;

        let start = Instant::now();
        limiter.acquire(SourceId::Jamendo).await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_custom_interval_overrides_default() {
        tokio::time::pause();

        let limiter = SourceRateLimiter::with_default_intervals();
        limiter.set_interval(SourceId::Jamendo, Duration::from_millis(50));

        let start = Instant::now();
        limiter.acquire(SourceId::Jamendo).await;
        limiter.acquire(SourceId::Jamendo).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("  3  "), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_in_past_is_zero() {
        assert_eq!(
            parse_retry_after("Wed, 01 Jan 2020 00:00:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_http_date_in_future() {
        let future = std::time::SystemTime::now() + Duration::from_secs(60);
        let value = httpdate::fmt_http_date(future);
        let parsed = parse_retry_after(&value).unwrap();
        assert!(parsed >= Duration::from_secs(55) && parsed <= Duration::from_secs(65));
    }
}
