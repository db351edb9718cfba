//! Process configuration: environment at init time, compiled defaults for
//! tuning knobs.
//!
//! Nothing here is global - [`Config`] is read once in `main` and the
//! relevant pieces are passed into component constructors.

use std::time::Duration;

use thiserror::Error;

use crate::upstream::default_user_agent;

/// Fast-tier TTL for cached search pages.
pub const SEARCH_FAST_TTL: Duration = Duration::from_secs(60 * 60);

/// Slow-tier expiration for cached search pages.
pub const SEARCH_SLOW_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Fallback stream-URL lifetime when upstream headers carry no expiration.
pub const STREAM_FALLBACK_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on validation-record caching.
pub const VALIDATION_TTL: Duration = Duration::from_secs(5 * 60);

/// Writer-initiated WebSocket keepalive interval.
pub const WS_KEEPALIVE: Duration = Duration::from_secs(54);

/// Read deadline for WebSocket connections; reset on any inbound frame.
pub const WS_READ_DEADLINE: Duration = Duration::from_secs(60);

/// Write deadline for a single outbound WebSocket frame.
pub const WS_WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Per-connection outbound queue capacity; a full queue drops the consumer.
pub const CONNECTION_QUEUE_CAPACITY: usize = 64;

/// Error raised for missing or invalid environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is absent or empty.
    #[error("missing required environment variable {name}")]
    Missing {
        /// The variable name.
        name: &'static str,
    },
}

/// Process-wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Jamendo API credential (`client_id`).
    pub jamendo_api_key: String,
    /// Jamendo client secret (reserved for write endpoints; unused by reads).
    pub jamendo_client_secret: String,
    /// Jamendo API base URL; tests point this at a mock server.
    pub jamendo_base_url: String,
    /// MusicBrainz API base URL; tests point this at a mock server.
    pub musicbrainz_base_url: String,
    /// Identity service base URL.
    pub auth_service_url: String,
    /// Redis address for the fast tier and the shared bus.
    pub bus_addr: String,
    /// Optional redis password.
    pub bus_password: Option<String>,
    /// MongoDB connection string for the slow tier.
    pub doc_store_uri: String,
    /// User-Agent sent on every upstream request.
    pub user_agent: String,
    /// HTTP bind address.
    pub bind_addr: String,
}

impl Config {
    /// Reads configuration from the environment.
    ///
    /// `JAMENDO_API_KEY` and `AUTH_SERVICE_URL` are required; everything else
    /// has a workable default for local development.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when a required variable is absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            jamendo_api_key: require("JAMENDO_API_KEY")?,
            jamendo_client_secret: optional("JAMENDO_CLIENT_SECRET").unwrap_or_default(),
            jamendo_base_url: optional("JAMENDO_BASE_URL").unwrap_or_default(),
            musicbrainz_base_url: optional("MUSICBRAINZ_BASE_URL").unwrap_or_default(),
            auth_service_url: require("AUTH_SERVICE_URL")?,
            bus_addr: optional("BUS_ADDR").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            bus_password: optional("BUS_PASSWORD"),
            doc_store_uri: optional("DOC_STORE_URI")
                .unwrap_or_else(|| "mongodb://127.0.0.1:27017".to_string()),
            user_agent: optional("USER_AGENT").unwrap_or_else(default_user_agent),
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }

    /// Redis connection URL with the password applied when one is set.
    #[must_use]
    pub fn bus_url(&self) -> String {
        match &self.bus_password {
            Some(password) if !password.is_empty() => self
                .bus_addr
                .replacen("redis://", &format!("redis://:{password}@"), 1),
            _ => self.bus_addr.clone(),
        }
    }

    /// A fully populated configuration for unit and integration tests.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            jamendo_api_key: "be6cb53f".to_string(),
            jamendo_client_secret: String::new(),
            jamendo_base_url: String::new(),
            musicbrainz_base_url: String::new(),
            auth_service_url: "http://127.0.0.1:9".to_string(),
            bus_addr: "redis://127.0.0.1:6379".to_string(),
            bus_password: None,
            doc_store_uri: "mongodb://127.0.0.1:27017".to_string(),
            user_agent: default_user_agent(),
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing { name })
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
