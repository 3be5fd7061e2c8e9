//! Application configuration loaded from environment.

use std::net::SocketAddr;
use std::time::Duration;

use validator::Validate;

/// Default threshold after which an idle online user is shown as away.
pub const DEFAULT_AWAY_AFTER_SECONDS: u64 = 300;
/// Default period of the passive decay tick.
pub const DEFAULT_DECAY_INTERVAL_SECS: u64 = 30;

/// Application configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone, Validate)]
pub struct Config {
    /// Server bind address (e.g. `0.0.0.0:3000`).
    pub server_addr: SocketAddr,
    /// Redis connection URL (e.g. `redis://127.0.0.1/`).
    pub redis_url: String,
    /// Prefix prepended to every Redis key and channel (e.g. `room42:`).
    pub key_prefix: String,
    /// Uid of the authenticated user of this session, if any.
    pub self_uid: Option<String>,
    /// Seconds without a heartbeat before an online user is reclassified away.
    #[validate(range(min = 1))]
    pub away_after_seconds: u64,
    /// Seconds between passive decay ticks.
    #[validate(range(min = 1))]
    pub decay_interval_secs: u64,
    /// Tear down a fallback subscription once its last observer guard drops.
    pub release_unobserved_fallbacks: bool,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            redis_url: "redis://127.0.0.1/".to_string(),
            key_prefix: String::new(),
            self_uid: None,
            away_after_seconds: DEFAULT_AWAY_AFTER_SECONDS,
            decay_interval_secs: DEFAULT_DECAY_INTERVAL_SECS,
            release_unobserved_fallbacks: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_addr = match lookup("SERVER_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigLoadError::InvalidServerAddr)?,
            None => defaults.server_addr,
        };
        let redis_url = lookup("REDIS_URL").unwrap_or(defaults.redis_url);
        let key_prefix = lookup("KEY_PREFIX").unwrap_or(defaults.key_prefix);
        let self_uid = lookup("SELF_UID").filter(|s| !s.trim().is_empty());
        let away_after_seconds = parse_u64(&lookup, "AWAY_AFTER_SECONDS", defaults.away_after_seconds)?;
        let decay_interval_secs =
            parse_u64(&lookup, "DECAY_INTERVAL_SECS", defaults.decay_interval_secs)?;
        let release_unobserved_fallbacks = match lookup("RELEASE_UNOBSERVED_FALLBACKS") {
            Some(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
            None => defaults.release_unobserved_fallbacks,
        };
        let log_level = lookup("LOG_LEVEL").unwrap_or(defaults.log_level);

        let config = Self {
            server_addr,
            redis_url,
            key_prefix,
            self_uid,
            away_after_seconds,
            decay_interval_secs,
            release_unobserved_fallbacks,
            log_level,
        };
        config
            .validate()
            .map_err(|e| ConfigLoadError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.decay_interval_secs)
    }
}

fn parse_u64<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(key)),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
