//! Runtime configuration for the safety core.
//!
//! Hosts usually ship a JSON blob alongside the app bundle; every field is
//! optional and falls back to [`CoreConfig::default`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::capabilities::{KeyNamespace, KvError, KvKey, DEFAULT_TIMEOUT_MS};

pub const DEFAULT_API_BASE_URL: &str = "https://api.tourist-safety.gov.in";
pub const DEFAULT_QUEUE_STORAGE_KEY: &str = "pending_requests";
pub const DEFAULT_COUNTDOWN_START: u8 = 5;
pub const DEFAULT_COUNTDOWN_TICK_MS: u64 = 1_000;
pub const DEFAULT_ZONE_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_ZONE_CACHE_TTL_MS: u64 = 60_000;
/// Roughly 50 m of latitude.
pub const DEFAULT_ZONE_CACHE_PRECISION_DEG: f64 = 0.0005;
pub const DEFAULT_PANIC_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid queue storage key: {0}")]
    StorageKey(#[from] KvError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub queue_storage_key: String,
    pub countdown_start: u8,
    pub countdown_tick_ms: u64,
    /// `0` disables the zone cache.
    pub zone_cache_capacity: usize,
    pub zone_cache_ttl_ms: u64,
    pub zone_cache_precision_deg: f64,
    pub panic_history_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            queue_storage_key: DEFAULT_QUEUE_STORAGE_KEY.to_string(),
            countdown_start: DEFAULT_COUNTDOWN_START,
            countdown_tick_ms: DEFAULT_COUNTDOWN_TICK_MS,
            zone_cache_capacity: DEFAULT_ZONE_CACHE_CAPACITY,
            zone_cache_ttl_ms: DEFAULT_ZONE_CACHE_TTL_MS,
            zone_cache_precision_deg: DEFAULT_ZONE_CACHE_PRECISION_DEG,
            panic_history_limit: DEFAULT_PANIC_HISTORY_LIMIT,
        }
    }
}

impl CoreConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_base_url must be set".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        if self.countdown_start == 0 {
            return Err(ConfigError::Invalid("countdown_start must be > 0".into()));
        }
        if self.countdown_tick_ms == 0 {
            return Err(ConfigError::Invalid("countdown_tick_ms must be > 0".into()));
        }
        if !(self.zone_cache_precision_deg.is_finite() && self.zone_cache_precision_deg > 0.0) {
            return Err(ConfigError::Invalid(
                "zone_cache_precision_deg must be a positive number".into(),
            ));
        }
        self.queue_key()?;
        Ok(())
    }

    pub fn queue_key(&self) -> Result<KvKey, KvError> {
        KvKey::new(KeyNamespace::Outbox, self.queue_storage_key.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn zone_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.zone_cache_ttl_ms)
    }
}
