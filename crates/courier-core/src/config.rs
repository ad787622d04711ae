//! Queue configuration: capacity, eviction and expiry knobs.
//!
//! Sources, later wins:
//! 1. built-in defaults
//! 2. a JSON file (`QueueConfig::from_json_file`)
//! 3. `COURIER_*` environment variables (`QueueConfig::with_env_overrides`)

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_EVICTION_BATCH: usize = 100;
pub const DEFAULT_EXPIRY_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Upper bound for `expiry_secs` (about 100 years).
const MAX_EXPIRY_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Hard cap on queued rows; reaching it triggers eviction before insert.
    pub max_queue_size: usize,

    /// Rows evicted per capacity hit.
    pub eviction_batch: usize,

    /// Rows older than this are dropped by `cleanup_expired`.
    pub expiry_secs: u64,

    /// `max_retries` for requests that do not set one.
    pub default_max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            eviction_batch: DEFAULT_EVICTION_BATCH,
            expiry_secs: DEFAULT_EXPIRY_SECS,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl QueueConfig {
    pub fn expiry(&self) -> chrono::Duration {
        let secs = self.expiry_secs.min(MAX_EXPIRY_SECS) as i64;
        chrono::Duration::seconds(secs)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Apply `COURIER_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = parse_var(&lookup, "COURIER_MAX_QUEUE_SIZE")? {
            self.max_queue_size = v;
        }
        if let Some(v) = parse_var(&lookup, "COURIER_EVICTION_BATCH")? {
            self.eviction_batch = v;
        }
        if let Some(v) = parse_var(&lookup, "COURIER_EXPIRY_SECS")? {
            self.expiry_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "COURIER_DEFAULT_MAX_RETRIES")? {
            self.default_max_retries = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::Invalid("max_queue_size must be >= 1".into()));
        }
        if self.eviction_batch == 0 {
            return Err(ConfigError::Invalid("eviction_batch must be >= 1".into()));
        }
        if self.expiry_secs > MAX_EXPIRY_SECS {
            return Err(ConfigError::Invalid(format!(
                "expiry_secs must be <= {MAX_EXPIRY_SECS}"
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
    }
}
