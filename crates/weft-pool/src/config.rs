//! Pool configuration (per-name sizing and timeouts)
//!
//! Provides structures and parsing for named pool settings. On the TOML side
//! timeouts are denominated in milliseconds (`acquire_timeout_ms`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Errors that can occur during settings parsing
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Failed to parse TOML
    #[error("Failed to parse pool settings: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Sizing and timeout configuration for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle handles retained even when past the idle timeout
    pub min_idle: usize,

    /// Maximum handles in existence (on loan + idle)
    pub max_size: usize,

    /// How long an acquirer waits for a release before failing
    #[serde(rename = "acquire_timeout_ms", with = "duration_ms")]
    pub acquire_timeout: Duration,

    /// Idle handles older than this are dropped on the next acquire
    #[serde(rename = "idle_timeout_ms", with = "duration_ms")]
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Copy of `self` with `max_size` floored at 1 and `min_idle` capped at
    /// `max_size`. Pools operate on normalized configs.
    pub(crate) fn normalized(&self) -> Self {
        let max_size = self.max_size.max(1);
        Self {
            min_idle: self.min_idle.min(max_size),
            max_size,
            ..self.clone()
        }
    }
}

/// Named pool configurations with a shared default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Fallback configuration for names without an entry
    pub default: PoolConfig,

    /// Per-name overrides
    pub pools: HashMap<String, PoolConfig>,
}

impl PoolSettings {
    /// Settings where every name uses `default`.
    pub fn new(default: PoolConfig) -> Self {
        Self {
            default,
            pools: HashMap::new(),
        }
    }

    /// Builder-style per-name override.
    pub fn with_pool(mut self, name: impl Into<String>, config: PoolConfig) -> Self {
        self.pools.insert(name.into(), config);
        self
    }

    /// Configuration for `name`, falling back to the default.
    pub fn config_for(&self, name: &str) -> PoolConfig {
        self.pools.get(name).cloned().unwrap_or_else(|| self.default.clone())
    }

    /// Parse settings from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
