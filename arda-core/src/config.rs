//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Durable storage key for the shared query cache.
pub const DEFAULT_STORAGE_KEY: &str = "arda-menu-cache";

/// Default query behaviour applied when a caller passes no explicit options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryDefaultsConfig {
    /// How long fetched data is served without a refetch.
    pub stale_time_ms: u64,
    /// How long an unobserved entry is kept after its last fetch.
    pub gc_time_ms: u64,
    /// A failed attempt is retried while the failure count is below this.
    pub retry: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for QueryDefaultsConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 0,
            gc_time_ms: 5 * 60 * 1000,
            retry: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl QueryDefaultsConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_millis(self.gc_time_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::invalid(
                "query.retry_max_delay_ms",
                "must be >= retry_base_delay_ms",
            ));
        }
        if self.gc_time_ms == 0 {
            return Err(ConfigError::invalid("query.gc_time_ms", "must be > 0"));
        }
        Ok(())
    }
}

/// Settings for the durable snapshot of the query cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Cache-buster; snapshots written by another build are discarded.
    pub buster: String,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Snapshots older than this are discarded at restore.
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
    /// Trailing-edge write throttle window.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_max_age_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_throttle_ms() -> u64 {
    1_000
}

impl PersistenceConfig {
    /// Config with the given buster and defaults for everything else.
    pub fn new(buster: impl Into<String>) -> Self {
        Self {
            buster: buster.into(),
            storage_key: default_storage_key(),
            max_age_ms: default_max_age_ms(),
            throttle_ms: default_throttle_ms(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_throttle(mut self, window: Duration) -> Self {
        self.throttle_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buster.trim().is_empty() {
            return Err(ConfigError::invalid("persistence.buster", "must not be empty"));
        }
        if self.storage_key.trim().is_empty() {
            return Err(ConfigError::invalid(
                "persistence.storage_key",
                "must not be empty",
            ));
        }
        if self.throttle_ms == 0 {
            return Err(ConfigError::invalid("persistence.throttle_ms", "must be > 0"));
        }
        if self.max_age_ms == 0 {
            return Err(ConfigError::invalid("persistence.max_age_ms", "must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let config = QueryDefaultsConfig::default();
        assert_eq!(config.stale_time(), Duration::ZERO);
        assert_eq!(config.gc_time(), Duration::from_secs(300));
        assert_eq!(config.retry, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_query_defaults_rejects_inverted_delays() {
        let config = QueryDefaultsConfig {
            retry_base_delay_ms: 5_000,
            retry_max_delay_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_persistence_builder() {
        let config = PersistenceConfig::new("v1.0.0")
            .with_max_age(Duration::from_secs(60))
            .with_throttle(Duration::from_millis(250));
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(config.max_age(), Duration::from_secs(60));
        assert_eq!(config.throttle(), Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_persistence_requires_buster() {
        assert!(PersistenceConfig::new("  ").validate().is_err());
        assert!(PersistenceConfig::new("v1").with_throttle(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_persistence_deserialize_defaults() {
        let config: PersistenceConfig = serde_json::from_str(r#"{"buster":"v1.0.0"}"#).unwrap();
        assert_eq!(config, PersistenceConfig::new("v1.0.0"));
    }
}
