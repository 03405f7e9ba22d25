//! Validated configuration consumed by the data-access core.
//!
//! Loading, merging, and migration of configuration happen outside this
//! workspace; the core receives these structs already populated.

use crate::error::{Result, ScoutError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the database file, or `:memory:` for an ephemeral engine.
    pub path: PathBuf,
    /// Upper bound on simultaneously open engine handles.
    pub max_connections: usize,
    /// Timeout for acquiring a handle when the pool is saturated (ms).
    pub connection_timeout_ms: u64,
    /// Open the engine read-only.
    pub readonly: bool,
    /// Extra pragmas applied to every new connection, in order.
    pub pragmas: Vec<(String, String)>,
}

impl StorageConfig {
    /// Configuration for an in-memory engine (tests, ephemeral contexts).
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            ..Self::default()
        }
    }

    /// True when the engine lives in memory rather than on disk.
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }

    /// Set the maximum connection count.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the acquisition timeout.
    pub fn with_connection_timeout_ms(mut self, ms: u64) -> Self {
        self.connection_timeout_ms = ms;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ScoutError::config("Storage path cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(ScoutError::config(
                "max_connections must be greater than 0",
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ScoutError::config(
                "connection_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("code-scout.sqlite3"),
            max_connections: 10,
            connection_timeout_ms: 10_000,
            readonly: false,
            pragmas: Vec::new(),
        }
    }
}

/// Performance tuning for the pool, cache, and monitors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub connection_pool: ConnectionPoolConfig,
    pub query_cache: QueryCacheConfig,
    pub monitoring: MonitoringConfig,
    pub memory: MemoryConfig,
}

impl PerformanceConfig {
    /// Validate all nested sections.
    pub fn validate(&self) -> Result<()> {
        self.connection_pool.validate()?;
        if self.query_cache.enabled && self.query_cache.max_size == 0 {
            return Err(ScoutError::config(
                "query_cache.max_size must be greater than 0 when enabled",
            ));
        }
        Ok(())
    }
}

/// Connection pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPoolConfig {
    /// Connections created eagerly at startup (0 skips warm-up).
    pub min_connections: usize,
    /// Hard upper bound on live connections.
    pub max_connections: usize,
    /// A connection untouched for this long is replaced (ms).
    pub idle_timeout_ms: u64,
    /// Interval between background health sweeps (ms).
    pub validation_interval_ms: u64,
    /// Extra acquisition attempts after the first failure.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts (ms).
    pub retry_base_delay_ms: u64,
    /// Ceiling on the backoff delay (ms).
    pub retry_max_delay_ms: u64,
}

impl ConnectionPoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ScoutError::config(
                "connection_pool.max_connections must be greater than 0",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ScoutError::config(
                "connection_pool.min_connections cannot exceed max_connections",
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ScoutError::config(
                "connection_pool.retry_base_delay_ms cannot exceed retry_max_delay_ms",
            ));
        }
        Ok(())
    }
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            idle_timeout_ms: 300_000,
            validation_interval_ms: 30_000,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5_000,
        }
    }
}

/// Result cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCacheConfig {
    pub enabled: bool,
    /// Maximum cached result sets.
    pub max_size: u64,
    /// Entry time-to-live (ms).
    pub ttl_ms: u64,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 500,
            ttl_ms: 60_000,
        }
    }
}

/// Monitoring thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// How long derived statistics are considered fresh (ms).
    pub retention_ms: u64,
    /// Queries slower than this are counted and logged (ms).
    pub slow_query_threshold_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_ms: 3_600_000,
            slow_query_threshold_ms: 1_000,
        }
    }
}

/// Memory ceiling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub max_usage_bytes: u64,
    pub check_interval_ms: u64,
    pub optimization_enabled: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_usage_bytes: 256 * 1024 * 1024,
            check_interval_ms: 60_000,
            optimization_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_config() {
        let config = StorageConfig::in_memory();
        assert!(config.is_in_memory());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_max_connections_rejected() {
        let config = StorageConfig::in_memory().with_max_connections(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn pool_config_bounds() {
        let mut config = ConnectionPoolConfig::default();
        assert!(config.validate().is_ok());

        config.min_connections = config.max_connections + 1;
        assert!(config.validate().is_err());

        let mut config = ConnectionPoolConfig::default();
        config.retry_base_delay_ms = 10_000;
        config.retry_max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn performance_config_roundtrips_through_json() {
        let config = PerformanceConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PerformanceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.connection_pool.max_connections,
            config.connection_pool.max_connections
        );
        assert_eq!(back.query_cache.ttl_ms, config.query_cache.ttl_ms);
    }
}
