//! Configuration loading and validation

use anyhow::{Context, Result};
use reservoir_pool::PoolConfig;
use reservoir_remote::CacheNode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(String),
    /// The file was missing
    Defaults(String),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "Loaded configuration from {}", path),
            ConfigSource::Defaults(path) => {
                write!(f, "Config file not found at {}, using defaults", path)
            }
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Connection string the pool is created for
    #[serde(default = "default_identifier")]
    pub identifier: String,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Idle connections older than this are stale
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

impl PoolSettings {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_size: self.min_size,
            max_size: self.max_size,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            max_idle: Duration::from_secs(self.max_idle_secs),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            identifier: default_identifier(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_idle_secs: default_max_idle_secs(),
        }
    }
}

/// Sharded cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,
    /// Remote peers; empty runs the cache in local-only mode
    #[serde(default)]
    pub peers: Vec<CacheNode>,
}

impl CacheSettings {
    pub fn local_capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.local_capacity).ok_or_else(|| {
            ConfigError::Invalid("cache.local_capacity must be greater than 0".to_string())
        })
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            local_capacity: default_local_capacity(),
            peers: vec![],
        }
    }
}

/// Periodic maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: "pretty".to_string(),
        }
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind_address")]
    pub bind_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_metrics_bind_address(),
        }
    }
}

// Default value functions
fn default_identifier() -> String {
    "localhost:5432".to_string()
}

fn default_min_size() -> usize {
    5
}

fn default_max_size() -> usize {
    20
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

fn default_max_idle_secs() -> u64 {
    30 * 60
}

fn default_local_capacity() -> usize {
    1000
}

fn default_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_bind_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a file
    ///
    /// Runs before logging is set up, so the source is returned for the
    /// caller to log.
    pub fn load(path: &str) -> Result<(Self, ConfigSource)> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults(path.to_string())));
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok((config, ConfigSource::File(path.to_string())))
    }

    /// Reject settings the pool, cache or scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool
            .to_pool_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        self.cache.local_capacity()?;

        if self.maintenance.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "maintenance.interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.metrics.enabled {
            self.metrics_address()?;
        }

        Ok(())
    }

    pub fn metrics_address(&self) -> Result<SocketAddr, ConfigError> {
        self.metrics.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "metrics.bind_address is not a socket address: {}",
                self.metrics.bind_address
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let (config, source) = Config::load("/nonexistent/reservoir.toml").unwrap();
        assert_eq!(
            source,
            ConfigSource::Defaults("/nonexistent/reservoir.toml".to_string())
        );
        assert_eq!(config.pool.min_size, 5);
        assert_eq!(config.pool.max_size, 20);
        assert_eq!(config.cache.local_capacity, 1000);
        assert!(config.cache.peers.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
[pool]
identifier = "db.internal:5432"
min_size = 2
max_size = 8
acquire_timeout_ms = 250

[cache]
local_capacity = 64

[[cache.peers]]
address = "cache-a"
port = 7000

[[cache.peers]]
address = "cache-b"
port = 7001

[maintenance]
interval_secs = 15

[logging]
level = "debug"
format = "json"
"#,
        );

        let path = file.path().to_str().unwrap();
        let (config, source) = Config::load(path).unwrap();
        assert_eq!(source, ConfigSource::File(path.to_string()));
        assert_eq!(config.pool.identifier, "db.internal:5432");
        assert_eq!(config.pool.max_idle_secs, 1800);

        let pool = config.pool.to_pool_config();
        assert_eq!(pool.min_size, 2);
        assert_eq!(pool.max_size, 8);
        assert_eq!(pool.acquire_timeout, Duration::from_millis(250));

        assert_eq!(config.cache.local_capacity().unwrap().get(), 64);
        assert_eq!(config.cache.peers.len(), 2);
        assert_eq!(config.cache.peers[1], CacheNode::new("cache-b", 7001));
        assert_eq!(config.maintenance.interval_secs, 15);
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_error() {
        let file = write_config("[pool]\nmin_size = \"lots\"\n");
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_validate_rejects_min_above_max() {
        let mut config = Config::default();
        config.pool.min_size = 10;
        config.pool.max_size = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity_and_interval() {
        let mut config = Config::default();
        config.cache.local_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.maintenance.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_metrics_address() {
        let mut config = Config::default();
        config.metrics.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_ok());

        config.metrics.enabled = true;
        assert!(config.validate().is_err());

        config.metrics.bind_address = "127.0.0.1:9000".to_string();
        assert_eq!(config.metrics_address().unwrap().port(), 9000);
    }
}
