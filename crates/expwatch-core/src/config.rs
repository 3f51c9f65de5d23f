//! Configuration structures for expwatch.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Remote table configuration
    pub remote: RemoteConfig,

    /// Persistent store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Scan and maintenance configuration
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Query endpoint configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Remote dynamic-field table configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// GraphQL endpoint URL
    pub endpoint: String,

    /// Object ID of the table that owns the dynamic fields
    pub parent_id: String,

    /// Fully qualified Move type of the dynamic field key (used for point lookups)
    pub name_type: String,

    /// Root label stored first in every key's label list
    #[serde(default = "default_root_label")]
    pub root_label: String,

    /// Number of fields requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Idle connections kept per host
    #[serde(default = "default_connection_pool_size")]
    pub connection_pool_size: usize,

    /// Circuit breaker settings for the endpoint
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Custom headers to send with requests
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds to wait before probing a failed endpoint again
    #[serde(default = "default_reset_timeout_seconds")]
    pub reset_timeout_seconds: u64,

    /// Successful probes needed to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_seconds: default_reset_timeout_seconds(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Data directory for the file backend
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Namespace prepended to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Persistent store backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Directory of checksummed value files (default)
    #[default]
    File,
    /// Process-local map, lost on exit
    Memory,
}

/// Scan, merge and maintenance tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// Days a record stays tracked after its expiration
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,

    /// Seconds after which a completed full scan is considered stale
    #[serde(default = "default_rescan_interval_seconds")]
    pub rescan_interval_seconds: u64,

    /// Days before grace end at which records are re-verified
    #[serde(default = "default_expiring_window_days")]
    pub expiring_window_days: u32,

    /// Pages fetched per invocation of the full scanner
    #[serde(default = "default_pages_per_invocation")]
    pub pages_per_invocation: usize,

    /// Concurrent point lookups per verification batch
    #[serde(default = "default_verify_batch_size")]
    pub verify_batch_size: usize,

    /// Upper bound on point lookups in one maintenance pass
    #[serde(default = "default_max_verifications_per_pass")]
    pub max_verifications_per_pass: usize,

    /// Number of snapshot shards
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,

    /// Invocation lease lifetime in seconds
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            rescan_interval_seconds: default_rescan_interval_seconds(),
            expiring_window_days: default_expiring_window_days(),
            pages_per_invocation: default_pages_per_invocation(),
            verify_batch_size: default_verify_batch_size(),
            max_verifications_per_pass: default_max_verifications_per_pass(),
            shard_count: default_shard_count(),
            lease_ttl_seconds: default_lease_ttl_seconds(),
        }
    }
}

/// Query endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Only records whose grace period ends within this many days are listed
    #[serde(default = "default_display_window_days")]
    pub display_window_days: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            display_window_days: default_display_window_days(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// HTTP port for query, health and metrics endpoints
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Drive invocations from the server on this interval (seconds)
    #[serde(default)]
    pub tick_interval_seconds: Option<u64>,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            tick_interval_seconds: None,
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions

fn default_root_label() -> String {
    "sui".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_connection_pool_size() -> usize {
    5
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_seconds() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    2
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./expwatch_data")
}

fn default_key_prefix() -> String {
    "expwatch".to_string()
}

fn default_grace_period_days() -> u32 {
    30
}

fn default_rescan_interval_seconds() -> u64 {
    86_400 // 24 hours
}

fn default_expiring_window_days() -> u32 {
    7
}

fn default_pages_per_invocation() -> usize {
    10
}

fn default_verify_batch_size() -> usize {
    10
}

fn default_max_verifications_per_pass() -> usize {
    200
}

fn default_shard_count() -> u32 {
    16
}

fn default_lease_ttl_seconds() -> u64 {
    300
}

fn default_display_window_days() -> u32 {
    7
}

fn default_http_port() -> u16 {
    8080
}

impl RemoteConfig {
    /// Remote settings for a table, with defaults for everything else.
    pub fn new(
        endpoint: impl Into<String>,
        parent_id: impl Into<String>,
        name_type: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            parent_id: parent_id.into(),
            name_type: name_type.into(),
            root_label: default_root_label(),
            page_size: default_page_size(),
            request_timeout_seconds: default_request_timeout_seconds(),
            connection_pool_size: default_connection_pool_size(),
            circuit_breaker: CircuitBreakerSettings::default(),
            custom_headers: HashMap::new(),
        }
    }
}

impl Config {
    /// Configuration with defaults around the given remote table.
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            remote,
            store: StoreConfig::default(),
            tracker: TrackerConfig::default(),
            query: QueryConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.remote.endpoint.is_empty() {
            return Err(crate::Error::Config("Remote endpoint is required".into()));
        }

        if self.remote.parent_id.is_empty() {
            return Err(crate::Error::Config("Remote parent_id is required".into()));
        }

        if self.remote.name_type.is_empty() {
            return Err(crate::Error::Config("Remote name_type is required".into()));
        }

        if self.remote.page_size == 0 {
            return Err(crate::Error::Config("page_size must be positive".into()));
        }

        if self.tracker.pages_per_invocation == 0 {
            return Err(crate::Error::Config(
                "pages_per_invocation must be positive".into(),
            ));
        }

        if self.tracker.verify_batch_size == 0 {
            return Err(crate::Error::Config(
                "verify_batch_size must be positive".into(),
            ));
        }

        if self.tracker.shard_count == 0 {
            return Err(crate::Error::Config("shard_count must be positive".into()));
        }

        if self.tracker.grace_period_days == 0 {
            return Err(crate::Error::Config(
                "grace_period_days must be positive".into(),
            ));
        }

        if self.tracker.expiring_window_days > self.tracker.grace_period_days {
            return Err(crate::Error::Config(
                "expiring_window_days cannot exceed grace_period_days".into(),
            ));
        }

        if self.tracker.lease_ttl_seconds == 0 {
            return Err(crate::Error::Config(
                "lease_ttl_seconds must be positive".into(),
            ));
        }

        if self.store.key_prefix.is_empty() || self.store.key_prefix.ends_with('/') {
            return Err(crate::Error::Config(
                "key_prefix must be non-empty and not end with '/'".into(),
            ));
        }

        if self.query.display_window_days > self.tracker.grace_period_days {
            tracing::warn!(
                display_window_days = self.query.display_window_days,
                grace_period_days = self.tracker.grace_period_days,
                "Display window exceeds grace period; every expired record will be listed"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::new(RemoteConfig::new(
            "https://graphql.example.org/graphql",
            "0xabc",
            "0x1::domain::Domain",
        ))
    }

    #[test]
    fn test_default_tracker_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.grace_period_days, 30);
        assert_eq!(config.rescan_interval_seconds, 86_400);
        assert_eq!(config.expiring_window_days, 7);
        assert_eq!(config.verify_batch_size, 10);
        assert_eq!(config.shard_count, 16);
    }

    #[test]
    fn test_config_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_endpoint() {
        let mut config = test_config();
        config.remote.endpoint.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_window_exceeds_grace() {
        let mut config = test_config();
        config.tracker.expiring_window_days = 31;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_batch() {
        let mut config = test_config();
        config.tracker.verify_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_prefix() {
        let mut config = test_config();
        config.store.key_prefix = "expwatch/".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [remote]
            endpoint = "https://graphql.example.org/graphql"
            parent_id = "0xabc"
            name_type = "0x1::domain::Domain"

            [store]
            backend = "memory"

            [tracker]
            pages_per_invocation = 3

            [monitoring]
            log_format = "text"
            tick_interval_seconds = 60
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.remote.page_size, 50);
        assert_eq!(config.remote.root_label, "sui");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.tracker.pages_per_invocation, 3);
        assert_eq!(config.tracker.grace_period_days, 30);
        assert_eq!(config.query.display_window_days, 7);
        assert_eq!(config.monitoring.log_format, LogFormat::Text);
        assert_eq!(config.monitoring.tick_interval_seconds, Some(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_level_directive() {
        assert_eq!(LogLevel::default().as_directive(), "info");
        assert_eq!(LogLevel::Trace.as_directive(), "trace");
    }
}
