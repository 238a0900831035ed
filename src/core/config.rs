//! Configuration management for the metrics shipper.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Builder overrides for programmatic use
//! - Validation and defaults

use crate::core::{MetricsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Complete configuration for the metrics pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Destination endpoint selection
    pub endpoint: EndpointConfig,
    /// Series aggregation settings
    pub collection: CollectionConfig,
    /// Batch delivery settings
    pub delivery: DeliveryConfig,
    /// Reporter facade settings
    pub reporter: ReporterConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Deployment region, selects the default metrics host
    pub region: Region,
    /// Explicit host, overrides the region default
    pub domain: Option<String>,
    /// URL scheme
    pub scheme: String,
    /// Path receiving counter and timer batches
    pub counter_path: String,
    /// Path receiving gauge batches
    pub store_path: String,
}

/// Aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Idle time after which a series is evicted
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Interval between flushes of a series
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Sample capacity of each timer reservoir
    pub reservoir_capacity: usize,
    /// Maximum queued observations drained per flush cycle
    pub max_flush_items: usize,
    /// Maximum observations waiting in one series' inbound queue
    pub max_pending_observations: usize,
}

/// Delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Maximum batches queued per destination before new batches are dropped
    pub max_queued_batches: usize,
    /// Timeout of a single HTTP attempt
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Attempts per batch, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

/// Reporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// When false every reporter call is a no-op
    pub enabled: bool,
    /// Namespace prefix prepended to every metric name
    pub prefix: String,
    /// Tags added to every observation
    pub base_tags: BTreeMap<String, String>,
    /// Add a `host` tag with the local address
    pub host_tag: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
}

/// Deployment regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Mainland China
    Cn,
    /// US East
    Us,
    /// Singapore
    Sg,
    /// Air deployments
    Air,
    /// Custom deployment, needs an explicit domain
    Other,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            region: Region::Cn,
            domain: None,
            scheme: "https".to_string(),
            counter_path: "/api/counter".to_string(),
            store_path: "/api/put".to_string(),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            ttl: Duration::from_secs(100),
            flush_interval: Duration::from_secs(15),
            reservoir_capacity: 65_536,
            max_flush_items: 65_536,
            max_pending_observations: 65_536,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            max_queued_batches: 5000,
            http_timeout: Duration::from_millis(800),
            max_attempts: 2,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        ReporterConfig {
            enabled: true,
            prefix: "byteplus.rec.sdk".to_string(),
            base_tags: BTreeMap::new(),
            host_tag: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
        }
    }
}

impl Region {
    /// Default metrics host for the region
    pub fn default_host(&self) -> Option<&'static str> {
        match self {
            Region::Cn => Some("rec-b.volcengineapi.com"),
            Region::Us => Some("rec-us-east-1.byteplusapi.com"),
            Region::Sg => Some("rec-ap-singapore-1.byteplusapi.com"),
            Region::Air => Some("byteair-api-cn1.snssdk.com"),
            Region::Other => None,
        }
    }
}

impl std::str::FromStr for Region {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cn" => Ok(Region::Cn),
            "us" => Ok(Region::Us),
            "sg" => Ok(Region::Sg),
            "air" => Ok(Region::Air),
            "other" => Ok(Region::Other),
            other => Err(MetricsError::config(format!(
                "unknown region '{}', expected cn, us, sg, air or other",
                other
            ))),
        }
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl EndpointConfig {
    /// Host the batches are sent to
    pub fn host(&self) -> Result<&str> {
        match (&self.domain, self.region.default_host()) {
            (Some(domain), _) => Ok(domain.as_str()),
            (None, Some(host)) => Ok(host),
            (None, None) => Err(MetricsError::config(
                "region 'other' requires an explicit endpoint domain",
            )),
        }
    }

    /// Destination of counter and timer batches
    pub fn counter_url(&self) -> Result<String> {
        Ok(format!("{}://{}{}", self.scheme, self.host()?, self.counter_path))
    }

    /// Destination of gauge batches
    pub fn store_url(&self) -> Result<String> {
        Ok(format!("{}://{}{}", self.scheme, self.host()?, self.store_path))
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MetricsError::config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        ConfigBuilder::new().from_yaml(&content)?.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.endpoint.host()?;

        if self.endpoint.scheme.is_empty() {
            return Err(MetricsError::config("endpoint scheme must not be empty"));
        }

        for (field, path) in [
            ("counter_path", &self.endpoint.counter_path),
            ("store_path", &self.endpoint.store_path),
        ] {
            if !path.starts_with('/') {
                return Err(MetricsError::config(format!(
                    "{} must start with '/', got '{}'",
                    field, path
                )));
            }
        }

        // Collection validation
        if self.collection.ttl.is_zero() {
            return Err(MetricsError::config("ttl must be greater than 0"));
        }

        if self.collection.flush_interval.is_zero() {
            return Err(MetricsError::config("flush_interval must be greater than 0"));
        }

        if self.collection.reservoir_capacity == 0 {
            return Err(MetricsError::config("reservoir_capacity must be greater than 0"));
        }

        if self.collection.max_flush_items == 0 {
            return Err(MetricsError::config("max_flush_items must be greater than 0"));
        }

        if self.collection.max_pending_observations == 0 {
            return Err(MetricsError::config(
                "max_pending_observations must be greater than 0",
            ));
        }

        // Delivery validation
        if self.delivery.max_queued_batches == 0 {
            return Err(MetricsError::config("max_queued_batches must be greater than 0"));
        }

        if self.delivery.http_timeout.is_zero() {
            return Err(MetricsError::config("http_timeout must be greater than 0"));
        }

        if self.delivery.max_attempts == 0 {
            return Err(MetricsError::config("max_attempts must be at least 1"));
        }

        Ok(())
    }
}

/// Configuration builder for programmatic construction
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| MetricsError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set the region
    pub fn region(mut self, region: Region) -> Self {
        self.config.endpoint.region = region;
        self
    }

    /// Set an explicit endpoint host (may include a port)
    pub fn domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.config.endpoint.domain = Some(domain.into());
        self
    }

    /// Set the URL scheme
    pub fn scheme<S: Into<String>>(mut self, scheme: S) -> Self {
        self.config.endpoint.scheme = scheme.into();
        self
    }

    /// Set series TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.collection.ttl = ttl;
        self
    }

    /// Set flush interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.collection.flush_interval = interval;
        self
    }

    /// Set reservoir capacity
    pub fn reservoir_capacity(mut self, capacity: usize) -> Self {
        self.config.collection.reservoir_capacity = capacity;
        self
    }

    /// Set max items drained per flush
    pub fn max_flush_items(mut self, count: usize) -> Self {
        self.config.collection.max_flush_items = count;
        self
    }

    /// Set the per-destination batch queue bound
    pub fn max_queued_batches(mut self, count: usize) -> Self {
        self.config.delivery.max_queued_batches = count;
        self
    }

    /// Set HTTP timeout
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery.http_timeout = timeout;
        self
    }

    /// Set delivery attempts per batch
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.delivery.max_attempts = attempts;
        self
    }

    /// Enable or disable reporting
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.reporter.enabled = enabled;
        self
    }

    /// Set the metric name prefix
    pub fn prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.reporter.prefix = prefix.into();
        self
    }

    /// Add a base tag
    pub fn base_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.reporter.base_tags.insert(key.into(), value.into());
        self
    }

    /// Enable or disable the automatic host tag
    pub fn host_tag(mut self, enabled: bool) -> Self {
        self.config.reporter.host_tag = enabled;
        self
    }

    /// Set the log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.collection.ttl, Duration::from_secs(100));
        assert_eq!(config.collection.flush_interval, Duration::from_secs(15));
        assert_eq!(config.delivery.max_queued_batches, 5000);
        assert_eq!(config.delivery.http_timeout, Duration::from_millis(800));
    }

    #[test]
    fn test_region_urls() {
        let config = Config::default();
        assert_eq!(
            config.endpoint.counter_url().unwrap(),
            "https://rec-b.volcengineapi.com/api/counter"
        );
        assert_eq!(
            config.endpoint.store_url().unwrap(),
            "https://rec-b.volcengineapi.com/api/put"
        );

        let config = ConfigBuilder::new()
            .region(Region::Sg)
            .build()
            .unwrap();
        assert_eq!(
            config.endpoint.counter_url().unwrap(),
            "https://rec-ap-singapore-1.byteplusapi.com/api/counter"
        );
    }

    #[test]
    fn test_region_from_str() {
        assert_eq!("SG".parse::<Region>().unwrap(), Region::Sg);
        assert_eq!("air".parse::<Region>().unwrap(), Region::Air);
        assert!("mars".parse::<Region>().is_err());
    }

    #[test]
    fn test_domain_overrides_region() {
        let config = ConfigBuilder::new()
            .domain("127.0.0.1:9000")
            .scheme("http")
            .build()
            .unwrap();
        assert_eq!(
            config.endpoint.store_url().unwrap(),
            "http://127.0.0.1:9000/api/put"
        );
    }

    #[test]
    fn test_other_region_requires_domain() {
        let result = ConfigBuilder::new().region(Region::Other).build();
        assert!(result.is_err());

        let result = ConfigBuilder::new()
            .region(Region::Other)
            .domain("metrics.internal")
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(ConfigBuilder::new().ttl(Duration::ZERO).build().is_err());
        assert!(ConfigBuilder::new()
            .flush_interval(Duration::ZERO)
            .build()
            .is_err());
        assert!(ConfigBuilder::new().reservoir_capacity(0).build().is_err());
        assert!(ConfigBuilder::new().max_queued_batches(0).build().is_err());
        assert!(ConfigBuilder::new().max_attempts(0).build().is_err());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
endpoint:
  region: us
collection:
  ttl: 30s
  flush_interval: 5s
  reservoir_capacity: 1024
delivery:
  http_timeout: 500ms
  max_attempts: 1
reporter:
  prefix: "search.api"
  base_tags:
    env: prod
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

        assert_eq!(config.endpoint.region, Region::Us);
        assert_eq!(config.collection.ttl, Duration::from_secs(30));
        assert_eq!(config.collection.flush_interval, Duration::from_secs(5));
        assert_eq!(config.collection.reservoir_capacity, 1024);
        // Unset fields in a section keep their defaults
        assert_eq!(config.collection.max_flush_items, 65_536);
        assert_eq!(config.delivery.http_timeout, Duration::from_millis(500));
        assert_eq!(config.delivery.max_attempts, 1);
        assert_eq!(config.reporter.prefix, "search.api");
        assert_eq!(config.reporter.base_tags.get("env"), Some(&"prod".to_string()));
    }
}
