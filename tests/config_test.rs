//! Configuration system tests.

use metrics_shipper::core::{Config, ConfigBuilder, Region};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = Config::new().unwrap();
    assert_eq!(config.endpoint.region, Region::Cn);
    assert_eq!(config.collection.ttl, Duration::from_secs(100));
    assert_eq!(config.collection.flush_interval, Duration::from_secs(15));
    assert_eq!(config.collection.reservoir_capacity, 65_536);
    assert_eq!(config.delivery.max_queued_batches, 5000);
    assert_eq!(config.delivery.http_timeout, Duration::from_millis(800));
    assert_eq!(config.delivery.max_attempts, 2);
    assert!(config.reporter.enabled);
    assert_eq!(config.reporter.prefix, "byteplus.rec.sdk");
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .region(Region::Us)
        .ttl(Duration::from_secs(60))
        .flush_interval(Duration::from_secs(5))
        .max_attempts(1)
        .prefix("search.api")
        .base_tag("env", "staging")
        .enabled(false)
        .build()
        .unwrap();

    assert_eq!(
        config.endpoint.counter_url().unwrap(),
        "https://rec-us-east-1.byteplusapi.com/api/counter"
    );
    assert_eq!(config.collection.ttl, Duration::from_secs(60));
    assert_eq!(config.collection.flush_interval, Duration::from_secs(5));
    assert_eq!(config.delivery.max_attempts, 1);
    assert_eq!(config.reporter.prefix, "search.api");
    assert_eq!(config.reporter.base_tags.get("env"), Some(&"staging".to_string()));
    assert!(!config.reporter.enabled);
}

#[test]
fn test_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
endpoint:
  region: other
  domain: metrics.internal:8080
  scheme: http
collection:
  ttl: 2m
  flush_interval: 10s
delivery:
  max_queued_batches: 100
  http_timeout: 1s
reporter:
  host_tag: false
logging:
  level: debug
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(
        config.endpoint.store_url().unwrap(),
        "http://metrics.internal:8080/api/put"
    );
    assert_eq!(config.collection.ttl, Duration::from_secs(120));
    assert_eq!(config.collection.flush_interval, Duration::from_secs(10));
    assert_eq!(config.delivery.max_queued_batches, 100);
    assert_eq!(config.delivery.http_timeout, Duration::from_secs(1));
    assert!(!config.reporter.host_tag);
    assert_eq!(config.logging.level.as_str(), "debug");
}

#[test]
fn test_invalid_file_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "collection:\n  ttl: 0s\n").unwrap();
    assert!(Config::from_file(file.path()).is_err());

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "endpoint: [not, a, map]\n").unwrap();
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_missing_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::from_file(&dir.path().join("absent.yaml"));
    assert!(result.is_err());
}
