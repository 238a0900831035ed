//! Application-facing metrics facade.
//!
//! A [`MetricsReporter`] merges its base tags into every call and forwards
//! to a [`MetricsClient`]. When disabled every call is a no-op and no client
//! is ever created.
//!
//! ```no_run
//! use metrics_shipper::core::Config;
//! use metrics_shipper::hub::MetricsHub;
//! use metrics_shipper::metrics::tags_from_pairs;
//! use metrics_shipper::reporter::ReporterBuilder;
//! use std::time::Instant;
//!
//! # async fn run() -> metrics_shipper::Result<()> {
//! let hub = MetricsHub::new(Config::new()?)?;
//! let reporter = ReporterBuilder::new().prefix("recommend.sdk").build(&hub);
//!
//! let start = Instant::now();
//! let tags = tags_from_pairs(&[("method", "user")]);
//! reporter.counter("request.count", 1, &tags);
//! reporter.latency("request.cost", start, &tags);
//! # Ok(())
//! # }
//! ```

use crate::core::config::ReporterConfig;
use crate::core::MetricsError;
use crate::hub::MetricsHub;
use crate::metrics::registry::MetricsClient;
use crate::metrics::tags::{merge_tags, parse_tag_kvs, Tags};
use std::error::Error;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::time::Instant;

/// Tag key carrying the exception classification
pub const MESSAGE_TAG: &str = "message";

/// Tag key carrying the local address
pub const HOST_TAG: &str = "host";

/// Builder for [`MetricsReporter`]
#[derive(Debug, Clone)]
pub struct ReporterBuilder {
    enabled: bool,
    prefix: String,
    base_tags: Tags,
    host_tag: bool,
}

impl Default for ReporterBuilder {
    fn default() -> Self {
        Self::from_config(&ReporterConfig::default())
    }
}

impl ReporterBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded from the `reporter` config section
    pub fn from_config(config: &ReporterConfig) -> Self {
        Self {
            enabled: config.enabled,
            prefix: config.prefix.clone(),
            base_tags: config.base_tags.clone(),
            host_tag: config.host_tag,
        }
    }

    /// Turn reporting on or off
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Name prefix; an empty prefix keeps the current one
    pub fn prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            self.prefix = prefix;
        }
        self
    }

    /// Add one tag attached to every observation
    pub fn base_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.base_tags.insert(key.into(), value.into());
        self
    }

    /// Add several base tags
    pub fn base_tags(mut self, tags: Tags) -> Self {
        self.base_tags.extend(tags);
        self
    }

    /// Add `host=<local address>` to the base tags
    pub fn host_tag(mut self, enabled: bool) -> Self {
        self.host_tag = enabled;
        self
    }

    /// Build a reporter on the hub's client for the configured prefix
    pub fn build(self, hub: &MetricsHub) -> MetricsReporter {
        if !self.enabled {
            return MetricsReporter::disabled();
        }
        let client = hub.client(&self.prefix);
        self.build_with_client(client)
    }

    /// Build a reporter on an existing client; its prefix wins over the builder's
    pub fn build_with_client(mut self, client: Arc<MetricsClient>) -> MetricsReporter {
        if !self.enabled {
            return MetricsReporter::disabled();
        }
        if self.host_tag {
            self.base_tags
                .entry(HOST_TAG.to_string())
                .or_insert_with(|| local_host_addr().to_string());
        }
        MetricsReporter {
            client: Some(client),
            base_tags: self.base_tags,
        }
    }
}

/// Emits counters, stores and timers with base tags applied
#[derive(Debug, Clone)]
pub struct MetricsReporter {
    client: Option<Arc<MetricsClient>>,
    base_tags: Tags,
}

impl MetricsReporter {
    /// A reporter that drops everything
    pub fn disabled() -> Self {
        Self {
            client: None,
            base_tags: Tags::new(),
        }
    }

    /// True when calls reach a client
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Tags merged into every call
    pub fn base_tags(&self) -> &Tags {
        &self.base_tags
    }

    fn tags(&self, call_site: &Tags) -> Tags {
        merge_tags(&self.base_tags, call_site)
    }

    /// Add `delta` to counter `name`
    pub fn counter(&self, name: &str, delta: i64, tags: &Tags) {
        if let Some(client) = &self.client {
            client.emit_counter(name, delta, &self.tags(tags));
        }
    }

    /// Set store `name` to `value`
    pub fn store(&self, name: &str, value: f64, tags: &Tags) {
        if let Some(client) = &self.client {
            client.emit_store(name, value, &self.tags(tags));
        }
    }

    /// Record `elapsed_ms` on timer `name`
    pub fn timer(&self, name: &str, elapsed_ms: u64, tags: &Tags) {
        if let Some(client) = &self.client {
            client.emit_timer(name, elapsed_ms, &self.tags(tags));
        }
    }

    /// Record the milliseconds elapsed since `start` on timer `name`
    pub fn latency(&self, name: &str, start: Instant, tags: &Tags) {
        if self.client.is_none() {
            return;
        }
        let elapsed = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.timer(name, elapsed, tags);
    }

    /// Record latency for a failed call, tagged with `message=<kind>` where
    /// kind is `connect-timeout`, `read-timeout`, `timeout` or `other`
    pub fn exception(&self, name: &str, start: Instant, error: &(dyn Error + 'static), tags: &Tags) {
        if self.client.is_none() {
            return;
        }
        let mut tags = tags.clone();
        tags.insert(MESSAGE_TAG.to_string(), classify_error(error).to_string());
        self.latency(name, start, &tags);
    }

    /// [`counter`](Self::counter) with `"key:value"` tag strings
    pub fn counter_kv(&self, name: &str, delta: i64, tag_kvs: &[&str]) {
        if let Some(tags) = self.parse_kvs(name, tag_kvs) {
            self.counter(name, delta, &tags);
        }
    }

    /// [`store`](Self::store) with `"key:value"` tag strings
    pub fn store_kv(&self, name: &str, value: f64, tag_kvs: &[&str]) {
        if let Some(tags) = self.parse_kvs(name, tag_kvs) {
            self.store(name, value, &tags);
        }
    }

    /// [`timer`](Self::timer) with `"key:value"` tag strings
    pub fn timer_kv(&self, name: &str, elapsed_ms: u64, tag_kvs: &[&str]) {
        if let Some(tags) = self.parse_kvs(name, tag_kvs) {
            self.timer(name, elapsed_ms, &tags);
        }
    }

    /// [`latency`](Self::latency) with `"key:value"` tag strings
    pub fn latency_kv(&self, name: &str, start: Instant, tag_kvs: &[&str]) {
        if let Some(tags) = self.parse_kvs(name, tag_kvs) {
            self.latency(name, start, &tags);
        }
    }

    fn parse_kvs(&self, name: &str, tag_kvs: &[&str]) -> Option<Tags> {
        if self.client.is_none() {
            return None;
        }
        match parse_tag_kvs(tag_kvs) {
            Ok(tags) => Some(tags),
            Err(e) => {
                tracing::warn!(metric = name, "Dropping observation: {}", e);
                None
            },
        }
    }
}

/// Classify an error chain for the `message` tag
pub fn classify_error(error: &(dyn Error + 'static)) -> &'static str {
    let mut current: Option<&(dyn Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(kind) = classify_one(err) {
            return kind;
        }
        current = err.source();
    }
    "other"
}

fn classify_one(err: &(dyn Error + 'static)) -> Option<&'static str> {
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        if e.is_timeout() {
            return Some(if e.is_connect() { "connect-timeout" } else { "timeout" });
        }
        return None;
    }

    if let Some(MetricsError::Timeout { .. }) = err.downcast_ref::<MetricsError>() {
        return Some("timeout");
    }

    if let Some(e) = err.downcast_ref::<std::io::Error>() {
        if e.kind() == std::io::ErrorKind::TimedOut {
            let message = e.to_string().to_lowercase();
            if message.contains("connect") {
                return Some("connect-timeout");
            }
            if message.contains("read") {
                return Some("read-timeout");
            }
            return Some("timeout");
        }
        return None;
    }

    if err.is::<tokio::time::error::Elapsed>() {
        return Some("timeout");
    }

    None
}

/// Best-effort local IP address; loopback when no route is available.
///
/// Connecting a UDP socket sends nothing, it only selects the outbound
/// interface.
pub fn local_host_addr() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
