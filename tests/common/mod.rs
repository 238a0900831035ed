//! Common test utilities and fixtures.

#![allow(dead_code)]

use metrics_shipper::core::config::CollectionConfig;
use metrics_shipper::core::{Config, ConfigBuilder};
use metrics_shipper::metrics::{Batch, BatchSink, MetricRequest, MetricValue};
use parking_lot::Mutex;
use std::time::Duration;

/// Sink that keeps every batch it receives.
#[derive(Default)]
pub struct CollectingSink {
    batches: Mutex<Vec<Batch>>,
}

impl BatchSink for CollectingSink {
    fn enqueue(&self, batch: Batch) {
        self.batches.lock().push(batch);
    }
}

impl CollectingSink {
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    pub fn requests(&self) -> Vec<MetricRequest> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Value of the single request named `metric`
    pub fn value_of(&self, metric: &str) -> Option<MetricValue> {
        self.requests()
            .into_iter()
            .find(|r| r.metric == metric)
            .map(|r| r.value)
    }
}

/// Collection settings that never flush on their own during a test.
pub fn manual_flush_collection(ttl: Duration) -> CollectionConfig {
    CollectionConfig {
        ttl,
        flush_interval: Duration::from_secs(3600),
        reservoir_capacity: 1024,
        max_flush_items: 10_000,
        max_pending_observations: 10_000,
    }
}

/// Config pointing at `server_uri` (e.g. a wiremock server), host tag off.
pub fn config_for(server_uri: &str) -> Config {
    let (scheme, host) = server_uri
        .split_once("://")
        .unwrap_or(("http", server_uri));

    ConfigBuilder::new()
        .scheme(scheme)
        .domain(host)
        .flush_interval(Duration::from_secs(3600))
        .http_timeout(Duration::from_millis(500))
        .prefix("test.sdk")
        .host_tag(false)
        .build()
        .unwrap()
}
