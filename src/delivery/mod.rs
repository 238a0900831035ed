//! HTTP delivery of flushed batches.
//!
//! One [`DeliveryTransport`] per destination URL, cached in a
//! [`TransportPool`]. All transports share one HTTP client so connections
//! are pooled process-wide.

pub mod transport;

pub use transport::{DeliveryStats, DeliveryTransport};

use crate::core::config::DeliveryConfig;
use crate::core::{MetricsError, Result};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(800);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Process-wide HTTP client used by every transport
pub fn http_client() -> &'static reqwest::Client {
    &HTTP_CLIENT
}

/// URL-keyed cache of delivery transports
pub struct TransportPool {
    config: DeliveryConfig,
    runtime: Handle,
    transports: DashMap<String, Arc<DeliveryTransport>>,
    creation_lock: Mutex<()>,
}

impl TransportPool {
    /// Create an empty pool on the current tokio runtime
    pub fn new(config: DeliveryConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| MetricsError::NoRuntime)?;
        Ok(Self::with_runtime(runtime, config))
    }

    /// Create an empty pool whose workers run on `runtime`
    pub fn with_runtime(runtime: Handle, config: DeliveryConfig) -> Self {
        Self {
            config,
            runtime,
            transports: DashMap::new(),
            creation_lock: Mutex::new(()),
        }
    }

    /// Transport for `url`, created on first request
    pub fn get_or_create(&self, url: &str) -> Arc<DeliveryTransport> {
        if let Some(transport) = self.transports.get(url) {
            return Arc::clone(transport.value());
        }

        let _guard = self.creation_lock.lock();
        if let Some(transport) = self.transports.get(url) {
            return Arc::clone(transport.value());
        }

        let transport = Arc::new(DeliveryTransport::with_runtime(&self.runtime, url, &self.config));
        self.transports.insert(url.to_string(), Arc::clone(&transport));
        transport
    }

    /// Every transport created so far
    pub fn transports(&self) -> Vec<Arc<DeliveryTransport>> {
        self.transports
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of distinct destinations
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    /// True when no transport was created yet
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Wait until every transport is idle or `timeout` passes; returns true if idle
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let transports = self.transports();
        let idle = async {
            while !transports.iter().all(|t| t.is_idle()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    /// Stop every worker and wait for them to exit
    pub async fn shutdown(&self) {
        for transport in self.transports() {
            transport.shutdown_and_wait().await;
        }
    }
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool")
            .field("transports", &self.transports.len())
            .finish()
    }
}
