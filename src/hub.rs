//! Process-level owner of metrics clients and delivery transports.

use crate::core::{Config, MetricsError, Result};
use crate::delivery::TransportPool;
use crate::metrics::registry::MetricsClient;
use crate::metrics::types::BatchSink;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

static GLOBAL: OnceCell<MetricsHub> = OnceCell::new();

/// One [`MetricsClient`] per prefix, all feeding the same destinations.
///
/// Counters and timers go to the counter endpoint, stores to the store
/// endpoint.
pub struct MetricsHub {
    config: Config,
    runtime: Handle,
    transports: TransportPool,
    counter_sink: Arc<dyn BatchSink>,
    store_sink: Arc<dyn BatchSink>,
    clients: DashMap<String, Arc<MetricsClient>>,
    creation_lock: Mutex<()>,
}

impl MetricsHub {
    /// Validate `config` and start HTTP transports for its endpoints
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| MetricsError::NoRuntime)?;

        let counter_url = config.endpoint.counter_url()?;
        let store_url = config.endpoint.store_url()?;

        let transports = TransportPool::with_runtime(runtime.clone(), config.delivery.clone());
        let counter_sink: Arc<dyn BatchSink> = transports.get_or_create(&counter_url);
        let store_sink: Arc<dyn BatchSink> = transports.get_or_create(&store_url);

        tracing::info!(counter_url = %counter_url, store_url = %store_url, "Metrics hub started");

        Ok(Self {
            config,
            runtime,
            transports,
            counter_sink,
            store_sink,
            clients: DashMap::new(),
            creation_lock: Mutex::new(()),
        })
    }

    /// Hub delivering to caller-provided sinks instead of HTTP
    pub fn with_sinks(
        config: Config,
        counter_sink: Arc<dyn BatchSink>,
        store_sink: Arc<dyn BatchSink>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| MetricsError::NoRuntime)?;
        let transports = TransportPool::with_runtime(runtime.clone(), config.delivery.clone());

        Ok(Self {
            config,
            runtime,
            transports,
            counter_sink,
            store_sink,
            clients: DashMap::new(),
            creation_lock: Mutex::new(()),
        })
    }

    /// Initialize the process-wide hub on first call; later calls return the
    /// existing hub and ignore `config`
    pub fn init_global(config: Config) -> Result<&'static MetricsHub> {
        GLOBAL.get_or_try_init(|| MetricsHub::new(config))
    }

    /// The process-wide hub, if initialized
    pub fn global() -> Option<&'static MetricsHub> {
        GLOBAL.get()
    }

    /// Configuration the hub was built from
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Client for `prefix`, created once and reused
    pub fn client(&self, prefix: &str) -> Arc<MetricsClient> {
        if let Some(client) = self.clients.get(prefix) {
            return Arc::clone(client.value());
        }

        let _guard = self.creation_lock.lock();
        if let Some(client) = self.clients.get(prefix) {
            return Arc::clone(client.value());
        }

        let client = Arc::new(MetricsClient::with_runtime(
            self.runtime.clone(),
            prefix,
            &self.config.collection,
            Arc::clone(&self.counter_sink),
            Arc::clone(&self.store_sink),
        ));
        self.clients.insert(prefix.to_string(), Arc::clone(&client));
        client
    }

    /// Client for the configured reporter prefix
    pub fn default_client(&self) -> Arc<MetricsClient> {
        self.client(&self.config.reporter.prefix)
    }

    /// HTTP transports owned by this hub
    pub fn transports(&self) -> &TransportPool {
        &self.transports
    }

    /// Flush every series of every client now; returns requests emitted
    pub fn flush_all(&self) -> usize {
        let clients: Vec<_> = self.clients.iter().map(|c| Arc::clone(c.value())).collect();
        clients.iter().map(|c| c.flush_all()).sum()
    }

    /// Wait until all transports drained their queues or `timeout` passes
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.transports.wait_idle(timeout).await
    }

    /// Close every client and stop every delivery worker
    pub async fn shutdown(&self) {
        for client in self.clients.iter() {
            client.close();
        }
        self.transports.shutdown().await;
        tracing::info!("Metrics hub shut down");
    }
}

impl fmt::Debug for MetricsHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsHub")
            .field("clients", &self.clients.len())
            .field("transports", &self.transports)
            .finish()
    }
}
