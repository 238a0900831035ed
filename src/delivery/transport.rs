//! Bounded batched delivery to one endpoint URL.

use crate::core::config::DeliveryConfig;
use crate::core::retry::{retry_with_config, RetryConfig};
use crate::core::{MetricsError, Result};
use crate::delivery::http_client;
use crate::metrics::types::{Batch, BatchSink};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const JSON: &str = "application/json";

/// Delivery counters for one transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Batches accepted onto the queue
    pub enqueued: u64,
    /// Batches the endpoint acknowledged
    pub delivered: u64,
    /// Batches given up on after retries, or that failed to serialize
    pub failed: u64,
    /// Batches rejected because the queue was full or closed
    pub dropped: u64,
    /// Batches discarded at shutdown while still queued
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
    /// Queued plus in flight
    pending: AtomicUsize,
}

#[derive(Debug, Clone)]
struct WorkerSettings {
    url: String,
    timeout: Duration,
    retry: RetryConfig,
}

/// Single-worker delivery queue for one endpoint.
///
/// `enqueue` never blocks: a full queue drops the batch. The worker POSTs
/// one batch at a time and never requeues a batch after its retries run out.
pub struct DeliveryTransport {
    url: String,
    capacity: usize,
    tx: mpsc::Sender<Batch>,
    stop_tx: watch::Sender<bool>,
    counters: Arc<Counters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryTransport {
    /// Create a transport for `url`, spawning its worker on the current runtime
    pub fn new(url: impl Into<String>, config: &DeliveryConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| MetricsError::NoRuntime)?;
        Ok(Self::with_runtime(&runtime, url, config))
    }

    /// Create a transport whose worker runs on `runtime`
    pub fn with_runtime(runtime: &Handle, url: impl Into<String>, config: &DeliveryConfig) -> Self {
        let url = url.into();
        let capacity = config.max_queued_batches.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let settings = WorkerSettings {
            url: url.clone(),
            timeout: config.http_timeout,
            retry: RetryConfig {
                max_attempts: config.max_attempts,
                initial_backoff: config.retry_backoff,
                ..RetryConfig::default()
            },
        };
        let handle = runtime.spawn(run_worker(settings, rx, stop_rx, Arc::clone(&counters)));

        tracing::debug!(url = %url, capacity, "Delivery transport started");

        Self {
            url,
            capacity,
            tx,
            stop_tx,
            counters,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Destination URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Maximum batches waiting for the worker
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the delivery counters
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// True when nothing is queued or in flight
    pub fn is_idle(&self) -> bool {
        self.counters.pending.load(Ordering::Acquire) == 0
    }

    /// Try to queue a batch, reporting why it was rejected
    pub fn try_enqueue(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(batch) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) => {
                self.counters.pending.fetch_sub(1, Ordering::AcqRel);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                match e {
                    TrySendError::Full(_) => Err(MetricsError::QueueFull {
                        capacity: self.capacity,
                    }),
                    TrySendError::Closed(_) => Err(MetricsError::ChannelClosed),
                }
            },
        }
    }

    /// Stop the worker; queued batches are discarded, not sent
    pub fn shutdown(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Stop the worker and wait for it to exit
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(url = %self.url, "Delivery worker join error: {}", e);
            }
        }
    }
}

impl BatchSink for DeliveryTransport {
    fn enqueue(&self, batch: Batch) {
        let size = batch.len();
        match self.try_enqueue(batch) {
            Ok(()) => {},
            Err(MetricsError::QueueFull { capacity }) => {
                tracing::warn!(
                    url = %self.url,
                    capacity,
                    size,
                    dropped = self.counters.dropped.load(Ordering::Relaxed),
                    "Delivery queue full, dropping batch"
                );
            },
            Err(e) => {
                tracing::debug!(url = %self.url, size, "Batch not queued: {}", e);
            },
        }
    }
}

impl Drop for DeliveryTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DeliveryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryTransport")
            .field("url", &self.url)
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn run_worker(
    settings: WorkerSettings,
    mut rx: mpsc::Receiver<Batch>,
    mut stop_rx: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            batch = rx.recv() => {
                let Some(batch) = batch else {
                    break;
                };
                match deliver(&settings, &batch).await {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(url = %settings.url, size = batch.len(), "Delivered batch");
                    },
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            url = %settings.url,
                            size = batch.len(),
                            category = e.category(),
                            "Dropping batch after delivery failure: {}",
                            e
                        );
                    },
                }
                counters.pending.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    rx.close();
    let mut discarded = 0_u64;
    while rx.try_recv().is_ok() {
        discarded += 1;
        counters.pending.fetch_sub(1, Ordering::AcqRel);
    }
    counters.discarded.fetch_add(discarded, Ordering::Relaxed);

    tracing::debug!(url = %settings.url, discarded, "Delivery worker stopped");
}

async fn deliver(settings: &WorkerSettings, batch: &Batch) -> Result<()> {
    let body = serde_json::to_vec(batch)?;
    retry_with_config(&settings.retry, || post_batch(settings, body.clone())).await
}

async fn post_batch(settings: &WorkerSettings, body: Vec<u8>) -> Result<()> {
    let response = http_client()
        .post(&settings.url)
        .header(CONTENT_TYPE, JSON)
        .header(ACCEPT, JSON)
        .timeout(settings.timeout)
        .body(body)
        .send()
        .await
        .map_err(|e| request_error(e, settings.timeout))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MetricsError::HttpStatus {
            status: status.as_u16(),
            url: settings.url.clone(),
        });
    }
    Ok(())
}

fn request_error(error: reqwest::Error, timeout: Duration) -> MetricsError {
    if error.is_timeout() {
        MetricsError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        MetricsError::network(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::types::MetricRequest;
    use crate::metrics::tags::Tags;

    fn batch(metric: &str) -> Batch {
        vec![MetricRequest::new(metric.to_string(), 1, 1_i64, Tags::new())]
    }

    fn config(max_queued_batches: usize) -> DeliveryConfig {
        DeliveryConfig {
            max_queued_batches,
            http_timeout: Duration::from_millis(200),
            max_attempts: 1,
            retry_backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        // Current-thread runtime: the worker cannot pull until we yield
        let transport = DeliveryTransport::new("http://127.0.0.1:9/api/counter", &config(2)).unwrap();

        for i in 0..5 {
            transport.enqueue(batch(&format!("m{}", i)));
        }

        let stats = transport.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.dropped, 3);
        assert!(!transport.is_idle());

        transport.shutdown_and_wait().await;
        assert_eq!(transport.stats().discarded, 2);
        assert!(transport.is_idle());
    }

    #[tokio::test]
    async fn test_try_enqueue_reports_reason() {
        let transport = DeliveryTransport::new("http://127.0.0.1:9/api/counter", &config(1)).unwrap();

        assert!(transport.try_enqueue(batch("a")).is_ok());
        let err = transport.try_enqueue(batch("b")).unwrap_err();
        assert!(matches!(err, MetricsError::QueueFull { capacity: 1 }));

        transport.shutdown_and_wait().await;
        let err = transport.try_enqueue(batch("c")).unwrap_err();
        assert!(matches!(err, MetricsError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_empty_batch_is_ignored() {
        let transport = DeliveryTransport::new("http://127.0.0.1:9/api/put", &config(1)).unwrap();
        transport.enqueue(Vec::new());
        assert_eq!(transport.stats(), DeliveryStats::default());
        assert!(transport.is_idle());
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = DeliveryTransport::new("http://127.0.0.1:9/api/put", &config(1));
        assert!(matches!(result, Err(MetricsError::NoRuntime)));
    }
}
