//! Latency timer series
//!
//! A timer is bound to one name and one fixed tag set. Samples pass through
//! a lock-free queue into a [`SlidingWindowReservoir`]; every flush consumes
//! the window and reports its distribution as ten metric requests.

use crate::core::config::CollectionConfig;
use crate::metrics::expiry::Expiry;
use crate::metrics::queue::BoundedQueue;
use crate::metrics::reservoir::{SlidingWindowReservoir, Snapshot};
use crate::metrics::schedule::PeriodicTask;
use crate::metrics::series::ManagedSeries;
use crate::metrics::tags::Tags;
use crate::metrics::types::{flush_timestamp, Batch, BatchSink, MetricRequest, MetricValue};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Statistic suffixes in emission order
pub const TIMER_STATS: [&str; 10] = [
    "count", "max", "min", "avg", "median", "pct75", "pct90", "pct95", "pct99", "pct999",
];

struct TimerInner {
    name: String,
    tags: Tags,
    queue: BoundedQueue<u64>,
    reservoir: SlidingWindowReservoir,
    sink: Arc<dyn BatchSink>,
    max_flush_items: usize,
    ttl: Duration,
    expiry: Expiry,
    /// Serializes drain + snapshot
    flush_lock: Mutex<()>,
    dropped: AtomicU64,
    dropped_reported: AtomicU64,
}

impl TimerInner {
    fn flush(&self) -> usize {
        let _guard = self.flush_lock.lock();

        let mut drained: u64 = 0;
        while drained < self.max_flush_items as u64 {
            let Some(sample) = self.queue.pop() else {
                break;
            };
            self.reservoir.update(sample);
            drained += 1;
        }

        let dropped = self.dropped.load(Ordering::Relaxed);
        let reported = self.dropped_reported.swap(dropped, Ordering::Relaxed);
        if dropped > reported {
            tracing::warn!(
                metric = %self.name,
                dropped = dropped - reported,
                capacity = self.queue.capacity(),
                "Timer samples emitted too fast, inbound queue full"
            );
        }

        let snapshot = self.reservoir.snapshot();
        if drained == 0 && snapshot.is_empty() {
            return 0;
        }

        let batch = self.build_batch(drained, &snapshot);
        let emitted = batch.len();
        tracing::debug!(metric = %self.name, drained, window = snapshot.len(), "Flushed timer");
        self.sink.enqueue(batch);
        emitted
    }

    fn build_batch(&self, drained: u64, snapshot: &Snapshot) -> Batch {
        let timestamp = flush_timestamp();
        let count = i64::try_from(drained).unwrap_or(i64::MAX);
        let max = i64::try_from(snapshot.max()).unwrap_or(i64::MAX);
        let min = i64::try_from(snapshot.min()).unwrap_or(i64::MAX);

        let values = [
            MetricValue::Int(count),
            MetricValue::Int(max),
            MetricValue::Int(min),
            MetricValue::Float(snapshot.mean()),
            MetricValue::Float(snapshot.median()),
            MetricValue::Float(snapshot.value(0.75)),
            MetricValue::Float(snapshot.value(0.90)),
            MetricValue::Float(snapshot.value(0.95)),
            MetricValue::Float(snapshot.value(0.99)),
            MetricValue::Float(snapshot.value(0.999)),
        ];

        TIMER_STATS
            .iter()
            .zip(values)
            .map(|(stat, value)| {
                MetricRequest::new(
                    format!("{}.{}", self.name, stat),
                    timestamp,
                    value,
                    self.tags.clone(),
                )
            })
            .collect()
    }
}

/// Latency distribution series for one name and tag set
pub struct Timer {
    inner: Arc<TimerInner>,
    task: PeriodicTask,
}

impl Timer {
    /// Create the timer and start its flush loop on `runtime`
    pub fn new(
        name: impl Into<String>,
        tags: Tags,
        config: &CollectionConfig,
        sink: Arc<dyn BatchSink>,
        runtime: &Handle,
    ) -> Self {
        let name = name.into();
        let inner = Arc::new(TimerInner {
            name: name.clone(),
            tags,
            queue: BoundedQueue::new(config.max_pending_observations),
            reservoir: SlidingWindowReservoir::new(config.reservoir_capacity.max(1)),
            sink,
            max_flush_items: config.max_flush_items.max(1),
            ttl: config.ttl,
            expiry: Expiry::new(config.ttl),
            flush_lock: Mutex::new(()),
            dropped: AtomicU64::new(0),
            dropped_reported: AtomicU64::new(0),
        });

        let flush_inner = Arc::clone(&inner);
        let task = PeriodicTask::spawn(
            runtime,
            format!("timer-flush:{}", name),
            config.flush_interval,
            move || {
                flush_inner.flush();
            },
        );

        Self { inner, task }
    }

    /// Queue a duration sample, in milliseconds; drops when the queue is full
    pub fn record(&self, value: u64) {
        self.inner.expiry.refresh(self.inner.ttl);
        if self.inner.queue.push(value).is_err() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Queue an elapsed duration
    pub fn record_duration(&self, elapsed: Duration) {
        self.record(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    }

    /// Fixed tags attached to every statistic
    pub fn tags(&self) -> &Tags {
        &self.inner.tags
    }

    /// Samples waiting for the next flush
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Samples rejected because the queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl ManagedSeries for Timer {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn is_expired(&self) -> bool {
        self.inner.expiry.is_expired()
    }

    fn refresh_expiry(&self, ttl: Duration) {
        self.inner.expiry.refresh(ttl);
    }

    fn flush(&self) -> usize {
        self.inner.flush()
    }

    fn close(&self) {
        self.task.stop();
        while self.inner.queue.pop().is_some() {}
        let _ = self.inner.reservoir.snapshot();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.inner.name)
            .field("tags", &self.inner.tags)
            .field("queued", &self.inner.queue.len())
            .field("stopped", &self.task.is_stopped())
            .finish()
    }
}
