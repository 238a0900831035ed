//! Tag-keyed aggregating series
//!
//! A [`Series`] accepts observations on a bounded lock-free queue and folds
//! them into per-tag-signature aggregates on its own periodic flush. The
//! folding rule is an [`Aggregation`] policy: [`Sum`] for counters,
//! [`LastValue`] for gauges.

use crate::core::config::CollectionConfig;
use crate::metrics::expiry::Expiry;
use crate::metrics::queue::BoundedQueue;
use crate::metrics::schedule::PeriodicTask;
use crate::metrics::tags::{TagSignature, Tags};
use crate::metrics::types::{flush_timestamp, Batch, BatchSink, MetricRequest, MetricValue};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// How queued values for one tag signature combine within a flush window
pub trait Aggregation: Send + Sync + 'static {
    /// Observed value type
    type Value: Copy + Send + Sync + fmt::Debug + 'static;

    /// Short kind name used in task names and logs
    const KIND: &'static str;

    /// Fold `incoming` into the pending aggregate
    fn merge(current: &mut Self::Value, incoming: Self::Value);

    /// Convert a finished aggregate to its wire value
    fn to_metric_value(value: Self::Value) -> MetricValue;
}

/// Sum-and-reset aggregation for counters
#[derive(Debug)]
pub struct Sum;

impl Aggregation for Sum {
    type Value = i64;

    const KIND: &'static str = "counter";

    fn merge(current: &mut i64, incoming: i64) {
        *current = current.saturating_add(incoming);
    }

    fn to_metric_value(value: i64) -> MetricValue {
        MetricValue::Int(value)
    }
}

/// Last-value-wins aggregation for gauges
#[derive(Debug)]
pub struct LastValue;

impl Aggregation for LastValue {
    type Value = f64;

    const KIND: &'static str = "store";

    fn merge(current: &mut f64, incoming: f64) {
        *current = incoming;
    }

    fn to_metric_value(value: f64) -> MetricValue {
        MetricValue::Float(value)
    }
}

/// Counter series: emits the per-window sum for each tag signature
pub type Counter = Series<Sum>;

/// Store (gauge) series: emits the latest value for each tag signature
pub type Store = Series<LastValue>;

/// Lifecycle operations the registry needs from every series kind
pub trait ManagedSeries: Send + Sync {
    /// Full metric name
    fn name(&self) -> &str;
    /// True once the series was idle for longer than its TTL
    fn is_expired(&self) -> bool;
    /// Push the expiry deadline to at least `now + ttl`
    fn refresh_expiry(&self, ttl: Duration);
    /// Drain, aggregate and hand one batch to the sink; returns requests emitted
    fn flush(&self) -> usize;
    /// Stop the flush loop and discard whatever is still queued
    fn close(&self);
}

#[derive(Debug)]
struct Observation<V> {
    signature: TagSignature,
    value: V,
}

struct SeriesInner<A: Aggregation> {
    name: String,
    queue: BoundedQueue<Observation<A::Value>>,
    /// Pending aggregates; only the flush path locks this
    pending: Mutex<HashMap<TagSignature, A::Value>>,
    sink: Arc<dyn BatchSink>,
    max_flush_items: usize,
    ttl: Duration,
    expiry: Expiry,
    dropped: AtomicU64,
    dropped_reported: AtomicU64,
}

impl<A: Aggregation> SeriesInner<A> {
    fn flush(&self) -> usize {
        let mut pending = self.pending.lock();

        let mut drained = 0;
        while drained < self.max_flush_items {
            let Some(observation) = self.queue.pop() else {
                break;
            };
            drained += 1;
            match pending.entry(observation.signature) {
                Entry::Occupied(mut entry) => A::merge(entry.get_mut(), observation.value),
                Entry::Vacant(entry) => {
                    entry.insert(observation.value);
                },
            }
        }

        self.report_dropped();

        if pending.is_empty() {
            return 0;
        }

        let timestamp = flush_timestamp();
        let batch: Batch = pending
            .drain()
            .map(|(signature, value)| {
                MetricRequest::new(
                    self.name.clone(),
                    timestamp,
                    A::to_metric_value(value),
                    signature.decode(),
                )
            })
            .collect();
        drop(pending);

        let emitted = batch.len();
        tracing::debug!(
            metric = %self.name,
            kind = A::KIND,
            drained,
            emitted,
            "Flushed series"
        );
        self.sink.enqueue(batch);
        emitted
    }

    fn report_dropped(&self) {
        let dropped = self.dropped.load(Ordering::Relaxed);
        let reported = self.dropped_reported.swap(dropped, Ordering::Relaxed);
        if dropped > reported {
            tracing::warn!(
                metric = %self.name,
                kind = A::KIND,
                dropped = dropped - reported,
                capacity = self.queue.capacity(),
                "Observations emitted too fast, inbound queue full"
            );
        }
    }

    fn discard(&self) {
        while self.queue.pop().is_some() {}
        self.pending.lock().clear();
    }
}

/// A named series aggregating tagged observations with policy `A`
pub struct Series<A: Aggregation> {
    inner: Arc<SeriesInner<A>>,
    task: PeriodicTask,
}

impl<A: Aggregation> Series<A> {
    /// Create the series and start its flush loop on `runtime`
    pub fn new(
        name: impl Into<String>,
        config: &CollectionConfig,
        sink: Arc<dyn BatchSink>,
        runtime: &Handle,
    ) -> Self {
        let name = name.into();
        let inner = Arc::new(SeriesInner::<A> {
            name: name.clone(),
            queue: BoundedQueue::new(config.max_pending_observations),
            pending: Mutex::new(HashMap::new()),
            sink,
            max_flush_items: config.max_flush_items.max(1),
            ttl: config.ttl,
            expiry: Expiry::new(config.ttl),
            dropped: AtomicU64::new(0),
            dropped_reported: AtomicU64::new(0),
        });

        let flush_inner = Arc::clone(&inner);
        let task = PeriodicTask::spawn(
            runtime,
            format!("{}-flush:{}", A::KIND, name),
            config.flush_interval,
            move || {
                flush_inner.flush();
            },
        );

        Self { inner, task }
    }

    /// Queue an observation and refresh the expiry; never blocks, drops when
    /// the queue is full
    pub fn emit(&self, value: A::Value, tags: &Tags) {
        self.emit_signed(value, TagSignature::from(tags));
    }

    /// Queue an observation whose tags are already encoded
    pub fn emit_signed(&self, value: A::Value, signature: TagSignature) {
        self.inner.expiry.refresh(self.inner.ttl);
        if let Err(rejected) = self.inner.queue.push(Observation { signature, value }) {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = %self.inner.name, ?rejected, "Dropped observation");
        }
    }

    /// Observations waiting for the next flush
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Observations rejected because the queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl<A: Aggregation> ManagedSeries for Series<A> {
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
        self.inner.discard();
    }
}

impl<A: Aggregation> fmt::Debug for Series<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Series")
            .field("kind", &A::KIND)
            .field("name", &self.inner.name)
            .field("queued", &self.inner.queue.len())
            .field("stopped", &self.task.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tags::tags_from_pairs;

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<Batch>>,
    }

    impl BatchSink for CollectingSink {
        fn enqueue(&self, batch: Batch) {
            self.batches.lock().push(batch);
        }
    }

    impl CollectingSink {
        fn requests(&self) -> Vec<MetricRequest> {
            self.batches.lock().iter().flatten().cloned().collect()
        }
    }

    fn test_config() -> CollectionConfig {
        CollectionConfig {
            ttl: Duration::from_secs(100),
            flush_interval: Duration::from_secs(3600),
            reservoir_capacity: 16,
            max_flush_items: 1000,
            max_pending_observations: 1000,
        }
    }

    #[tokio::test]
    async fn test_counter_sums_within_window() {
        let sink = Arc::new(CollectingSink::default());
        let counter = Counter::new("sdk.req.count", &test_config(), Arc::<CollectingSink>::clone(&sink), &Handle::current());
        let tags = tags_from_pairs(&[("method", "user")]);

        counter.emit(1, &tags);
        counter.emit(2, &tags);
        counter.emit(4, &tags);

        assert_eq!(counter.flush(), 1);
        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].metric, "sdk.req.count");
        assert_eq!(requests[0].value, MetricValue::Int(7));
        assert_eq!(requests[0].tags, tags);
    }

    #[tokio::test]
    async fn test_counter_resets_after_flush() {
        let sink = Arc::new(CollectingSink::default());
        let counter = Counter::new("c", &test_config(), Arc::<CollectingSink>::clone(&sink), &Handle::current());
        let tags = tags_from_pairs(&[("k", "v")]);

        counter.emit(5, &tags);
        counter.flush();
        counter.emit(1, &tags);
        counter.flush();

        let values: Vec<_> = sink.requests().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![MetricValue::Int(5), MetricValue::Int(1)]);

        // Nothing observed, nothing sent
        assert_eq!(counter.flush(), 0);
        assert_eq!(sink.batches.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_counter_separates_tag_signatures() {
        let sink = Arc::new(CollectingSink::default());
        let counter = Counter::new("c", &test_config(), Arc::<CollectingSink>::clone(&sink), &Handle::current());

        counter.emit(1, &tags_from_pairs(&[("method", "user")]));
        counter.emit(1, &tags_from_pairs(&[("method", "item")]));
        counter.emit(1, &tags_from_pairs(&[("method", "user")]));

        assert_eq!(counter.flush(), 2);
        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 1);

        let batch = &batches[0];
        let timestamp = batch[0].timestamp;
        assert!(batch.iter().all(|r| r.timestamp == timestamp));

        let user = batch.iter().find(|r| r.tags["method"] == "user").unwrap();
        assert_eq!(user.value, MetricValue::Int(2));
    }

    #[tokio::test]
    async fn test_separator_characters_do_not_merge_tag_sets() {
        let sink = Arc::new(CollectingSink::default());
        let counter = Counter::new("c", &test_config(), Arc::<CollectingSink>::clone(&sink), &Handle::current());
        let embedded = tags_from_pairs(&[("a", "b|c:d")]);
        let split = tags_from_pairs(&[("a", "b"), ("c", "d")]);
        let colon_key = tags_from_pairs(&[("k:x", "v")]);

        counter.emit(1, &embedded);
        counter.emit(1, &split);
        counter.emit(1, &colon_key);

        assert_eq!(counter.flush(), 3);
        let requests = sink.requests();
        for tags in [&embedded, &split, &colon_key] {
            let request = requests.iter().find(|r| &r.tags == tags).unwrap();
            assert_eq!(request.value, MetricValue::Int(1));
        }
    }

    #[tokio::test]
    async fn test_store_keeps_last_value() {
        let sink = Arc::new(CollectingSink::default());
        let store = Store::new("queue.depth", &test_config(), Arc::<CollectingSink>::clone(&sink), &Handle::current());
        let tags = tags_from_pairs(&[("queue", "ingest")]);

        store.emit(10.0, &tags);
        store.emit(3.5, &tags);

        assert_eq!(store.flush(), 1);
        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].value, MetricValue::Float(3.5));
    }

    #[tokio::test]
    async fn test_flush_drains_bounded_count() {
        let sink = Arc::new(CollectingSink::default());
        let config = CollectionConfig {
            max_flush_items: 2,
            ..test_config()
        };
        let counter = Counter::new("c", &config, Arc::<CollectingSink>::clone(&sink), &Handle::current());
        let tags = Tags::new();

        for _ in 0..5 {
            counter.emit(1, &tags);
        }

        counter.flush();
        assert_eq!(counter.queued(), 3);
        counter.flush();
        counter.flush();

        let values: Vec<_> = sink.requests().iter().map(|r| r.value).collect();
        assert_eq!(
            values,
            vec![MetricValue::Int(2), MetricValue::Int(2), MetricValue::Int(1)]
        );
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let sink = Arc::new(CollectingSink::default());
        let config = CollectionConfig {
            max_pending_observations: 3,
            ..test_config()
        };
        let counter = Counter::new("c", &config, Arc::<CollectingSink>::clone(&sink), &Handle::current());

        for _ in 0..10 {
            counter.emit(1, &Tags::new());
        }

        assert_eq!(counter.queued(), 3);
        assert_eq!(counter.dropped(), 7);
        counter.flush();
        assert_eq!(sink.requests()[0].value, MetricValue::Int(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_flush_runs_on_interval() {
        let sink = Arc::new(CollectingSink::default());
        let config = CollectionConfig {
            flush_interval: Duration::from_secs(15),
            ..test_config()
        };
        let counter = Counter::new("c", &config, Arc::<CollectingSink>::clone(&sink), &Handle::current());
        counter.emit(3, &Tags::new());

        tokio::time::sleep(Duration::from_secs(16)).await;

        assert_eq!(sink.requests().len(), 1);
        assert_eq!(counter.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_flushing_and_discards() {
        let sink = Arc::new(CollectingSink::default());
        let config = CollectionConfig {
            flush_interval: Duration::from_secs(1),
            ..test_config()
        };
        let counter = Counter::new("c", &config, Arc::<CollectingSink>::clone(&sink), &Handle::current());
        counter.emit(3, &Tags::new());

        counter.close();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(sink.requests().is_empty());
        assert_eq!(counter.queued(), 0);
    }
}
