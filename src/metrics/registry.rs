//! Series registry
//!
//! [`MetricsClient`] owns every live series of one name prefix. Series are
//! created lazily on first use under a creation lock, their expiry is
//! refreshed on every lookup, and a background sweep evicts the ones that
//! went idle for longer than the TTL.

use crate::core::config::CollectionConfig;
use crate::core::{MetricsError, Result};
use crate::metrics::schedule::PeriodicTask;
use crate::metrics::series::{Counter, ManagedSeries, Store};
use crate::metrics::tags::{TagSignature, Tags};
use crate::metrics::timer::Timer;
use crate::metrics::types::BatchSink;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Timers are keyed by full name and tag signature
type TimerKey = (String, TagSignature);

struct ClientInner {
    prefix: String,
    config: CollectionConfig,
    runtime: Handle,
    counter_sink: Arc<dyn BatchSink>,
    store_sink: Arc<dyn BatchSink>,
    counters: DashMap<String, Arc<Counter>>,
    stores: DashMap<String, Arc<Store>>,
    timers: DashMap<TimerKey, Arc<Timer>>,
    /// Serializes inserts and removals across all three maps
    creation_lock: Mutex<()>,
    closed: AtomicBool,
}

impl ClientInner {
    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    fn get_or_create<K, S, F>(&self, map: &DashMap<K, Arc<S>>, key: K, create: F) -> Arc<S>
    where
        K: Eq + Hash,
        S: ManagedSeries,
        F: FnOnce() -> S,
    {
        let ttl = self.config.ttl;

        // Refresh while the shard guard is held so a concurrent sweep
        // re-checking expiry sees the new deadline.
        if let Some(series) = map.get(&key) {
            series.refresh_expiry(ttl);
            return Arc::clone(series.value());
        }

        let _guard = self.creation_lock.lock();
        if let Some(series) = map.get(&key) {
            series.refresh_expiry(ttl);
            return Arc::clone(series.value());
        }

        let series = Arc::new(create());
        tracing::debug!(metric = series.name(), prefix = %self.prefix, "Created series");
        map.insert(key, Arc::clone(&series));
        series
    }

    fn counter(&self, name: &str) -> Arc<Counter> {
        let full_name = self.full_name(name);
        self.get_or_create(&self.counters, full_name.clone(), || {
            Counter::new(full_name, &self.config, Arc::clone(&self.counter_sink), &self.runtime)
        })
    }

    fn store(&self, name: &str) -> Arc<Store> {
        let full_name = self.full_name(name);
        self.get_or_create(&self.stores, full_name.clone(), || {
            Store::new(full_name, &self.config, Arc::clone(&self.store_sink), &self.runtime)
        })
    }

    fn timer(&self, name: &str, tags: &Tags) -> Arc<Timer> {
        let full_name = self.full_name(name);
        let key = (full_name.clone(), TagSignature::from(tags));
        self.get_or_create(&self.timers, key, || {
            Timer::new(
                full_name,
                tags.clone(),
                &self.config,
                Arc::clone(&self.counter_sink),
                &self.runtime,
            )
        })
    }

    fn sweep(&self) -> usize {
        let removed = evict_expired(&self.counters, &self.creation_lock)
            + evict_expired(&self.stores, &self.creation_lock)
            + evict_expired(&self.timers, &self.creation_lock);
        if removed > 0 {
            tracing::debug!(prefix = %self.prefix, removed, "Swept expired series");
        }
        removed
    }

    fn flush_all(&self) -> usize {
        flush_map(&self.counters) + flush_map(&self.stores) + flush_map(&self.timers)
    }

    fn series_count(&self) -> usize {
        self.counters.len() + self.stores.len() + self.timers.len()
    }
}

/// Scan without the lock, then remove each candidate under it, re-checking
/// expiry so a series refreshed in between survives.
fn evict_expired<K, S>(map: &DashMap<K, Arc<S>>, lock: &Mutex<()>) -> usize
where
    K: Eq + Hash + Clone,
    S: ManagedSeries,
{
    let candidates: Vec<K> = map
        .iter()
        .filter(|entry| entry.value().is_expired())
        .map(|entry| entry.key().clone())
        .collect();

    let mut removed = 0;
    for key in candidates {
        let _guard = lock.lock();
        if let Some((_, series)) = map.remove_if(&key, |_, series| series.is_expired()) {
            series.close();
            tracing::debug!(metric = series.name(), "Evicted expired series");
            removed += 1;
        }
    }
    removed
}

fn flush_map<K, S>(map: &DashMap<K, Arc<S>>) -> usize
where
    K: Eq + Hash,
    S: ManagedSeries,
{
    // Clone out first so no shard guard is held while flushing
    let series: Vec<Arc<S>> = map.iter().map(|entry| Arc::clone(entry.value())).collect();
    series.iter().map(|s| s.flush()).sum()
}

fn close_map<K, S>(map: &DashMap<K, Arc<S>>)
where
    K: Eq + Hash + Clone,
    S: ManagedSeries,
{
    let keys: Vec<K> = map.iter().map(|entry| entry.key().clone()).collect();
    for key in keys {
        if let Some((_, series)) = map.remove(&key) {
            series.close();
        }
    }
}

/// Registry of counters, stores and timers sharing one name prefix
pub struct MetricsClient {
    inner: Arc<ClientInner>,
    sweeper: PeriodicTask,
}

impl MetricsClient {
    /// Create a client on the current tokio runtime.
    ///
    /// Counter and timer batches go to `counter_sink`, store batches to
    /// `store_sink`.
    pub fn new(
        prefix: impl Into<String>,
        config: &CollectionConfig,
        counter_sink: Arc<dyn BatchSink>,
        store_sink: Arc<dyn BatchSink>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| MetricsError::NoRuntime)?;
        Ok(Self::with_runtime(runtime, prefix, config, counter_sink, store_sink))
    }

    /// Create a client whose background tasks run on `runtime`
    pub fn with_runtime(
        runtime: Handle,
        prefix: impl Into<String>,
        config: &CollectionConfig,
        counter_sink: Arc<dyn BatchSink>,
        store_sink: Arc<dyn BatchSink>,
    ) -> Self {
        let prefix = prefix.into();
        let inner = Arc::new(ClientInner {
            prefix: prefix.clone(),
            config: config.clone(),
            runtime,
            counter_sink,
            store_sink,
            counters: DashMap::new(),
            stores: DashMap::new(),
            timers: DashMap::new(),
            creation_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        let sweep_inner = Arc::clone(&inner);
        let sweeper = PeriodicTask::spawn(
            &inner.runtime,
            format!("sweep:{}", prefix),
            config.ttl,
            move || {
                sweep_inner.sweep();
            },
        );

        Self { inner, sweeper }
    }

    /// Name prefix applied to every series
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Add `value` to counter `name` for this tag set
    pub fn emit_counter(&self, name: &str, value: i64, tags: &Tags) {
        if self.is_closed() {
            return;
        }
        self.inner.counter(name).emit(value, tags);
    }

    /// Set store `name` to `value` for this tag set
    pub fn emit_store(&self, name: &str, value: f64, tags: &Tags) {
        if self.is_closed() {
            return;
        }
        self.inner.store(name).emit(value, tags);
    }

    /// Record a latency sample, in milliseconds, on timer `name` with these tags
    pub fn emit_timer(&self, name: &str, value: u64, tags: &Tags) {
        if self.is_closed() {
            return;
        }
        self.inner.timer(name, tags).record(value);
    }

    /// Look up or create counter `name`, refreshing its expiry
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.inner.counter(name)
    }

    /// Look up or create store `name`, refreshing its expiry
    pub fn store(&self, name: &str) -> Arc<Store> {
        self.inner.store(name)
    }

    /// Look up or create the timer for `name` and `tags`, refreshing its expiry
    pub fn timer(&self, name: &str, tags: &Tags) -> Arc<Timer> {
        self.inner.timer(name, tags)
    }

    /// Evict expired series now; returns how many were removed
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Flush every live series now; returns requests handed to the sinks
    pub fn flush_all(&self) -> usize {
        self.inner.flush_all()
    }

    /// Live series across all kinds
    pub fn series_count(&self) -> usize {
        self.inner.series_count()
    }

    /// Stop the sweep and close every series. Later emissions are ignored.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sweeper.stop();

        let _guard = self.inner.creation_lock.lock();
        close_map(&self.inner.counters);
        close_map(&self.inner.stores);
        close_map(&self.inner.timers);
        tracing::debug!(prefix = %self.inner.prefix, "Metrics client closed");
    }

    /// True after [`close`](Self::close)
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Configured series time-to-live
    pub fn ttl(&self) -> Duration {
        self.inner.config.ttl
    }
}

impl fmt::Debug for MetricsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsClient")
            .field("prefix", &self.inner.prefix)
            .field("counters", &self.inner.counters.len())
            .field("stores", &self.inner.stores.len())
            .field("timers", &self.inner.timers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
