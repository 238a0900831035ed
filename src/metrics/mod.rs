//! Metric aggregation engine.
//!
//! Observations enter a series through a bounded lock-free queue and are
//! folded into per-window aggregates by that series' own flush loop:
//! - Counters sum and reset every window
//! - Stores keep the last value seen in the window
//! - Timers sample into a sliding-window reservoir and report percentiles
//!
//! Flushed batches leave through a [`BatchSink`]; emitting never blocks.

pub mod expiry;
pub mod queue;
pub mod registry;
pub mod reservoir;
pub mod schedule;
pub mod series;
pub mod tags;
pub mod timer;
pub mod types;

pub use queue::BoundedQueue;
pub use registry::MetricsClient;
pub use reservoir::{SlidingWindowReservoir, Snapshot};
pub use series::{Aggregation, Counter, LastValue, ManagedSeries, Series, Store, Sum};
pub use tags::{merge_tags, parse_tag_kvs, tags_from_pairs, TagSignature, Tags};
pub use timer::Timer;
pub use types::{Batch, BatchSink, MetricRequest, MetricValue};
