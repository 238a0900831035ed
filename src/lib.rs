//! metrics-shipper - in-process metrics aggregation with batched delivery.
//!
//! Application code emits counters, gauges ("stores") and latency timers
//! tagged with key/value dimensions. Observations are aggregated locally
//! per flush window and shipped as JSON batches to an ingestion endpoint,
//! best effort and without ever blocking the caller.
//!
//! # Features
//!
//! - **Non-blocking emit**: bounded lock-free queues, overflow is dropped and counted
//! - **Windowed aggregation**: sum-and-reset counters, last-value stores,
//!   reservoir-sampled timers with percentiles
//! - **Bounded memory**: idle series expire after a TTL and are swept
//! - **Resilient delivery**: bounded batch queue per endpoint, limited retries
//!
//! # Architecture
//!
//! - `metrics`: tag codec, reservoir, series, registry
//! - `delivery`: HTTP transports and the shared client
//! - `hub`: clients per prefix plus their transports
//! - `reporter`: application-facing facade
//! - `core`: configuration, errors, retry
//! - `cli`: the `mship` command-line tool
//!
//! # Example
//!
//! ```no_run
//! use metrics_shipper::core::Config;
//! use metrics_shipper::hub::MetricsHub;
//! use metrics_shipper::metrics::tags_from_pairs;
//! use metrics_shipper::reporter::ReporterBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = MetricsHub::new(Config::new()?)?;
//!     let reporter = ReporterBuilder::new().build(&hub);
//!
//!     reporter.counter("request.count", 1, &tags_from_pairs(&[("method", "user")]));
//!
//!     hub.flush_all();
//!     hub.wait_idle(std::time::Duration::from_secs(2)).await;
//!     hub.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod delivery;
pub mod hub;
pub mod metrics;
pub mod reporter;

// Re-export core types for convenience
pub use crate::core::{Config, MetricsError, Result};
pub use crate::hub::MetricsHub;
pub use crate::reporter::{MetricsReporter, ReporterBuilder};
