//! Core infrastructure shared by the aggregation and delivery layers.
//!
//! Configuration, the error type, and retry helpers live here.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod retry;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, Region};
pub use error::{MetricsError, Result};
pub use retry::{retry_with_config, RetryConfig};
