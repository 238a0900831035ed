//! Wire types shared by the series and the delivery transport.

use crate::metrics::tags::Tags;
use serde::{Deserialize, Serialize};

/// Numeric payload of a metric request.
///
/// Serialized untagged so the wire carries a bare JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Counter sums and timer count/min/max
    Int(i64),
    /// Gauges and timer statistics
    Float(f64),
}

impl MetricValue {
    /// Value widened to f64
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Int(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

/// One data point as sent to the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRequest {
    /// Fully prefixed metric name
    pub metric: String,
    /// Unix seconds, shared by every point of one flush
    pub timestamp: i64,
    /// Aggregated value
    pub value: MetricValue,
    /// Flat tag mapping
    pub tags: Tags,
}

impl MetricRequest {
    /// Create a new request
    pub fn new<V: Into<MetricValue>>(metric: String, timestamp: i64, value: V, tags: Tags) -> Self {
        Self {
            metric,
            timestamp,
            value: value.into(),
            tags,
        }
    }
}

/// Requests delivered in a single network call
pub type Batch = Vec<MetricRequest>;

/// Destination of flushed batches.
///
/// `enqueue` must never block; implementations drop what they cannot accept.
pub trait BatchSink: Send + Sync {
    /// Hand a batch over for delivery
    fn enqueue(&self, batch: Batch);
}

/// Unix timestamp in seconds used to stamp a flush
pub fn flush_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tags::tags_from_pairs;

    #[test]
    fn test_wire_shape() {
        let request = MetricRequest::new(
            "sdk.req.count".to_string(),
            1_700_000_000,
            3_i64,
            tags_from_pairs(&[("method", "user")]),
        );

        let json = serde_json::to_value(vec![request]).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "metric": "sdk.req.count",
                "timestamp": 1_700_000_000_i64,
                "value": 3,
                "tags": {"method": "user"}
            }])
        );
    }

    #[test]
    fn test_float_value_serializes_as_number() {
        let request = MetricRequest::new("queue.depth".to_string(), 1, 2.5_f64, Tags::new());
        let text = serde_json::to_string(&request).unwrap();
        assert!(text.contains("\"value\":2.5"));
        assert!(text.contains("\"tags\":{}"));
    }

    #[test]
    fn test_metric_value_as_f64() {
        assert_eq!(MetricValue::Int(7).as_f64(), 7.0);
        assert_eq!(MetricValue::Float(0.25).as_f64(), 0.25);
    }
}
