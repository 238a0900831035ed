use thiserror::Error;

/// Errors raised while configuring the client or delivering batches
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection-level failure talking to the endpoint
    #[error("Network error: {0}")]
    Network(String),

    /// Endpoint answered with a non-success status
    #[error("Metrics endpoint {url} answered with status {status}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Endpoint URL
        url: String,
    },

    /// Request exceeded its deadline
    #[error("Timeout error: operation took longer than {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// Batch could not be encoded as JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bounded queue rejected the item
    #[error("Queue full: capacity {capacity} reached")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// Delivery worker is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// Created outside a tokio runtime
    #[error("No tokio runtime available to run background tasks")]
    NoRuntime,

    /// Malformed `key:value` tag
    #[error("Invalid tag: {0}")]
    InvalidTag(String),
}

/// Result type alias for metrics operations
pub type Result<T> = std::result::Result<T, MetricsError>;

impl MetricsError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a new invalid tag error
    pub fn invalid_tag<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTag(msg.into())
    }

    /// Returns true if a delivery attempt that failed with this error may be retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::HttpStatus { .. } | Self::Timeout { .. } | Self::QueueFull { .. }
        )
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Network(_) | Self::HttpStatus { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::NoRuntime => "async",
            Self::QueueFull { .. } => "buffer",
            Self::ChannelClosed => "channel",
            Self::InvalidTag(_) => "validation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MetricsError::config("ttl must be positive");
        assert_eq!(err.to_string(), "Configuration error: ttl must be positive");
        assert_eq!(err.category(), "config");
        assert_eq!(MetricsError::NoRuntime.category(), "async");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(MetricsError::network("connection refused").is_recoverable());
        assert!(MetricsError::Timeout { timeout_ms: 800 }.is_recoverable());
        assert!(MetricsError::HttpStatus {
            status: 503,
            url: "http://localhost/api/counter".to_string()
        }
        .is_recoverable());
        assert!(!MetricsError::config("bad").is_recoverable());
        assert!(!MetricsError::NoRuntime.is_recoverable());
    }

    #[test]
    fn test_http_status_message() {
        let err = MetricsError::HttpStatus {
            status: 500,
            url: "http://metrics.local/api/put".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Metrics endpoint http://metrics.local/api/put answered with status 500"
        );
        assert_eq!(err.category(), "network");
    }
}
