//! Retry utilities for transient delivery errors.

use crate::core::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff)
    pub multiplier: f64,
    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry configuration with a fixed attempt bound and no delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Execute an operation with retry logic.
///
/// Only errors reporting [`is_recoverable`](crate::core::MetricsError::is_recoverable)
/// are retried; anything else is returned after the first attempt.
pub async fn retry_with_config<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_recoverable() || attempt >= max_attempts {
                    tracing::debug!(attempts = attempt, "Operation failed: {}", error);
                    return Err(error);
                }

                if attempt > 1 {
                    backoff = Duration::from_secs_f64(backoff.as_secs_f64() * config.multiplier);
                    if backoff > config.max_backoff {
                        backoff = config.max_backoff;
                    }
                }

                let actual_backoff = if config.jitter && !backoff.is_zero() {
                    let jitter_ms = rand::random::<f64>() * backoff.as_millis() as f64 * 0.1;
                    backoff + Duration::from_millis(jitter_ms as u64)
                } else {
                    backoff
                };

                tracing::warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    error,
                    actual_backoff
                );

                if !actual_backoff.is_zero() {
                    sleep(actual_backoff).await;
                }
            },
        }
    }
}
