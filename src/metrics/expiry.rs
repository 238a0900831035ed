//! Time-to-live tracking for series.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Expiry deadline that only ever moves forward.
///
/// Uses the tokio clock so paused-time tests can drive it.
#[derive(Debug)]
pub struct Expiry {
    origin: Instant,
    /// Deadline in milliseconds since `origin`
    deadline_ms: AtomicU64,
}

impl Expiry {
    /// Create an expiry that ends `ttl` from now
    pub fn new(ttl: Duration) -> Self {
        let expiry = Self {
            origin: Instant::now(),
            deadline_ms: AtomicU64::new(0),
        };
        expiry.refresh(ttl);
        expiry
    }

    fn now_ms(&self) -> u64 {
        duration_ms(Instant::now().saturating_duration_since(self.origin))
    }

    /// Push the deadline to at least `now + ttl`
    pub fn refresh(&self, ttl: Duration) {
        let deadline = self.now_ms().saturating_add(duration_ms(ttl));
        self.deadline_ms.fetch_max(deadline, Ordering::AcqRel);
    }

    /// True once the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.now_ms() > self.deadline_ms.load(Ordering::Acquire)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
