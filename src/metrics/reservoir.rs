//! Sliding-window reservoir for timer samples
//!
//! Fixed-capacity circular buffer: once full, each new sample overwrites
//! the oldest slot. Taking a snapshot consumes the window, so consecutive
//! snapshots never see the same sample twice.

use parking_lot::Mutex;

/// Default reservoir capacity
pub const DEFAULT_CAPACITY: usize = 65_536;

/// Bounded window of the most recent samples
#[derive(Debug)]
pub struct SlidingWindowReservoir {
    capacity: usize,
    window: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    values: Vec<u64>,
    cursor: usize,
}

impl SlidingWindowReservoir {
    /// Create a new reservoir with the specified capacity
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");

        Self {
            capacity,
            window: Mutex::new(Window {
                values: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Record a sample, overwriting the oldest one when full
    pub fn update(&self, value: u64) {
        let mut window = self.window.lock();
        if window.values.len() < self.capacity {
            window.values.push(value);
        } else {
            let slot = window.cursor;
            window.values[slot] = value;
            window.cursor = (slot + 1) % self.capacity;
        }
    }

    /// Copy out and clear the window.
    ///
    /// Only the copy-and-clear runs under the lock; sorting happens after.
    pub fn snapshot(&self) -> Snapshot {
        let values = {
            let mut window = self.window.lock();
            window.cursor = 0;
            std::mem::take(&mut window.values)
        };
        Snapshot::new(values)
    }

    /// Samples currently held
    pub fn size(&self) -> usize {
        self.window.lock().values.len()
    }

    /// Maximum samples held at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SlidingWindowReservoir {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Sorted, immutable copy of one window
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    values: Vec<u64>,
}

impl Snapshot {
    /// Build a snapshot from unsorted samples
    pub fn new(mut values: Vec<u64>) -> Self {
        values.sort_unstable();
        Self { values }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the window held no samples
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Smallest sample, 0 when empty
    pub fn min(&self) -> u64 {
        self.values.first().copied().unwrap_or(0)
    }

    /// Largest sample, 0 when empty
    pub fn max(&self) -> u64 {
        self.values.last().copied().unwrap_or(0)
    }

    /// Arithmetic mean, 0.0 when empty
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.values.iter().map(|&v| v as f64).sum();
        sum / self.values.len() as f64
    }

    /// 50th percentile
    pub fn median(&self) -> f64 {
        self.value(0.5)
    }

    /// Value at quantile `q` in `[0, 1]`.
    ///
    /// Linear interpolation between the two samples around rank `q * (n + 1)`.
    pub fn value(&self, q: f64) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }

        let q = q.clamp(0.0, 1.0);
        let pos = q * (n + 1) as f64;
        let index = pos as usize;

        if index < 1 {
            return self.values[0] as f64;
        }
        if index >= n {
            return self.values[n - 1] as f64;
        }

        let lower = self.values[index - 1] as f64;
        let upper = self.values[index] as f64;
        lower + (pos - pos.floor()) * (upper - lower)
    }

    /// Sorted samples
    pub fn values(&self) -> &[u64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservoir_creation() {
        let reservoir = SlidingWindowReservoir::new(8);

        assert_eq!(reservoir.capacity(), 8);
        assert_eq!(reservoir.size(), 0);
    }

    #[test]
    #[should_panic(expected = "Capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        SlidingWindowReservoir::new(0);
    }

    #[test]
    fn test_overflow_keeps_capacity_samples() {
        let reservoir = SlidingWindowReservoir::new(4);

        for value in 0..7 {
            reservoir.update(value);
        }

        assert_eq!(reservoir.size(), 4);

        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.len(), 4);
        // 0, 1 and 2 were overwritten by 4, 5 and 6
        assert_eq!(snapshot.values(), &[3, 4, 5, 6]);
    }

    #[test]
    fn test_snapshot_consumes_window() {
        let reservoir = SlidingWindowReservoir::new(16);
        for value in 1..=5 {
            reservoir.update(value);
        }

        assert_eq!(reservoir.snapshot().len(), 5);
        assert_eq!(reservoir.size(), 0);
        assert!(reservoir.snapshot().is_empty());
    }

    #[test]
    fn test_wraparound_after_snapshot() {
        let reservoir = SlidingWindowReservoir::new(2);
        reservoir.update(1);
        reservoir.update(2);
        reservoir.update(3);
        let _ = reservoir.snapshot();

        reservoir.update(10);
        reservoir.update(20);
        reservoir.update(30);
        assert_eq!(reservoir.snapshot().values(), &[20, 30]);
    }

    #[test]
    fn test_snapshot_statistics() {
        let snapshot = Snapshot::new(vec![5, 3, 1, 4, 2]);

        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot.min(), 1);
        assert_eq!(snapshot.max(), 5);
        assert_eq!(snapshot.mean(), 3.0);
        assert_eq!(snapshot.median(), 3.0);
    }

    #[test]
    fn test_percentile_interpolation() {
        let snapshot = Snapshot::new((1..=10).collect());

        // rank 0.75 * 11 = 8.25 -> between 8 and 9
        assert!((snapshot.value(0.75) - 8.25).abs() < 1e-9);
        assert_eq!(snapshot.value(0.99), 10.0);
        assert_eq!(snapshot.value(0.0), 1.0);
    }

    #[test]
    fn test_empty_snapshot_is_zero() {
        let snapshot = Snapshot::default();
        assert_eq!(snapshot.min(), 0);
        assert_eq!(snapshot.max(), 0);
        assert_eq!(snapshot.mean(), 0.0);
        assert_eq!(snapshot.value(0.95), 0.0);
    }

    #[test]
    fn test_concurrent_update_and_snapshot() {
        use std::sync::Arc;
        use std::thread;

        let reservoir = Arc::new(SlidingWindowReservoir::new(1024));

        let writer = {
            let reservoir = Arc::clone(&reservoir);
            thread::spawn(move || {
                for value in 0..10_000 {
                    reservoir.update(value);
                }
            })
        };

        let mut seen = 0;
        for _ in 0..100 {
            seen += reservoir.snapshot().len();
            thread::yield_now();
        }
        writer.join().unwrap();
        seen += reservoir.snapshot().len();

        // Every snapshot is a disjoint slice of the stream
        assert!(seen <= 10_000);
        assert!(seen > 0);
    }
}
