//! Bounded multi-producer inbound queue.
//!
//! Segments are allocated as items arrive, so an idle series holds almost
//! nothing no matter how high its cap is set. The cap is enforced with a
//! length counter reserved before the push.

use crossbeam::queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free queue that rejects pushes beyond `capacity`
pub struct BoundedQueue<T> {
    items: SegQueue<T>,
    len: AtomicUsize,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        Self {
            items: SegQueue::new(),
            len: AtomicUsize::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Push unless full, handing the item back on rejection
    pub fn push(&self, item: T) -> Result<(), T> {
        if self.len.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(item);
        }
        self.items.push(item);
        Ok(())
    }

    /// Pop the oldest item
    pub fn pop(&self) -> Option<T> {
        let item = self.items.pop()?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(item)
    }

    /// Items queued, including pushes still in flight
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
