//! Lock protected FIFO queues between the transport and the merge pipeline.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::common::SnapshotHandle;

/// Snapshots received from remote peers, waiting to be merged.
pub type IngestBuffer = Buffer<SnapshotHandle>;
/// Snapshots produced locally, waiting for the transport to send them.
pub type EgressBuffer = Buffer<SnapshotHandle>;

#[derive(Debug)]
/// Thread safe FIFO queue. Neither [Buffer::push] nor [Buffer::pop] ever block
/// for longer than the other side's critical section.
pub struct Buffer<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Buffer<T> {
    pub fn new() -> Self {
        Buffer {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an item at the tail.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    /// Remove and return the head, or `None` if the buffer is empty.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove every queued item, in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // === Private Methods ===

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // Every critical section is a single VecDeque call, a poisoned queue is still consistent.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for Buffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
