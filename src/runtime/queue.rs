//! Lock-protected FIFO shared between the two reactors.
//!
//! Items go in at the tail and come out at the head. The lock is held only
//! for the O(1) push or pop, never across I/O. There is no capacity bound:
//! a stalled consumer lets the queue grow until memory runs out.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Unbounded FIFO guarded by a mutex.
#[derive(Debug)]
pub struct SharedQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> SharedQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append `item` at the tail.
    pub fn enqueue(&self, item: T) {
        self.lock().push_back(item);
    }

    /// Detach the head item, or `None` if the queue is empty.
    ///
    /// An empty queue is left untouched.
    pub fn dequeue(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    // A panic while holding the lock cannot leave the deque half-modified,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
