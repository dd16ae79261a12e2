//! Synchronized FIFO queue used for all cross-thread messaging.
//!
//! Multi-producer/multi-consumer, strict FIFO, no priorities. The queue is
//! logically unbounded but carries a high watermark: when it is reached,
//! the oldest discardable item (a value sample) is shed to make room.
//! Commands and errors are never dropped, so the queue can grow past the
//! watermark if it holds nothing discardable.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Default high watermark before value samples are shed.
pub const DEFAULT_WATERMARK: usize = 1000;

/// Implemented by queued types to mark items that may be shed under
/// pressure. The default is "never".
pub trait QueueItem {
    fn discardable(&self) -> bool {
        false
    }
}

/// Blocking FIFO over a single item type.
pub struct SynchronizedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    signal: Condvar,
    watermark: usize,
}

impl<T: QueueItem> Default for SynchronizedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueItem> SynchronizedQueue<T> {
    pub fn new() -> Self {
        Self::with_watermark(DEFAULT_WATERMARK)
    }

    pub fn with_watermark(watermark: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
            watermark,
        }
    }

    /// Append an item and wake one waiter. Never fails; at the watermark the
    /// oldest discardable item is removed first.
    pub fn push(&self, item: T) {
        {
            let mut queue = self.inner.lock();
            if queue.len() >= self.watermark {
                if let Some(pos) = queue.iter().position(|i| i.discardable()) {
                    queue.remove(pos);
                    log::warn!("Event queue at watermark, dropped oldest value sample");
                }
            }
            queue.push_back(item);
        }
        self.signal.notify_one();
    }

    /// Remove and return the oldest item, or `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Block until the queue is non-empty or the timeout elapses.
    /// Returns whether data is available.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let mut queue = self.inner.lock();
        if !queue.is_empty() {
            return true;
        }
        self.signal.wait_for(&mut queue, timeout);
        !queue.is_empty()
    }

    /// Instantaneous emptiness probe.
    pub fn empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.empty()
    }
}
