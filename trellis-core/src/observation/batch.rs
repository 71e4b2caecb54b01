//! Batch Queue
//!
//! Defers observer notifications while a logical operation performs several
//! mutations, so each observer's subscribers hear exactly one coalesced
//! change instead of N intermediate ones.
//!
//! The queue is depth-counted: `begin`/`end` pairs may nest, and the queued
//! observers flush exactly once when the outermost `end` is reached. Each
//! observer locator owns its own batch queue; there is no process-global
//! state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::subscribers::Flags;

/// An observer that can deliver a deferred, coalesced notification.
pub trait BatchFlush: Send + Sync {
    /// Identity used to deduplicate the flush queue.
    fn flush_id(&self) -> u64;

    /// Deliver the coalesced notification accumulated during the batch.
    fn flush(&self, flags: Flags);
}

/// Depth-counted notification deferral shared by one locator's observers.
pub struct BatchQueue {
    depth: AtomicUsize,
    queue: Mutex<Vec<Arc<dyn BatchFlush>>>,
}

impl BatchQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Enter a batch. Notifications are deferred until the matching [`end`].
    ///
    /// [`end`]: BatchQueue::end
    pub fn begin(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    /// Leave a batch. When this closes the outermost batch, every queued
    /// observer flushes exactly once, in the order first queued.
    pub fn end(&self, flags: Flags) {
        let prev = self.depth.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "BatchQueue::end without matching begin");
        if prev == 1 {
            self.flush(flags);
        }
    }

    /// True while at least one batch is open.
    pub fn is_batching(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }

    /// Queue an observer for the outermost flush.
    ///
    /// Queuing the same observer twice (by `flush_id`) is a no-op; the
    /// observer is expected to accumulate its own pending state.
    pub fn enqueue(&self, observer: Arc<dyn BatchFlush>) {
        let mut queue = self.queue.lock().expect("batch queue lock poisoned");
        if queue.iter().any(|o| o.flush_id() == observer.flush_id()) {
            return;
        }
        queue.push(observer);
    }

    /// Run a closure inside a batch.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        self.begin();
        let result = f();
        self.end(Flags::NONE);
        result
    }

    fn flush(&self, flags: Flags) {
        // Drain before invoking so observers that mutate further during the
        // flush re-enter a fresh queue (and notify synchronously, since the
        // batch is over).
        let drained: Vec<Arc<dyn BatchFlush>> = {
            let mut queue = self.queue.lock().expect("batch queue lock poisoned");
            std::mem::take(&mut *queue)
        };
        if !drained.is_empty() {
            tracing::trace!(observers = drained.len(), "flushing batch queue");
        }
        for observer in drained {
            observer.flush(flags);
        }
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new()
    }
}
