//! Shared Collection-Observer Machinery
//!
//! Array, map, and set observers all publish [`IndexMap`] diffs to collection
//! subscribers and expose a scalar `length`/`size` observer. The common state
//! and batch-coalescing logic lives here; the typed observers own the
//! mutation semantics.

use std::sync::{Arc, RwLock, Weak};

use super::batch::{BatchFlush, BatchQueue};
use super::index_map::IndexMap;
use super::observer::{next_observer_id, Accessor, AccessorKind, Observer};
use super::subscribers::{
    dispatch, CollectionSubscriber, Flags, Subscriber, SubscriberId, SubscriberRegistry,
};
use super::value::Value;
use crate::error::Result;

/// Shared state for one collection observer: the collection-subscriber
/// registry plus the pending (batch-merged) index map.
pub(crate) struct CollectionCore {
    pub(crate) id: u64,
    subscribers: RwLock<SubscriberRegistry<dyn CollectionSubscriber>>,
    pending: RwLock<Option<IndexMap>>,
    batch: Arc<BatchQueue>,
}

impl CollectionCore {
    pub(crate) fn new(batch: Arc<BatchQueue>) -> Self {
        Self {
            id: next_observer_id(),
            subscribers: RwLock::new(SubscriberRegistry::new()),
            pending: RwLock::new(None),
            batch,
        }
    }

    pub(crate) fn batch(&self) -> &Arc<BatchQueue> {
        &self.batch
    }

    pub(crate) fn subscribe(&self, id: SubscriberId, sub: Arc<dyn CollectionSubscriber>) -> bool {
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .add(id, sub)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .remove(id)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("subscriber lock poisoned")
            .count()
    }

    /// Publish a mutation. Inside a batch the map composes into the pending
    /// one and the observer queues itself; otherwise subscribers hear it now.
    pub(crate) fn publish(&self, map: IndexMap, flush_handle: Arc<dyn BatchFlush>, flags: Flags) {
        if self.batch.is_batching() {
            {
                let mut pending = self.pending.write().expect("pending lock poisoned");
                *pending = Some(match pending.take() {
                    Some(earlier) => earlier.compose(&map),
                    None => map,
                });
            }
            self.batch.enqueue(flush_handle);
        } else {
            dispatch(&self.subscribers, |sub| {
                sub.handle_collection_change(&map, flags)
            });
        }
    }

    /// Deliver the batch-merged map, if any net change remains.
    pub(crate) fn flush_pending(&self, flags: Flags) {
        let pending = self.pending.write().expect("pending lock poisoned").take();
        if let Some(map) = pending {
            if !map.is_identity() {
                dispatch(&self.subscribers, |sub| {
                    sub.handle_collection_change(&map, flags)
                });
            }
        }
    }
}

/// What a length observer reads its size from, and how writes resize.
pub(crate) trait LengthSource: Send + Sync {
    /// Current length/size.
    fn current_len(&self) -> usize;

    /// Category tag of the owning collection.
    fn collection_kind(&self) -> AccessorKind;

    /// Resize to `len`, if the collection supports assignment to its length.
    /// Map `size` and set `size` are read-only.
    fn resize(&self, len: usize, flags: Flags) -> Result<()>;
}

/// Scalar observer for a collection's `length`/`size`.
///
/// Owned by the collection observer, which reports every mutation here so
/// subscribers see length changes as ordinary scalar changes.
pub struct CollectionLengthObserver {
    id: u64,
    source: Weak<dyn LengthSource>,
    subscribers: RwLock<SubscriberRegistry<dyn Subscriber>>,
    pending_old: RwLock<Option<f64>>,
    batch: Arc<BatchQueue>,
    self_ref: Weak<CollectionLengthObserver>,
}

impl CollectionLengthObserver {
    pub(crate) fn new(source: Weak<dyn LengthSource>, batch: Arc<BatchQueue>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: next_observer_id(),
            source,
            subscribers: RwLock::new(SubscriberRegistry::new()),
            pending_old: RwLock::new(None),
            batch,
            self_ref: self_ref.clone(),
        })
    }

    fn current_len(&self) -> f64 {
        self.source
            .upgrade()
            .map(|s| s.current_len() as f64)
            .unwrap_or(0.0)
    }

    /// Called by the owning collection observer after a mutation.
    pub(crate) fn mutated(&self, old_len: usize, new_len: usize, flags: Flags) {
        if old_len == new_len {
            return;
        }
        if self.batch.is_batching() {
            let mut pending = self.pending_old.write().expect("pending lock poisoned");
            if pending.is_none() {
                *pending = Some(old_len as f64);
            }
            drop(pending);
            let this = self
                .self_ref
                .upgrade()
                .expect("observer self reference dropped");
            self.batch.enqueue(this);
        } else {
            dispatch(&self.subscribers, |sub| {
                sub.handle_change(
                    &Value::Number(new_len as f64),
                    &Value::Number(old_len as f64),
                    flags,
                )
            });
        }
    }
}

impl Accessor for CollectionLengthObserver {
    fn kind(&self) -> AccessorKind {
        self.source
            .upgrade()
            .map(|s| s.collection_kind())
            .unwrap_or(AccessorKind::Primitive)
    }

    fn get_value(&self) -> Value {
        Value::Number(self.current_len())
    }

    fn set_value(&self, value: Value, flags: Flags) -> Result<()> {
        let Some(source) = self.source.upgrade() else {
            return Ok(());
        };
        let requested = value.as_number();
        if requested.is_nan() || requested < 0.0 {
            return Ok(());
        }
        source.resize(requested as usize, flags)
    }
}

impl Observer for CollectionLengthObserver {
    fn observer_id(&self) -> u64 {
        self.id
    }

    fn subscribe(&self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) -> bool {
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .add(id, subscriber)
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .remove(id)
    }
}

impl BatchFlush for CollectionLengthObserver {
    fn flush_id(&self) -> u64 {
        self.id
    }

    fn flush(&self, flags: Flags) {
        let old_len = self
            .pending_old
            .write()
            .expect("pending lock poisoned")
            .take();
        if let Some(old_len) = old_len {
            let current = self.current_len();
            if current != old_len {
                dispatch(&self.subscribers, |sub| {
                    sub.handle_change(&Value::Number(current), &Value::Number(old_len), flags)
                });
            }
        }
    }
}
