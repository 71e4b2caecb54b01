//! Set Observation
//!
//! Sets keep insertion order, so their diffs use the same positional
//! [`IndexMap`] shape as arrays: `add` appends an inserted position, `delete`
//! removes one, `clear` deletes them all.

use std::sync::{Arc, Weak};

use super::batch::{BatchFlush, BatchQueue};
use super::collection::{CollectionCore, CollectionLengthObserver, LengthSource};
use super::index_map::{IndexMap, INSERTED};
use super::observer::AccessorKind;
use super::subscribers::{CollectionSubscriber, Flags, SubscriberId};
use super::value::{SetRef, Value};
use crate::error::Result;

/// Observer mediating all mutations of one set.
pub struct SetObserver {
    set: SetRef,
    core: CollectionCore,
    size: Arc<CollectionLengthObserver>,
    self_ref: Weak<SetObserver>,
}

impl SetObserver {
    /// Create an observer for `set`.
    pub fn new(set: SetRef, batch: Arc<BatchQueue>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<SetObserver>| {
            let source: Weak<dyn LengthSource> = self_ref.clone();
            Self {
                set,
                core: CollectionCore::new(batch.clone()),
                size: CollectionLengthObserver::new(source, batch),
                self_ref: self_ref.clone(),
            }
        })
    }

    /// The observed set.
    pub fn set(&self) -> &SetRef {
        &self.set
    }

    /// This observer's unique id.
    pub fn observer_id(&self) -> u64 {
        self.core.id
    }

    /// The shared `size` observer.
    pub fn size_observer(&self) -> Arc<CollectionLengthObserver> {
        self.size.clone()
    }

    /// Register a collection subscriber.
    pub fn subscribe_collection(
        &self,
        id: SubscriberId,
        subscriber: Arc<dyn CollectionSubscriber>,
    ) -> bool {
        self.core.subscribe(id, subscriber)
    }

    /// Remove a collection subscriber.
    pub fn unsubscribe_collection(&self, id: SubscriberId) -> bool {
        self.core.unsubscribe(id)
    }

    fn notify(&self, old_len: usize, map: IndexMap, flags: Flags) {
        let this = self
            .self_ref
            .upgrade()
            .expect("observer self reference dropped");
        self.core.publish(map, this, flags);
        self.size.mutated(old_len, self.set.len(), flags);
    }

    /// Add `value`. Returns `false` when it was already present.
    pub fn add(&self, value: Value, flags: Flags) -> bool {
        let old_len = self.set.len();
        let added = self.set.with_items(|items| {
            if items.iter().any(|v| *v == value) {
                false
            } else {
                items.push(value);
                true
            }
        });
        if !added {
            return false;
        }
        let mut entries: Vec<isize> = (0..old_len as isize).collect();
        entries.push(INSERTED);
        self.notify(old_len, IndexMap::from_parts(entries, Vec::new()), flags);
        true
    }

    /// Remove `value`. Returns `true` when it was present.
    pub fn delete(&self, value: &Value, flags: Flags) -> bool {
        let old_len = self.set.len();
        let position = self.set.with_items(|items| {
            let position = items.iter().position(|v| v == value)?;
            items.remove(position);
            Some(position)
        });
        let Some(position) = position else {
            return false;
        };

        let entries: Vec<isize> = (0..old_len as isize).filter(|&i| i != position as isize).collect();
        self.notify(old_len, IndexMap::from_parts(entries, vec![position]), flags);
        true
    }

    /// Remove every item.
    pub fn clear(&self, flags: Flags) {
        let old_len = self.set.len();
        if old_len == 0 {
            return;
        }
        self.set.with_items(|items| items.clear());
        self.notify(
            old_len,
            IndexMap::from_parts(Vec::new(), (0..old_len).collect()),
            flags,
        );
    }
}

impl LengthSource for SetObserver {
    fn current_len(&self) -> usize {
        self.set.len()
    }

    fn collection_kind(&self) -> AccessorKind {
        AccessorKind::Set
    }

    fn resize(&self, _len: usize, _flags: Flags) -> Result<()> {
        tracing::warn!("set size is read-only; assignment ignored");
        Ok(())
    }
}

impl BatchFlush for SetObserver {
    fn flush_id(&self) -> u64 {
        self.core.id
    }

    fn flush(&self, flags: Flags) {
        self.core.flush_pending(flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::observer::Accessor;
    use crate::observation::value::SetData;
    use std::sync::RwLock;

    struct MapRecorder {
        maps: RwLock<Vec<IndexMap>>,
    }

    impl MapRecorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                maps: RwLock::new(Vec::new()),
            })
        }

        fn last(&self) -> IndexMap {
            self.maps.read().unwrap().last().cloned().unwrap()
        }
    }

    impl CollectionSubscriber for MapRecorder {
        fn handle_collection_change(&self, index_map: &IndexMap, _flags: Flags) {
            self.maps.write().unwrap().push(index_map.clone());
        }
    }

    #[test]
    fn add_is_deduplicated() {
        let observer = SetObserver::new(SetData::new(), Arc::new(BatchQueue::new()));
        let recorder = MapRecorder::new();
        observer.subscribe_collection(SubscriberId::new(), recorder.clone());

        assert!(observer.add(Value::from(1.0), Flags::NONE));
        assert!(!observer.add(Value::from(1.0), Flags::NONE));
        assert_eq!(observer.set().len(), 1);
        assert_eq!(recorder.last().entries(), &[INSERTED]);
    }

    #[test]
    fn delete_removes_by_position() {
        let observer = SetObserver::new(SetData::new(), Arc::new(BatchQueue::new()));
        let recorder = MapRecorder::new();
        observer.subscribe_collection(SubscriberId::new(), recorder.clone());

        observer.add(Value::str("a"), Flags::NONE);
        observer.add(Value::str("b"), Flags::NONE);
        assert!(observer.delete(&Value::str("a"), Flags::NONE));

        let map = recorder.last();
        assert_eq!(map.entries(), &[1]);
        assert_eq!(map.deleted(), &[0]);
        assert!(!observer.delete(&Value::str("a"), Flags::NONE));
    }

    #[test]
    fn clear_and_size_observer() {
        let observer = SetObserver::new(SetData::new(), Arc::new(BatchQueue::new()));
        observer.add(Value::from(1.0), Flags::NONE);
        observer.add(Value::from(2.0), Flags::NONE);

        let size = observer.size_observer();
        assert_eq!(size.get_value(), Value::from(2.0));

        observer.clear(Flags::NONE);
        assert_eq!(size.get_value(), Value::from(0.0));
        assert!(observer.set().is_empty());
    }
}
