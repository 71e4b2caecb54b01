//! Map Observation
//!
//! Map mutations speak in entry positions (insertion order), so collection
//! subscribers receive the same [`IndexMap`] shape arrays produce: setting a
//! new key appends an inserted position, overwriting an existing key reads as
//! delete-plus-insert at that position, deleting removes it.

use std::sync::{Arc, Weak};

use super::batch::{BatchFlush, BatchQueue};
use super::collection::{CollectionCore, CollectionLengthObserver, LengthSource};
use super::index_map::{IndexMap, INSERTED};
use super::observer::AccessorKind;
use super::subscribers::{CollectionSubscriber, Flags, SubscriberId};
use super::value::{MapRef, Value};
use crate::error::Result;

/// Observer mediating all mutations of one map.
pub struct MapObserver {
    map: MapRef,
    core: CollectionCore,
    size: Arc<CollectionLengthObserver>,
    self_ref: Weak<MapObserver>,
}

impl MapObserver {
    /// Create an observer for `map`.
    pub fn new(map: MapRef, batch: Arc<BatchQueue>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<MapObserver>| {
            let source: Weak<dyn LengthSource> = self_ref.clone();
            Self {
                map,
                core: CollectionCore::new(batch.clone()),
                size: CollectionLengthObserver::new(source, batch),
                self_ref: self_ref.clone(),
            }
        })
    }

    /// The observed map.
    pub fn map(&self) -> &MapRef {
        &self.map
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
        self.size.mutated(old_len, self.map.len(), flags);
    }

    /// Set `key` to `value`.
    pub fn set(&self, key: impl Into<String>, value: Value, flags: Flags) {
        let key = key.into();
        let old_len = self.map.len();
        let position = self.map.with_entries(|entries| {
            let position = entries.get_index_of(&key);
            match position {
                Some(p) => {
                    if entries[p] == value {
                        return None;
                    }
                    entries[p] = value;
                    Some((p, true))
                }
                None => {
                    entries.insert(key, value);
                    Some((old_len, false))
                }
            }
        });

        let Some((position, existed)) = position else {
            return;
        };
        let new_len = self.map.len();
        let mut entries: Vec<isize> = (0..new_len as isize).collect();
        entries[position] = INSERTED;
        let deleted = if existed { vec![position] } else { Vec::new() };
        self.notify(old_len, IndexMap::from_parts(entries, deleted), flags);
    }

    /// Remove `key`. Returns `true` when the key was present.
    pub fn delete(&self, key: &str, flags: Flags) -> bool {
        let old_len = self.map.len();
        let position = self
            .map
            .with_entries(|entries| entries.shift_remove_full(key).map(|(p, _, _)| p));
        let Some(position) = position else {
            return false;
        };

        let entries: Vec<isize> = (0..old_len as isize).filter(|&i| i != position as isize).collect();
        self.notify(old_len, IndexMap::from_parts(entries, vec![position]), flags);
        true
    }

    /// Remove every entry.
    pub fn clear(&self, flags: Flags) {
        let old_len = self.map.len();
        if old_len == 0 {
            return;
        }
        self.map.with_entries(|entries| entries.clear());
        self.notify(
            old_len,
            IndexMap::from_parts(Vec::new(), (0..old_len).collect()),
            flags,
        );
    }
}

impl LengthSource for MapObserver {
    fn current_len(&self) -> usize {
        self.map.len()
    }

    fn collection_kind(&self) -> AccessorKind {
        AccessorKind::Map
    }

    fn resize(&self, _len: usize, _flags: Flags) -> Result<()> {
        tracing::warn!("map size is read-only; assignment ignored");
        Ok(())
    }
}

impl BatchFlush for MapObserver {
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
    use crate::observation::value::MapData;
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

        fn count(&self) -> usize {
            self.maps.read().unwrap().len()
        }
    }

    impl CollectionSubscriber for MapRecorder {
        fn handle_collection_change(&self, index_map: &IndexMap, _flags: Flags) {
            self.maps.write().unwrap().push(index_map.clone());
        }
    }

    fn observed() -> (Arc<MapObserver>, Arc<MapRecorder>) {
        let observer = MapObserver::new(MapData::new(), Arc::new(BatchQueue::new()));
        let recorder = MapRecorder::new();
        observer.subscribe_collection(SubscriberId::new(), recorder.clone());
        (observer, recorder)
    }

    #[test]
    fn set_new_key_appends_inserted_position() {
        let (observer, recorder) = observed();
        observer.set("a", Value::from(1.0), Flags::NONE);

        let map = recorder.last();
        assert_eq!(map.entries(), &[INSERTED]);
        assert!(map.deleted().is_empty());
        assert_eq!(observer.map().len(), 1);
    }

    #[test]
    fn overwrite_reads_as_replace_at_position() {
        let (observer, recorder) = observed();
        observer.set("a", Value::from(1.0), Flags::NONE);
        observer.set("b", Value::from(2.0), Flags::NONE);
        observer.set("a", Value::from(9.0), Flags::NONE);

        let map = recorder.last();
        assert_eq!(map.entries(), &[INSERTED, 1]);
        assert_eq!(map.deleted(), &[0]);
    }

    #[test]
    fn same_value_set_is_silent() {
        let (observer, recorder) = observed();
        observer.set("a", Value::from(1.0), Flags::NONE);
        let before = recorder.count();
        observer.set("a", Value::from(1.0), Flags::NONE);
        assert_eq!(recorder.count(), before);
    }

    #[test]
    fn delete_removes_the_position() {
        let (observer, recorder) = observed();
        observer.set("a", Value::from(1.0), Flags::NONE);
        observer.set("b", Value::from(2.0), Flags::NONE);

        assert!(observer.delete("a", Flags::NONE));
        let map = recorder.last();
        assert_eq!(map.entries(), &[1]);
        assert_eq!(map.deleted(), &[0]);

        assert!(!observer.delete("missing", Flags::NONE));
    }

    #[test]
    fn clear_deletes_everything() {
        let (observer, recorder) = observed();
        observer.set("a", Value::from(1.0), Flags::NONE);
        observer.set("b", Value::from(2.0), Flags::NONE);
        observer.clear(Flags::NONE);

        let map = recorder.last();
        assert!(map.is_empty());
        assert_eq!(map.deleted(), &[0, 1]);
        assert!(observer.map().is_empty());
    }

    #[test]
    fn size_observer_tracks_entry_count() {
        let (observer, _) = observed();
        let size = observer.size_observer();
        assert_eq!(size.get_value(), Value::from(0.0));
        observer.set("a", Value::from(1.0), Flags::NONE);
        assert_eq!(size.get_value(), Value::from(1.0));
    }
}
