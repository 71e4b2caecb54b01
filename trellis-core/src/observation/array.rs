//! Array Observation
//!
//! The array observer owns every mutation of an observed array. Each mutator
//! computes an [`IndexMap`] describing exactly how new positions relate to
//! old ones, publishes it to collection subscribers, and reports the length
//! delta to the shared length observer.
//!
//! Mutating the backing [`ArrayData`] behind the observer's back would
//! produce divergent notifications; all writes route through here.

use std::cmp::Ordering as CmpOrdering;
use std::sync::{Arc, RwLock, Weak};

use super::batch::{BatchFlush, BatchQueue};
use super::collection::{CollectionCore, CollectionLengthObserver, LengthSource};
use super::index_map::{IndexMap, INSERTED};
use super::observer::{next_observer_id, Accessor, AccessorKind, Observer};
use super::subscribers::{
    dispatch, CollectionSubscriber, Flags, Subscriber, SubscriberId, SubscriberRegistry,
};
use super::value::{ArrayRef, Value};
use crate::error::Result;

/// Default sort comparator: numbers ascending, everything else by display
/// string code-point order, numbers before strings.
fn default_compare(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(CmpOrdering::Equal),
        (Value::Number(_), _) => CmpOrdering::Less,
        (_, Value::Number(_)) => CmpOrdering::Greater,
        _ => a.to_display_string().cmp(&b.to_display_string()),
    }
}

/// Observer mediating all mutations of one array.
pub struct ArrayObserver {
    array: ArrayRef,
    core: CollectionCore,
    length: Arc<CollectionLengthObserver>,
    self_ref: Weak<ArrayObserver>,
}

impl ArrayObserver {
    /// Create an observer for `array`.
    pub fn new(array: ArrayRef, batch: Arc<BatchQueue>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<ArrayObserver>| {
            let source: Weak<dyn LengthSource> = self_ref.clone();
            Self {
                array,
                core: CollectionCore::new(batch.clone()),
                length: CollectionLengthObserver::new(source, batch),
                self_ref: self_ref.clone(),
            }
        })
    }

    /// The observed array.
    pub fn array(&self) -> &ArrayRef {
        &self.array
    }

    /// This observer's unique id.
    pub fn observer_id(&self) -> u64 {
        self.core.id
    }

    /// The shared `length` observer.
    pub fn length_observer(&self) -> Arc<CollectionLengthObserver> {
        self.length.clone()
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
        debug_assert_eq!(map.len(), self.array.len());
        let this = self
            .self_ref
            .upgrade()
            .expect("observer self reference dropped");
        self.core.publish(map, this, flags);
        self.length.mutated(old_len, self.array.len(), flags);
    }

    /// Append items to the end. Returns the new length.
    pub fn push(&self, items: Vec<Value>, flags: Flags) -> usize {
        if items.is_empty() {
            return self.array.len();
        }
        let old_len = self.array.len();
        let new_len = self.array.with_items(|v| {
            v.extend(items);
            v.len()
        });
        let mut entries: Vec<isize> = (0..old_len as isize).collect();
        entries.extend(std::iter::repeat(INSERTED).take(new_len - old_len));
        self.notify(old_len, IndexMap::from_parts(entries, Vec::new()), flags);
        new_len
    }

    /// Remove and return the last item.
    pub fn pop(&self, flags: Flags) -> Option<Value> {
        let old_len = self.array.len();
        let removed = self.array.with_items(|v| v.pop())?;
        let entries: Vec<isize> = (0..(old_len - 1) as isize).collect();
        self.notify(
            old_len,
            IndexMap::from_parts(entries, vec![old_len - 1]),
            flags,
        );
        Some(removed)
    }

    /// Remove and return the first item.
    pub fn shift(&self, flags: Flags) -> Option<Value> {
        let old_len = self.array.len();
        if old_len == 0 {
            return None;
        }
        let removed = self.array.with_items(|v| v.remove(0));
        let entries: Vec<isize> = (1..old_len as isize).collect();
        self.notify(old_len, IndexMap::from_parts(entries, vec![0]), flags);
        Some(removed)
    }

    /// Prepend items. Returns the new length.
    pub fn unshift(&self, items: Vec<Value>, flags: Flags) -> usize {
        if items.is_empty() {
            return self.array.len();
        }
        let old_len = self.array.len();
        let added = items.len();
        let new_len = self.array.with_items(|v| {
            v.splice(0..0, items);
            v.len()
        });
        let mut entries: Vec<isize> = vec![INSERTED; added];
        entries.extend(0..old_len as isize);
        self.notify(old_len, IndexMap::from_parts(entries, Vec::new()), flags);
        new_len
    }

    /// Remove `delete_count` items at `start`, inserting `items` in their
    /// place. Returns the removed items.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
        flags: Flags,
    ) -> Vec<Value> {
        let old_len = self.array.len();
        let start = start.min(old_len);
        let delete_count = delete_count.min(old_len - start);
        let added = items.len();
        if delete_count == 0 && added == 0 {
            return Vec::new();
        }

        let removed = self
            .array
            .with_items(|v| v.splice(start..start + delete_count, items).collect::<Vec<_>>());

        let mut entries: Vec<isize> = (0..start as isize).collect();
        entries.extend(std::iter::repeat(INSERTED).take(added));
        entries.extend((start + delete_count) as isize..old_len as isize);
        let deleted: Vec<usize> = (start..start + delete_count).collect();
        self.notify(old_len, IndexMap::from_parts(entries, deleted), flags);
        removed
    }

    /// Replace the item at `index`. Writing past the end pads with `Null`.
    pub fn set_index(&self, index: usize, value: Value, flags: Flags) {
        let old_len = self.array.len();
        if index < old_len {
            if self.array.get(index).as_ref() == Some(&value) {
                return;
            }
            self.array.with_items(|v| v[index] = value);
            let mut entries: Vec<isize> = (0..old_len as isize).collect();
            entries[index] = INSERTED;
            self.notify(old_len, IndexMap::from_parts(entries, vec![index]), flags);
        } else {
            let pad = index - old_len;
            self.array.with_items(|v| {
                v.extend(std::iter::repeat(Value::Null).take(pad));
                v.push(value);
            });
            let mut entries: Vec<isize> = (0..old_len as isize).collect();
            entries.extend(std::iter::repeat(INSERTED).take(pad + 1));
            self.notify(old_len, IndexMap::from_parts(entries, Vec::new()), flags);
        }
    }

    /// Reverse the array in place.
    pub fn reverse(&self, flags: Flags) {
        let old_len = self.array.len();
        if old_len < 2 {
            return;
        }
        self.array.with_items(|v| v.reverse());
        let entries: Vec<isize> = (0..old_len as isize).rev().collect();
        self.notify(old_len, IndexMap::from_parts(entries, Vec::new()), flags);
    }

    /// Stable-sort the array, recording the permutation.
    ///
    /// With no comparator, numbers sort ascending ahead of other values,
    /// which sort by display string.
    pub fn sort(&self, compare: Option<&dyn Fn(&Value, &Value) -> CmpOrdering>, flags: Flags) {
        let old_len = self.array.len();
        if old_len < 2 {
            return;
        }
        let mut paired: Vec<(Value, usize)> = self
            .array
            .snapshot()
            .into_iter()
            .enumerate()
            .map(|(i, v)| (v, i))
            .collect();
        let cmp = compare.unwrap_or(&default_compare);
        paired.sort_by(|(a, _), (b, _)| cmp(a, b));

        let entries: Vec<isize> = paired.iter().map(|(_, i)| *i as isize).collect();
        if entries.iter().enumerate().all(|(i, &e)| e == i as isize) {
            return;
        }
        self.array
            .with_items(|v| *v = paired.into_iter().map(|(value, _)| value).collect());
        self.notify(old_len, IndexMap::from_parts(entries, Vec::new()), flags);
    }
}

impl LengthSource for ArrayObserver {
    fn current_len(&self) -> usize {
        self.array.len()
    }

    fn collection_kind(&self) -> AccessorKind {
        AccessorKind::Array
    }

    fn resize(&self, len: usize, flags: Flags) -> Result<()> {
        let current = self.array.len();
        if len < current {
            self.splice(len, current - len, Vec::new(), flags);
        } else if len > current {
            self.push(vec![Value::Null; len - current], flags);
        }
        Ok(())
    }
}

impl BatchFlush for ArrayObserver {
    fn flush_id(&self) -> u64 {
        self.core.id
    }

    fn flush(&self, flags: Flags) {
        self.core.flush_pending(flags);
    }
}

/// Scalar observer for one numeric index of an observed array.
///
/// Subscribes to the owning array observer's collection stream and surfaces
/// mutations that change the value at its index as ordinary scalar changes.
pub struct ArrayIndexObserver {
    id: u64,
    forward_id: SubscriberId,
    index: usize,
    owner: Arc<ArrayObserver>,
    subscribers: RwLock<SubscriberRegistry<dyn Subscriber>>,
    last_value: RwLock<Value>,
    self_ref: Weak<ArrayIndexObserver>,
}

impl ArrayIndexObserver {
    /// Create an observer for `owner.array()[index]`.
    pub fn new(owner: Arc<ArrayObserver>, index: usize) -> Arc<Self> {
        let initial = owner.array().get(index).unwrap_or(Value::Null);
        Arc::new_cyclic(|self_ref| Self {
            id: next_observer_id(),
            forward_id: SubscriberId::new(),
            index,
            owner,
            subscribers: RwLock::new(SubscriberRegistry::new()),
            last_value: RwLock::new(initial),
            self_ref: self_ref.clone(),
        })
    }

    fn refresh(&self, flags: Flags) {
        let current = self.owner.array().get(self.index).unwrap_or(Value::Null);
        let old = {
            let mut last = self.last_value.write().expect("last value lock poisoned");
            if *last == current {
                return;
            }
            std::mem::replace(&mut *last, current.clone())
        };
        dispatch(&self.subscribers, |sub| {
            sub.handle_change(&current, &old, flags)
        });
    }
}

struct IndexForwarder(Weak<ArrayIndexObserver>);

impl CollectionSubscriber for IndexForwarder {
    fn handle_collection_change(&self, _index_map: &IndexMap, flags: Flags) {
        if let Some(observer) = self.0.upgrade() {
            observer.refresh(flags);
        }
    }
}

impl Accessor for ArrayIndexObserver {
    fn kind(&self) -> AccessorKind {
        AccessorKind::Array
    }

    fn get_value(&self) -> Value {
        self.owner.array().get(self.index).unwrap_or(Value::Null)
    }

    fn set_value(&self, value: Value, flags: Flags) -> Result<()> {
        self.owner.set_index(self.index, value, flags);
        Ok(())
    }
}

impl Observer for ArrayIndexObserver {
    fn observer_id(&self) -> u64 {
        self.id
    }

    fn subscribe(&self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) -> bool {
        let mut guard = self.subscribers.write().expect("subscriber lock poisoned");
        let was_empty = guard.is_empty();
        let added = guard.add(id, subscriber);
        drop(guard);
        if added && was_empty {
            *self.last_value.write().expect("last value lock poisoned") = self.get_value();
            self.owner.subscribe_collection(
                self.forward_id,
                Arc::new(IndexForwarder(self.self_ref.clone())),
            );
        }
        added
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut guard = self.subscribers.write().expect("subscriber lock poisoned");
        let removed = guard.remove(id);
        let now_empty = guard.is_empty();
        drop(guard);
        if removed && now_empty {
            self.owner.unsubscribe_collection(self.forward_id);
        }
        removed
    }
}
