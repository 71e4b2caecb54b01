//! Subscriber Collections
//!
//! Every observer carries a subscriber collection: the registry of parties to
//! notify when the observed value changes. The common case is one to three
//! subscribers (a property binding, maybe a computed observer, maybe a
//! watcher), so the registry keeps three inline slots selected by a small
//! occupancy bitmask and only allocates an overflow list beyond that.
//!
//! Two flavors exist over the same storage: scalar subscribers receive a
//! new/old value pair, collection subscribers receive an
//! [`IndexMap`](super::IndexMap) describing the mutation.
//!
//! # Dispatch safety
//!
//! `callSubscribers`-style dispatch snapshots the registry before invoking
//! anything, then re-checks membership per entry, so a handler that adds or
//! removes subscribers mid-dispatch neither corrupts iteration nor causes a
//! just-removed subscriber to be invoked again in the same dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::index_map::IndexMap;
use super::value::Value;

/// Unique identifier for a subscriber.
///
/// Each subscriber (binding, computed observer, watcher) gets a unique ID
/// when created. The ID is what the registry deduplicates and removes by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-cutting context for a change notification.
///
/// The source system packed lifecycle phase, binding mode, and queueing hints
/// into one bitmask; here each concern keeps its own type and notifications
/// only carry the two facts every handler needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// The change is part of an in-progress `bind` (initial push).
    pub from_bind: bool,
    /// The change is part of an in-progress `unbind` (teardown push).
    pub from_unbind: bool,
}

impl Flags {
    /// No lifecycle context.
    pub const NONE: Flags = Flags {
        from_bind: false,
        from_unbind: false,
    };
    /// Notification raised while binding.
    pub const BIND: Flags = Flags {
        from_bind: true,
        from_unbind: false,
    };
    /// Notification raised while unbinding.
    pub const UNBIND: Flags = Flags {
        from_bind: false,
        from_unbind: true,
    };
}

/// A party notified when a scalar observed value changes.
pub trait Subscriber: Send + Sync {
    /// React to a value change.
    fn handle_change(&self, new_value: &Value, old_value: &Value, flags: Flags);
}

/// A party notified when an observed collection mutates.
pub trait CollectionSubscriber: Send + Sync {
    /// React to a collection mutation described by `index_map`.
    fn handle_collection_change(&self, index_map: &IndexMap, flags: Flags);
}

const SLOT_COUNT: usize = 3;
const SLOT_MASKS: [u8; SLOT_COUNT] = [0b001, 0b010, 0b100];

/// Registry of subscribers for one observer.
///
/// Generic over the subscriber trait object so the scalar and collection
/// flavors share the inline-slot layout.
pub struct SubscriberRegistry<S: ?Sized> {
    slots: [Option<(SubscriberId, Arc<S>)>; SLOT_COUNT],
    overflow: Vec<(SubscriberId, Arc<S>)>,
    mask: u8,
}

impl<S: ?Sized> SubscriberRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            slots: [None, None, None],
            overflow: Vec::new(),
            mask: 0,
        }
    }

    /// Add a subscriber under `id`.
    ///
    /// Returns `false` (and changes nothing) when `id` is already present.
    pub fn add(&mut self, id: SubscriberId, subscriber: Arc<S>) -> bool {
        if self.contains(id) {
            return false;
        }
        for (slot, bit) in self.slots.iter_mut().zip(SLOT_MASKS) {
            if self.mask & bit == 0 {
                *slot = Some((id, subscriber));
                self.mask |= bit;
                return true;
            }
        }
        self.overflow.push((id, subscriber));
        true
    }

    /// Remove the subscriber under `id`.
    ///
    /// Returns `false` when `id` was not present.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        for (slot, bit) in self.slots.iter_mut().zip(SLOT_MASKS) {
            if self.mask & bit != 0 && slot.as_ref().map(|(sid, _)| *sid) == Some(id) {
                *slot = None;
                self.mask &= !bit;
                return true;
            }
        }
        let before = self.overflow.len();
        self.overflow.retain(|(sid, _)| *sid != id);
        self.overflow.len() != before
    }

    /// True when `id` is registered.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.slots
            .iter()
            .zip(SLOT_MASKS)
            .any(|(slot, bit)| self.mask & bit != 0 && slot.as_ref().map(|(sid, _)| *sid) == Some(id))
            || self.overflow.iter().any(|(sid, _)| *sid == id)
    }

    /// Number of registered subscribers.
    pub fn count(&self) -> usize {
        self.mask.count_ones() as usize + self.overflow.len()
    }

    /// True when no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.mask == 0 && self.overflow.is_empty()
    }

    /// Clone the current entries, inline slots first.
    pub fn snapshot(&self) -> Vec<(SubscriberId, Arc<S>)> {
        let mut out = Vec::with_capacity(self.count());
        for (slot, bit) in self.slots.iter().zip(SLOT_MASKS) {
            if self.mask & bit != 0 {
                if let Some(entry) = slot {
                    out.push(entry.clone());
                }
            }
        }
        out.extend(self.overflow.iter().cloned());
        out
    }
}

impl<S: ?Sized> Default for SubscriberRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot-then-invoke dispatch over a lock-guarded registry.
///
/// The lock is released while each subscriber runs, and membership is
/// re-checked per entry so removals performed by earlier handlers suppress
/// later invocations within the same dispatch.
pub(crate) fn dispatch<S: ?Sized>(
    lock: &RwLock<SubscriberRegistry<S>>,
    mut invoke: impl FnMut(&Arc<S>),
) {
    let snapshot = lock.read().expect("subscriber lock poisoned").snapshot();
    for (id, subscriber) in snapshot {
        let still_present = lock.read().expect("subscriber lock poisoned").contains(id);
        if still_present {
            invoke(&subscriber);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    struct CountingSubscriber {
        calls: AtomicI32,
    }

    impl CountingSubscriber {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicI32::new(0),
            })
        }
    }

    impl Subscriber for CountingSubscriber {
        fn handle_change(&self, _new: &Value, _old: &Value, _flags: Flags) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let a = SubscriberId::new();
        let b = SubscriberId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_add_is_a_no_op() {
        let mut registry: SubscriberRegistry<dyn Subscriber> = SubscriberRegistry::new();
        let id = SubscriberId::new();
        let sub = CountingSubscriber::new();

        assert!(registry.add(id, sub.clone()));
        assert!(!registry.add(id, sub));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn spills_into_overflow_beyond_three() {
        let mut registry: SubscriberRegistry<dyn Subscriber> = SubscriberRegistry::new();
        let ids: Vec<SubscriberId> = (0..5).map(|_| SubscriberId::new()).collect();
        for id in &ids {
            assert!(registry.add(*id, CountingSubscriber::new()));
        }
        assert_eq!(registry.count(), 5);

        // Removing an inline slot frees it for reuse.
        assert!(registry.remove(ids[1]));
        assert_eq!(registry.count(), 4);
        let id = SubscriberId::new();
        assert!(registry.add(id, CountingSubscriber::new()));
        assert_eq!(registry.count(), 5);
    }

    #[test]
    fn remove_unknown_returns_false() {
        let mut registry: SubscriberRegistry<dyn Subscriber> = SubscriberRegistry::new();
        assert!(!registry.remove(SubscriberId::new()));
    }

    /// A subscriber that removes another subscriber from the registry the
    /// first time it fires.
    struct RemovingSubscriber {
        registry: Arc<RwLock<SubscriberRegistry<dyn Subscriber>>>,
        victim: SubscriberId,
        calls: AtomicI32,
    }

    impl Subscriber for RemovingSubscriber {
        fn handle_change(&self, _new: &Value, _old: &Value, _flags: Flags) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.registry
                .write()
                .expect("subscriber lock poisoned")
                .remove(self.victim);
        }
    }

    #[test]
    fn removal_during_dispatch_suppresses_later_invocation() {
        let registry: Arc<RwLock<SubscriberRegistry<dyn Subscriber>>> =
            Arc::new(RwLock::new(SubscriberRegistry::new()));

        let victim_id = SubscriberId::new();
        let victim = CountingSubscriber::new();

        let remover_id = SubscriberId::new();
        let remover = Arc::new(RemovingSubscriber {
            registry: registry.clone(),
            victim: victim_id,
            calls: AtomicI32::new(0),
        });

        {
            let mut guard = registry.write().expect("subscriber lock poisoned");
            guard.add(remover_id, remover.clone());
            guard.add(victim_id, victim.clone());
        }

        dispatch(&registry, |sub| {
            sub.handle_change(&Value::Null, &Value::Null, Flags::NONE)
        });

        assert_eq!(remover.calls.load(Ordering::SeqCst), 1);
        // The remover ran first (inline slot order) and removed the victim,
        // so the victim is never invoked in this dispatch.
        assert_eq!(victim.calls.load(Ordering::SeqCst), 0);
    }
}
