//! Dependency Records
//!
//! A connectable binding accumulates subscriptions during each `connect`
//! pass. Dependencies may differ from pass to pass (conditional expressions
//! take different branches), so every record carries the version of the pass
//! that last touched it; after a fresh pass, records with stale versions
//! unsubscribe and drop.

use smallvec::SmallVec;
use std::sync::Arc;

use crate::observation::{
    ArrayObserver, CollectionSubscriber, MapObserver, Observer, SetObserver, Subscriber,
    SubscriberId,
};

/// A subscribed dependency: either a scalar observer or a collection stream.
pub enum DependencyHandle {
    /// A property (scalar) observer.
    Property(Arc<dyn Observer>),
    /// An array's collection stream.
    Array(Arc<ArrayObserver>),
    /// A map's collection stream.
    Map(Arc<MapObserver>),
    /// A set's collection stream.
    Set(Arc<SetObserver>),
}

impl DependencyHandle {
    fn key(&self) -> u64 {
        match self {
            DependencyHandle::Property(o) => o.observer_id(),
            DependencyHandle::Array(o) => o.observer_id(),
            DependencyHandle::Map(o) => o.observer_id(),
            DependencyHandle::Set(o) => o.observer_id(),
        }
    }

    fn unsubscribe(&self, id: SubscriberId) {
        match self {
            DependencyHandle::Property(o) => {
                o.unsubscribe(id);
            }
            DependencyHandle::Array(o) => {
                o.unsubscribe_collection(id);
            }
            DependencyHandle::Map(o) => {
                o.unsubscribe_collection(id);
            }
            DependencyHandle::Set(o) => {
                o.unsubscribe_collection(id);
            }
        }
    }
}

struct Record {
    key: u64,
    handle: DependencyHandle,
    version: u64,
}

/// Version-stamped set of subscribed dependencies for one binding.
pub struct DependencyRecords {
    version: u64,
    entries: SmallVec<[Record; 4]>,
}

impl DependencyRecords {
    /// Create an empty record set.
    pub fn new() -> Self {
        Self {
            version: 0,
            entries: SmallVec::new(),
        }
    }

    /// Start a new connect pass.
    pub fn begin_pass(&mut self) {
        self.version += 1;
    }

    /// Number of live records.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Record a scalar dependency, subscribing on first sight.
    pub fn observe_property(
        &mut self,
        binding_id: SubscriberId,
        observer: Arc<dyn Observer>,
        subscriber: &Arc<dyn Subscriber>,
    ) {
        let key = observer.observer_id();
        if let Some(record) = self.entries.iter_mut().find(|r| r.key == key) {
            record.version = self.version;
            return;
        }
        observer.subscribe(binding_id, subscriber.clone());
        self.entries.push(Record {
            key,
            handle: DependencyHandle::Property(observer),
            version: self.version,
        });
    }

    /// Record a collection dependency, subscribing on first sight.
    pub fn observe_collection(
        &mut self,
        binding_id: SubscriberId,
        handle: DependencyHandle,
        subscriber: &Arc<dyn CollectionSubscriber>,
    ) {
        let key = handle.key();
        if let Some(record) = self.entries.iter_mut().find(|r| r.key == key) {
            record.version = self.version;
            return;
        }
        match &handle {
            DependencyHandle::Property(o) => {
                // A scalar handle routed here is a caller bug; keep the
                // subscription type consistent anyway.
                o.subscribe(binding_id, Arc::new(NullSubscriber));
            }
            DependencyHandle::Array(o) => {
                o.subscribe_collection(binding_id, subscriber.clone());
            }
            DependencyHandle::Map(o) => {
                o.subscribe_collection(binding_id, subscriber.clone());
            }
            DependencyHandle::Set(o) => {
                o.subscribe_collection(binding_id, subscriber.clone());
            }
        }
        self.entries.push(Record {
            key,
            handle,
            version: self.version,
        });
    }

    /// Unsubscribe records not touched by the current pass.
    pub fn unobserve_stale(&mut self, binding_id: SubscriberId) {
        let version = self.version;
        self.entries.retain(|record| {
            if record.version < version {
                record.handle.unsubscribe(binding_id);
                false
            } else {
                true
            }
        });
    }

    /// Unsubscribe everything.
    pub fn unobserve_all(&mut self, binding_id: SubscriberId) {
        for record in self.entries.drain(..) {
            record.handle.unsubscribe(binding_id);
        }
    }
}

impl Default for DependencyRecords {
    fn default() -> Self {
        Self::new()
    }
}

struct NullSubscriber;

impl Subscriber for NullSubscriber {
    fn handle_change(
        &self,
        _new: &crate::observation::Value,
        _old: &crate::observation::Value,
        _flags: crate::observation::Flags,
    ) {
    }
}
