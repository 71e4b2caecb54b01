//! Computed Observation
//!
//! A computed observer wraps a getter (and optional setter) declared on an
//! object. While at least one subscriber is attached, every recomputation
//! runs inside the observation context: tracked reads performed by the
//! getter report their observers, which the computed observer subscribes to.
//! Dependencies are versioned by a monotonically increasing record version,
//! so any dependency not re-read in the latest pass is pruned — a getter
//! with conditional branches only stays subscribed to the branch it took.
//!
//! When the last subscriber leaves, every dependency subscription is
//! released and the observer reverts to pass-through evaluation with zero
//! standing overhead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use super::batch::{BatchFlush, BatchQueue};
use super::context::{DependencyWatcher, ObservationContext};
use super::observer::{next_observer_id, Accessor, AccessorKind, Observer};
use super::subscribers::{dispatch, Flags, Subscriber, SubscriberId, SubscriberRegistry};
use super::value::{ComputedDescriptor, ObjectRef, Value};
use crate::error::Result;

struct DepRecord {
    observer: Arc<dyn Observer>,
    version: u64,
}

/// Observer for a computed member of an object.
pub struct ComputedObserver {
    id: u64,
    watcher_id: SubscriberId,
    obj: ObjectRef,
    key: String,
    descriptor: ComputedDescriptor,
    context: Arc<ObservationContext>,
    batch: Arc<BatchQueue>,
    subscribers: RwLock<SubscriberRegistry<dyn Subscriber>>,
    cached: RwLock<Option<Value>>,
    deps: RwLock<HashMap<u64, DepRecord>>,
    record_version: AtomicU64,
    pending_old: RwLock<Option<Value>>,
    self_ref: Weak<ComputedObserver>,
}

impl ComputedObserver {
    /// Create an observer for the computed member `obj.key`.
    pub fn new(
        obj: ObjectRef,
        key: impl Into<String>,
        descriptor: ComputedDescriptor,
        context: Arc<ObservationContext>,
        batch: Arc<BatchQueue>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: next_observer_id(),
            watcher_id: SubscriberId::new(),
            obj,
            key: key.into(),
            descriptor,
            context,
            batch,
            subscribers: RwLock::new(SubscriberRegistry::new()),
            cached: RwLock::new(None),
            deps: RwLock::new(HashMap::new()),
            record_version: AtomicU64::new(0),
            pending_old: RwLock::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Number of dependencies subscribed in the latest pass.
    pub fn dependency_count(&self) -> usize {
        self.deps.read().expect("deps lock poisoned").len()
    }

    /// True while at least one subscriber keeps tracking active.
    fn is_active(&self) -> bool {
        self.cached.read().expect("cached lock poisoned").is_some()
    }

    fn run_getter(&self) -> Value {
        match self.descriptor.get.call(&[Value::Object(self.obj.clone())]) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "computed getter failed");
                Value::Null
            }
        }
    }

    /// Recompute inside a tracking pass, prune stale dependencies, and cache
    /// the result. Returns the previous cached value.
    fn recompute(&self) -> Option<Value> {
        let version = self.record_version.fetch_add(1, Ordering::SeqCst) + 1;

        let this = self
            .self_ref
            .upgrade()
            .expect("observer self reference dropped");
        let value = {
            let _guard = self.context.enter(this);
            self.run_getter()
        };

        // Set-like diff against the previous dependency set: anything not
        // re-read in this pass unsubscribes.
        let stale: Vec<Arc<dyn Observer>> = {
            let mut deps = self.deps.write().expect("deps lock poisoned");
            let stale = deps
                .values()
                .filter(|record| record.version < version)
                .map(|record| record.observer.clone())
                .collect();
            deps.retain(|_, record| record.version >= version);
            stale
        };
        for observer in stale {
            observer.unsubscribe(self.watcher_id);
        }

        self.cached
            .write()
            .expect("cached lock poisoned")
            .replace(value)
    }

    fn dependency_changed(&self, flags: Flags) {
        let old_value = self.recompute();
        let new_value = self
            .cached
            .read()
            .expect("cached lock poisoned")
            .clone()
            .unwrap_or(Value::Null);
        let old_value = old_value.unwrap_or(Value::Null);
        if new_value == old_value {
            return;
        }

        if self.batch.is_batching() {
            let mut pending = self.pending_old.write().expect("pending lock poisoned");
            if pending.is_none() {
                *pending = Some(old_value);
            }
            drop(pending);
            let this = self
                .self_ref
                .upgrade()
                .expect("observer self reference dropped");
            self.batch.enqueue(this);
        } else {
            dispatch(&self.subscribers, |sub| {
                sub.handle_change(&new_value, &old_value, flags)
            });
        }
    }

    fn release_dependencies(&self) {
        let all: Vec<Arc<dyn Observer>> = {
            let mut deps = self.deps.write().expect("deps lock poisoned");
            deps.drain().map(|(_, record)| record.observer).collect()
        };
        for observer in all {
            observer.unsubscribe(self.watcher_id);
        }
        self.cached.write().expect("cached lock poisoned").take();
    }
}

impl DependencyWatcher for ComputedObserver {
    fn watcher_id(&self) -> SubscriberId {
        self.watcher_id
    }

    fn observe_dependency(&self, observer: Arc<dyn Observer>) {
        let version = self.record_version.load(Ordering::SeqCst);
        let mut deps = self.deps.write().expect("deps lock poisoned");
        match deps.get_mut(&observer.observer_id()) {
            Some(record) => record.version = version,
            None => {
                let forwarder: Arc<dyn Subscriber> =
                    Arc::new(DependencyForwarder(self.self_ref.clone()));
                observer.subscribe(self.watcher_id, forwarder);
                deps.insert(observer.observer_id(), DepRecord { observer, version });
            }
        }
    }
}

struct DependencyForwarder(Weak<ComputedObserver>);

impl Subscriber for DependencyForwarder {
    fn handle_change(&self, _new: &Value, _old: &Value, flags: Flags) {
        if let Some(observer) = self.0.upgrade() {
            observer.dependency_changed(flags);
        }
    }
}

impl Accessor for ComputedObserver {
    fn kind(&self) -> AccessorKind {
        AccessorKind::Object
    }

    fn get_value(&self) -> Value {
        if let Some(cached) = self.cached.read().expect("cached lock poisoned").clone() {
            return cached;
        }
        // Pass-through while nothing subscribes: evaluate untracked.
        self.run_getter()
    }

    fn set_value(&self, value: Value, _flags: Flags) -> Result<()> {
        match &self.descriptor.set {
            Some(setter) => {
                setter.call(&[Value::Object(self.obj.clone()), value])?;
                if self.is_active() {
                    self.dependency_changed(Flags::NONE);
                }
                Ok(())
            }
            None => {
                tracing::warn!(key = %self.key, "computed member has no setter; write ignored");
                Ok(())
            }
        }
    }
}

impl Observer for ComputedObserver {
    fn observer_id(&self) -> u64 {
        self.id
    }

    fn subscribe(&self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) -> bool {
        let mut guard = self.subscribers.write().expect("subscriber lock poisoned");
        let was_empty = guard.is_empty();
        let added = guard.add(id, subscriber);
        drop(guard);
        if added && was_empty {
            // First subscriber: establish the dependency set and the cache.
            self.recompute();
        }
        added
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut guard = self.subscribers.write().expect("subscriber lock poisoned");
        let removed = guard.remove(id);
        let now_empty = guard.is_empty();
        drop(guard);
        if removed && now_empty {
            self.release_dependencies();
        }
        removed
    }
}

impl BatchFlush for ComputedObserver {
    fn flush_id(&self) -> u64 {
        self.id
    }

    fn flush(&self, flags: Flags) {
        let old_value = self
            .pending_old
            .write()
            .expect("pending lock poisoned")
            .take();
        if let Some(old_value) = old_value {
            let current = self
                .cached
                .read()
                .expect("cached lock poisoned")
                .clone()
                .unwrap_or(Value::Null);
            if current != old_value {
                dispatch(&self.subscribers, |sub| {
                    sub.handle_change(&current, &old_value, flags)
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::property::PropertyObserver;
    use crate::observation::value::{NativeFunction, ObjectData};
    use std::sync::atomic::AtomicI32;

    struct Recorder {
        calls: AtomicI32,
        last: RwLock<Option<Value>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicI32::new(0),
                last: RwLock::new(None),
            })
        }
    }

    impl Subscriber for Recorder {
        fn handle_change(&self, new_value: &Value, _old: &Value, _flags: Flags) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.write().unwrap() = Some(new_value.clone());
        }
    }

    /// Wire a computed observer whose getter reads `first` and `last`
    /// through tracked property observers.
    fn full_name_fixture() -> (
        ObjectRef,
        Arc<ComputedObserver>,
        Arc<PropertyObserver>,
        Arc<PropertyObserver>,
        Arc<AtomicI32>,
    ) {
        let context = ObservationContext::new();
        let batch = Arc::new(BatchQueue::new());

        let obj = ObjectData::new();
        obj.set_field("first", Value::str("Ann"));
        obj.set_field("last", Value::str("Lee"));

        let first_observer = PropertyObserver::new(obj.clone(), "first", batch.clone());
        let last_observer = PropertyObserver::new(obj.clone(), "last", batch.clone());

        let compute_count = Arc::new(AtomicI32::new(0));
        let count_clone = compute_count.clone();
        let context_for_getter = context.clone();
        let first_for_getter = first_observer.clone();
        let last_for_getter = last_observer.clone();

        let descriptor = ComputedDescriptor {
            get: NativeFunction::new(move |_args| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                // Tracked reads: report the property observers to whichever
                // watcher is evaluating, then read through them.
                context_for_getter.report(first_for_getter.clone());
                let first = first_for_getter.get_value().to_display_string();
                context_for_getter.report(last_for_getter.clone());
                let last = last_for_getter.get_value().to_display_string();
                Ok(Value::str(format!("{first} {last}")))
            }),
            set: None,
            cacheable: true,
        };

        let computed = ComputedObserver::new(
            obj.clone(),
            "full",
            descriptor,
            context,
            batch,
        );
        (obj, computed, first_observer, last_observer, compute_count)
    }

    #[test]
    fn passthrough_while_unsubscribed() {
        let (_obj, computed, _first, _last, compute_count) = full_name_fixture();

        assert_eq!(computed.get_value(), Value::str("Ann Lee"));
        assert_eq!(computed.get_value(), Value::str("Ann Lee"));
        // No caching without subscribers: two reads, two evaluations.
        assert_eq!(compute_count.load(Ordering::SeqCst), 2);
        assert_eq!(computed.dependency_count(), 0);
    }

    #[test]
    fn subscribing_activates_tracking_and_caching() {
        let (_obj, computed, first, _last, compute_count) = full_name_fixture();

        let recorder = Recorder::new();
        computed.subscribe(SubscriberId::new(), recorder.clone());

        assert_eq!(compute_count.load(Ordering::SeqCst), 1);
        assert_eq!(computed.dependency_count(), 2);
        // Cached: reads do not re-evaluate.
        assert_eq!(computed.get_value(), Value::str("Ann Lee"));
        assert_eq!(compute_count.load(Ordering::SeqCst), 1);

        // A dependency change recomputes and notifies.
        first.set_value(Value::str("Bob"), Flags::NONE).unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorder.last.read().unwrap().clone().unwrap(),
            Value::str("Bob Lee")
        );
    }

    #[test]
    fn last_unsubscribe_releases_dependencies() {
        let (_obj, computed, first, _last, compute_count) = full_name_fixture();

        let recorder = Recorder::new();
        let id = SubscriberId::new();
        computed.subscribe(id, recorder.clone());
        assert_eq!(computed.dependency_count(), 2);

        computed.unsubscribe(id);
        assert_eq!(computed.dependency_count(), 0);
        assert_eq!(first.subscriber_count(), 0);

        // Back to pass-through: a change no longer notifies or recomputes.
        let before = compute_count.load(Ordering::SeqCst);
        first.set_value(Value::str("Cal"), Flags::NONE).unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(compute_count.load(Ordering::SeqCst), before);
    }

    #[test]
    fn conditional_getter_prunes_untaken_branch() {
        let context = ObservationContext::new();
        let batch = Arc::new(BatchQueue::new());

        let obj = ObjectData::new();
        obj.set_field("use_a", Value::from(true));
        obj.set_field("a", Value::str("A"));
        obj.set_field("b", Value::str("B"));

        let switch = PropertyObserver::new(obj.clone(), "use_a", batch.clone());
        let a = PropertyObserver::new(obj.clone(), "a", batch.clone());
        let b = PropertyObserver::new(obj.clone(), "b", batch.clone());

        let ctx = context.clone();
        let (switch_g, a_g, b_g) = (switch.clone(), a.clone(), b.clone());
        let descriptor = ComputedDescriptor {
            get: NativeFunction::new(move |_| {
                ctx.report(switch_g.clone());
                let use_a = switch_g.get_value().is_truthy();
                if use_a {
                    ctx.report(a_g.clone());
                    Ok(a_g.get_value())
                } else {
                    ctx.report(b_g.clone());
                    Ok(b_g.get_value())
                }
            }),
            set: None,
            cacheable: true,
        };
        let computed = ComputedObserver::new(obj, "pick", descriptor, context, batch);

        let recorder = Recorder::new();
        computed.subscribe(SubscriberId::new(), recorder.clone());
        assert_eq!(computed.dependency_count(), 2);
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 0);

        // Flip the switch: the `a` branch unsubscribes, `b` subscribes.
        switch.set_value(Value::from(false), Flags::NONE).unwrap();
        assert_eq!(computed.dependency_count(), 2);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
        assert_eq!(
            recorder.last.read().unwrap().clone().unwrap(),
            Value::str("B")
        );

        // Changes to the pruned branch no longer notify.
        let before = recorder.calls.load(Ordering::SeqCst);
        a.set_value(Value::str("A2"), Flags::NONE).unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn setter_routes_writes() {
        let context = ObservationContext::new();
        let batch = Arc::new(BatchQueue::new());
        let obj = ObjectData::new();
        obj.set_field("raw", Value::from(1.0));

        let raw = PropertyObserver::new(obj.clone(), "raw", batch.clone());
        let ctx = context.clone();
        let raw_g = raw.clone();
        let raw_s = raw.clone();
        let descriptor = ComputedDescriptor {
            get: NativeFunction::new(move |_| {
                ctx.report(raw_g.clone());
                Ok(Value::Number(raw_g.get_value().as_number() * 2.0))
            }),
            set: Some(NativeFunction::new(move |args| {
                raw_s.set_value(
                    Value::Number(args[1].as_number() / 2.0),
                    Flags::NONE,
                )?;
                Ok(Value::Null)
            })),
            cacheable: true,
        };
        let computed = ComputedObserver::new(obj, "doubled", descriptor, context, batch);

        let recorder = Recorder::new();
        computed.subscribe(SubscriberId::new(), recorder.clone());
        assert_eq!(computed.get_value(), Value::from(2.0));

        computed.set_value(Value::from(10.0), Flags::NONE).unwrap();
        assert_eq!(raw.get_value(), Value::from(5.0));
        assert_eq!(computed.get_value(), Value::from(10.0));
    }
}
