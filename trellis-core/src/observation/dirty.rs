//! Dirty Checking
//!
//! Fallback polling for properties with no reliable interception point:
//! non-cacheable computed members and host-specific lookups nothing else
//! claims. The checker keeps one flat list of tracked observers and a single
//! persistent scheduler task that compares cached against current values
//! every N frames, firing subscribers on change.
//!
//! Polling is a correctness hazard dressed as a convenience, so policy flags
//! let strict configurations fail fast — throwing or warning when a property
//! would require dirty checking — instead of silently degrading.

use std::sync::{Arc, Mutex, RwLock, Weak};

use super::observer::{next_observer_id, Accessor, AccessorKind, Observer};
use super::subscribers::{dispatch, Flags, Subscriber, SubscriberId, SubscriberRegistry};
use super::value::Value;
use crate::error::{Error, Result};
use crate::lifecycle::{QueueTaskOptions, ScheduledTask, Scheduler};

/// Policy and cadence for the dirty checker.
#[derive(Debug, Clone, Copy)]
pub struct DirtyCheckSettings {
    /// Never poll. Observers are still created (unless `throw_on_create`),
    /// but they go silent.
    pub disabled: bool,
    /// Error instead of creating a dirty-check observer.
    pub throw_on_create: bool,
    /// Log a warning whenever a property falls back to dirty checking.
    pub warn_on_create: bool,
    /// Scheduler frames between polls.
    pub frames_per_check: u64,
}

impl Default for DirtyCheckSettings {
    fn default() -> Self {
        Self {
            disabled: false,
            throw_on_create: false,
            warn_on_create: false,
            frames_per_check: 6,
        }
    }
}

/// The shared poller. One per observer locator.
pub struct DirtyChecker {
    settings: RwLock<DirtyCheckSettings>,
    tracked: RwLock<Vec<Arc<DirtyCheckObserver>>>,
    scheduler: Arc<Scheduler>,
    task: Mutex<Option<Arc<ScheduledTask>>>,
    self_ref: Weak<DirtyChecker>,
}

impl DirtyChecker {
    /// Create a checker driving its poll task on `scheduler`.
    pub fn new(scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            settings: RwLock::new(DirtyCheckSettings::default()),
            tracked: RwLock::new(Vec::new()),
            scheduler,
            task: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Replace the policy settings.
    pub fn configure(&self, settings: DirtyCheckSettings) {
        *self.settings.write().expect("settings lock poisoned") = settings;
    }

    /// The current policy settings.
    pub fn settings(&self) -> DirtyCheckSettings {
        *self.settings.read().expect("settings lock poisoned")
    }

    /// Number of currently tracked observers.
    pub fn tracked_count(&self) -> usize {
        self.tracked.read().expect("tracked lock poisoned").len()
    }

    /// Create an observer for `obj.key`, honoring the fail-fast policies.
    pub fn create_observer(
        &self,
        obj: Value,
        key: impl Into<String>,
    ) -> Result<Arc<DirtyCheckObserver>> {
        let key = key.into();
        let settings = self.settings();
        if settings.throw_on_create {
            return Err(Error::DirtyCheckDisallowed(key));
        }
        if settings.warn_on_create {
            tracing::warn!(property = %key, "property requires dirty checking");
        }
        Ok(DirtyCheckObserver::new(obj, key, self.self_ref.clone()))
    }

    fn add(&self, observer: Arc<DirtyCheckObserver>) {
        let settings = self.settings();
        if settings.disabled {
            return;
        }
        let mut tracked = self.tracked.write().expect("tracked lock poisoned");
        if tracked.iter().any(|o| o.id == observer.id) {
            return;
        }
        tracked.push(observer);
        let needs_task = tracked.len() == 1;
        drop(tracked);

        if needs_task {
            let weak = self.self_ref.clone();
            let task = self.scheduler.queue_task(
                move || {
                    if let Some(checker) = weak.upgrade() {
                        checker.poll();
                    }
                },
                QueueTaskOptions {
                    delay: settings.frames_per_check.saturating_sub(1),
                    persistent: true,
                    ..Default::default()
                },
            );
            *self.task.lock().expect("task lock poisoned") = Some(task);
        }
    }

    fn remove(&self, observer_id: u64) {
        let mut tracked = self.tracked.write().expect("tracked lock poisoned");
        tracked.retain(|o| o.id != observer_id);
        let now_empty = tracked.is_empty();
        drop(tracked);

        if now_empty {
            if let Some(task) = self.task.lock().expect("task lock poisoned").take() {
                task.cancel();
            }
        }
    }

    /// Compare every tracked record and fire subscribers on change.
    pub fn poll(&self) {
        let snapshot: Vec<Arc<DirtyCheckObserver>> = self
            .tracked
            .read()
            .expect("tracked lock poisoned")
            .clone();
        for observer in snapshot {
            observer.check(Flags::NONE);
        }
    }
}

/// Poll-backed observer for one property.
pub struct DirtyCheckObserver {
    id: u64,
    obj: Value,
    key: String,
    old_value: RwLock<Value>,
    subscribers: RwLock<SubscriberRegistry<dyn Subscriber>>,
    checker: Weak<DirtyChecker>,
    self_ref: Weak<DirtyCheckObserver>,
}

impl DirtyCheckObserver {
    fn new(obj: Value, key: String, checker: Weak<DirtyChecker>) -> Arc<Self> {
        let initial = obj.get_member(&key).unwrap_or(Value::Null);
        Arc::new_cyclic(|self_ref| Self {
            id: next_observer_id(),
            obj,
            key,
            old_value: RwLock::new(initial),
            subscribers: RwLock::new(SubscriberRegistry::new()),
            checker,
            self_ref: self_ref.clone(),
        })
    }

    /// The observed property name.
    pub fn key(&self) -> &str {
        &self.key
    }

    fn current(&self) -> Value {
        match self.obj.get_member(&self.key) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(property = %self.key, error = %err, "dirty-check read failed");
                Value::Null
            }
        }
    }

    fn check(&self, flags: Flags) {
        let current = self.current();
        let old = {
            let mut old_value = self.old_value.write().expect("old value lock poisoned");
            if *old_value == current {
                return;
            }
            std::mem::replace(&mut *old_value, current.clone())
        };
        dispatch(&self.subscribers, |sub| {
            sub.handle_change(&current, &old, flags)
        });
    }
}

impl Accessor for DirtyCheckObserver {
    fn kind(&self) -> AccessorKind {
        AccessorKind::Object
    }

    fn get_value(&self) -> Value {
        self.current()
    }

    fn set_value(&self, value: Value, flags: Flags) -> Result<()> {
        if let Value::Object(obj) = &self.obj {
            if let Some(descriptor) = obj.descriptor(&self.key) {
                match &descriptor.set {
                    Some(setter) => {
                        setter.call(&[self.obj.clone(), value])?;
                    }
                    None => {
                        tracing::warn!(property = %self.key, "no setter; write ignored");
                        return Ok(());
                    }
                }
            } else {
                obj.set_field(self.key.clone(), value);
            }
            self.check(flags);
        }
        Ok(())
    }
}

impl Observer for DirtyCheckObserver {
    fn observer_id(&self) -> u64 {
        self.id
    }

    fn subscribe(&self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) -> bool {
        let mut guard = self.subscribers.write().expect("subscriber lock poisoned");
        let was_empty = guard.is_empty();
        let added = guard.add(id, subscriber);
        drop(guard);
        if added && was_empty {
            *self.old_value.write().expect("old value lock poisoned") = self.current();
            if let Some(checker) = self.checker.upgrade() {
                let this = self
                    .self_ref
                    .upgrade()
                    .expect("observer self reference dropped");
                checker.add(this);
            }
        }
        added
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut guard = self.subscribers.write().expect("subscriber lock poisoned");
        let removed = guard.remove(id);
        let now_empty = guard.is_empty();
        drop(guard);
        if removed && now_empty {
            if let Some(checker) = self.checker.upgrade() {
                checker.remove(self.id);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::value::{ComputedDescriptor, NativeFunction, ObjectData};
    use std::sync::atomic::{AtomicI32, Ordering};

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

    #[test]
    fn polls_on_the_configured_cadence() {
        let scheduler = Scheduler::new();
        let checker = DirtyChecker::new(scheduler.clone());
        checker.configure(DirtyCheckSettings {
            frames_per_check: 3,
            ..Default::default()
        });

        let obj = ObjectData::new();
        obj.set_field("n", Value::from(1.0));
        let observer = checker
            .create_observer(Value::Object(obj.clone()), "n")
            .unwrap();

        let recorder = Recorder::new();
        observer.subscribe(SubscriberId::new(), recorder.clone());

        // Mutate behind the observer's back; only the poll can see it.
        obj.set_field("n", Value::from(2.0));
        scheduler.run_frames(2);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
        scheduler.tick();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorder.last.read().unwrap().clone().unwrap(),
            Value::from(2.0)
        );

        // Unchanged value: next poll is silent.
        scheduler.run_frames(3);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribing_last_subscriber_stops_tracking() {
        let scheduler = Scheduler::new();
        let checker = DirtyChecker::new(scheduler.clone());

        let obj = ObjectData::new();
        let observer = checker
            .create_observer(Value::Object(obj.clone()), "n")
            .unwrap();
        let id = SubscriberId::new();
        observer.subscribe(id, Recorder::new());
        assert_eq!(checker.tracked_count(), 1);

        observer.unsubscribe(id);
        assert_eq!(checker.tracked_count(), 0);
    }

    #[test]
    fn throw_policy_refuses_creation() {
        let checker = DirtyChecker::new(Scheduler::new());
        checker.configure(DirtyCheckSettings {
            throw_on_create: true,
            ..Default::default()
        });

        let obj = ObjectData::new();
        let err = checker
            .create_observer(Value::Object(obj), "volatile")
            .err()
            .unwrap();
        assert!(matches!(err, Error::DirtyCheckDisallowed(k) if k == "volatile"));
    }

    #[test]
    fn disabled_policy_never_polls() {
        let scheduler = Scheduler::new();
        let checker = DirtyChecker::new(scheduler.clone());
        checker.configure(DirtyCheckSettings {
            disabled: true,
            ..Default::default()
        });

        let obj = ObjectData::new();
        obj.set_field("n", Value::from(1.0));
        let observer = checker
            .create_observer(Value::Object(obj.clone()), "n")
            .unwrap();
        let recorder = Recorder::new();
        observer.subscribe(SubscriberId::new(), recorder.clone());

        obj.set_field("n", Value::from(2.0));
        scheduler.run_frames(20);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn polls_non_cacheable_computed_members() {
        let scheduler = Scheduler::new();
        let checker = DirtyChecker::new(scheduler.clone());

        let obj = ObjectData::new();
        obj.set_field("ticks", Value::from(0.0));
        obj.define_computed(
            "now",
            ComputedDescriptor {
                get: NativeFunction::new(|args| args[0].get_member("ticks")),
                set: None,
                cacheable: false,
            },
        );

        let observer = checker
            .create_observer(Value::Object(obj.clone()), "now")
            .unwrap();
        let recorder = Recorder::new();
        observer.subscribe(SubscriberId::new(), recorder.clone());

        obj.set_field("ticks", Value::from(7.0));
        scheduler.run_frames(6);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorder.last.read().unwrap().clone().unwrap(),
            Value::from(7.0)
        );
    }
}
