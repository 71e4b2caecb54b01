//! Property Observers
//!
//! The workhorse observer for plain data properties: it owns the
//! authoritative value on the host object and notifies subscribers on every
//! effective change. Writes that do not change the value (by [`Value`]
//! equality) are swallowed.
//!
//! Inside an open batch, a property observer records the oldest pending
//! old-value and queues itself; the coalesced notification fires once when
//! the outermost batch ends.

use std::sync::{Arc, RwLock, Weak};

use super::batch::{BatchFlush, BatchQueue};
use super::observer::{next_observer_id, Accessor, AccessorKind, Observer};
use super::subscribers::{dispatch, Flags, Subscriber, SubscriberId, SubscriberRegistry};
use super::value::{ObjectRef, Value};
use crate::error::Result;

/// Observer for one plain data property of an object.
pub struct PropertyObserver {
    id: u64,
    obj: ObjectRef,
    key: String,
    subscribers: RwLock<SubscriberRegistry<dyn Subscriber>>,
    pending_old: RwLock<Option<Value>>,
    batch: Arc<BatchQueue>,
    self_ref: Weak<PropertyObserver>,
}

impl PropertyObserver {
    /// Create an observer for `obj.key`.
    pub fn new(obj: ObjectRef, key: impl Into<String>, batch: Arc<BatchQueue>) -> Arc<Self> {
        let key = key.into();
        Arc::new_cyclic(|self_ref| Self {
            id: next_observer_id(),
            obj,
            key,
            subscribers: RwLock::new(SubscriberRegistry::new()),
            pending_old: RwLock::new(None),
            batch,
            self_ref: self_ref.clone(),
        })
    }

    /// The observed property name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("subscriber lock poisoned")
            .count()
    }

    fn call_subscribers(&self, new_value: &Value, old_value: &Value, flags: Flags) {
        dispatch(&self.subscribers, |sub| {
            sub.handle_change(new_value, old_value, flags)
        });
    }
}

impl Accessor for PropertyObserver {
    fn get_value(&self) -> Value {
        self.obj.field(&self.key).unwrap_or(Value::Null)
    }

    fn set_value(&self, value: Value, flags: Flags) -> Result<()> {
        let old_value = self.get_value();
        if value == old_value {
            return Ok(());
        }
        self.obj.set_field(self.key.clone(), value.clone());

        if self.batch.is_batching() {
            let mut pending = self.pending_old.write().expect("pending lock poisoned");
            if pending.is_none() {
                *pending = Some(old_value);
            }
            drop(pending);
            let this = self.self_ref.upgrade().expect("observer self reference dropped");
            self.batch.enqueue(this);
        } else {
            self.call_subscribers(&value, &old_value, flags);
        }
        Ok(())
    }
}

impl Observer for PropertyObserver {
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

impl BatchFlush for PropertyObserver {
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
            let current = self.get_value();
            if current != old_value {
                self.call_subscribers(&current, &old_value, flags);
            }
        }
    }
}

/// Plain accessor for a data property: reads and writes pass through without
/// notification. Used where the caller asked for an accessor rather than an
/// observer.
pub struct PropertyAccessor {
    obj: ObjectRef,
    key: String,
}

impl PropertyAccessor {
    /// Create an accessor for `obj.key`.
    pub fn new(obj: ObjectRef, key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            obj,
            key: key.into(),
        })
    }
}

impl Accessor for PropertyAccessor {
    fn get_value(&self) -> Value {
        self.obj.field(&self.key).unwrap_or(Value::Null)
    }

    fn set_value(&self, value: Value, _flags: Flags) -> Result<()> {
        self.obj.set_field(self.key.clone(), value);
        Ok(())
    }
}

/// No-op observer for properties of non-object primitives.
///
/// Only `string.length` carries a meaningful value; everything else reads as
/// `Null`. Writes are ignored and no notification ever fires.
pub struct PrimitiveObserver {
    id: u64,
    value: Value,
    key: String,
}

impl PrimitiveObserver {
    /// Create an observer for `value.key`.
    pub fn new(value: Value, key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: next_observer_id(),
            value,
            key: key.into(),
        })
    }
}

impl Accessor for PrimitiveObserver {
    fn kind(&self) -> AccessorKind {
        AccessorKind::Primitive
    }

    fn get_value(&self) -> Value {
        self.value.get_member(&self.key).unwrap_or(Value::Null)
    }

    fn set_value(&self, _value: Value, _flags: Flags) -> Result<()> {
        Ok(())
    }
}

impl Observer for PrimitiveObserver {
    fn observer_id(&self) -> u64 {
        self.id
    }

    fn cacheable(&self) -> bool {
        false
    }

    fn subscribe(&self, _id: SubscriberId, _subscriber: Arc<dyn Subscriber>) -> bool {
        false
    }

    fn unsubscribe(&self, _id: SubscriberId) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::value::ObjectData;
    use std::sync::atomic::{AtomicI32, Ordering};

    struct Recorder {
        calls: AtomicI32,
        last: RwLock<Option<(Value, Value)>>,
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
        fn handle_change(&self, new_value: &Value, old_value: &Value, _flags: Flags) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.write().unwrap() = Some((new_value.clone(), old_value.clone()));
        }
    }

    #[test]
    fn set_value_notifies_subscribers() {
        let obj = ObjectData::new();
        obj.set_field("name", Value::str("Ann"));
        let batch = Arc::new(BatchQueue::new());
        let observer = PropertyObserver::new(obj, "name", batch);

        let recorder = Recorder::new();
        let id = SubscriberId::new();
        assert!(observer.subscribe(id, recorder.clone()));

        observer.set_value(Value::str("Bob"), Flags::NONE).unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        let (new_value, old_value) = recorder.last.read().unwrap().clone().unwrap();
        assert_eq!(new_value, Value::str("Bob"));
        assert_eq!(old_value, Value::str("Ann"));
    }

    #[test]
    fn same_value_write_is_swallowed() {
        let obj = ObjectData::new();
        obj.set_field("n", Value::from(1.0));
        let observer = PropertyObserver::new(obj, "n", Arc::new(BatchQueue::new()));

        let recorder = Recorder::new();
        observer.subscribe(SubscriberId::new(), recorder.clone());
        observer.set_value(Value::from(1.0), Flags::NONE).unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn batched_writes_coalesce_to_one_notification() {
        let obj = ObjectData::new();
        obj.set_field("n", Value::from(0.0));
        let batch = Arc::new(BatchQueue::new());
        let observer = PropertyObserver::new(obj, "n", batch.clone());

        let recorder = Recorder::new();
        observer.subscribe(SubscriberId::new(), recorder.clone());

        batch.begin();
        observer.set_value(Value::from(1.0), Flags::NONE).unwrap();
        observer.set_value(Value::from(2.0), Flags::NONE).unwrap();
        observer.set_value(Value::from(3.0), Flags::NONE).unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
        batch.end(Flags::NONE);

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        let (new_value, old_value) = recorder.last.read().unwrap().clone().unwrap();
        assert_eq!(new_value, Value::from(3.0));
        assert_eq!(old_value, Value::from(0.0));
    }

    #[test]
    fn batched_write_back_to_original_is_silent() {
        let obj = ObjectData::new();
        obj.set_field("n", Value::from(5.0));
        let batch = Arc::new(BatchQueue::new());
        let observer = PropertyObserver::new(obj, "n", batch.clone());

        let recorder = Recorder::new();
        observer.subscribe(SubscriberId::new(), recorder.clone());

        batch.begin();
        observer.set_value(Value::from(9.0), Flags::NONE).unwrap();
        observer.set_value(Value::from(5.0), Flags::NONE).unwrap();
        batch.end(Flags::NONE);

        // Net change is nil; the coalesced flush stays silent.
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let obj = ObjectData::new();
        let observer = PropertyObserver::new(obj, "x", Arc::new(BatchQueue::new()));

        let recorder = Recorder::new();
        let id = SubscriberId::new();
        observer.subscribe(id, recorder.clone());
        observer.set_value(Value::from(1.0), Flags::NONE).unwrap();
        assert!(observer.unsubscribe(id));
        observer.set_value(Value::from(2.0), Flags::NONE).unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn primitive_observer_reads_string_length() {
        let observer = PrimitiveObserver::new(Value::str("abc"), "length");
        assert_eq!(observer.get_value(), Value::from(3.0));
        assert!(!observer.subscribe(SubscriberId::new(), Recorder::new()));
    }
}
