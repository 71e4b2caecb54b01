//! Observer Locator
//!
//! Central service deciding which observer mediates a given object/key pair.
//! The decision runs in a fixed order:
//!
//! 1. A host-specific target locator may claim the pair (covers node-like
//!    render targets external to this crate).
//! 2. `length`/`size` on a collection returns the collection's shared length
//!    observer; numeric indices on arrays return index observers.
//! 3. Pluggable adapters may intercept, seeing the property's computed
//!    descriptor if one exists.
//! 4. A computed descriptor yields a computed observer when cacheable and
//!    the dirty checker otherwise; plain data yields a property observer.
//!    Non-object primitives yield a no-op observer.
//!
//! Observers are memoized in an instance-scoped cache keyed by owning-object
//! id and property name, unless the observer opts out of caching. The
//! locator also owns the batch queue, observation context, and dirty checker
//! its observers share; disposing the locator disposes the lot.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use super::array::{ArrayIndexObserver, ArrayObserver};
use super::batch::BatchQueue;
use super::context::ObservationContext;
use super::computed::ComputedObserver;
use super::dirty::DirtyChecker;
use super::map::MapObserver;
use super::observer::{Accessor, Observer};
use super::property::{PrimitiveObserver, PropertyAccessor, PropertyObserver};
use super::set::SetObserver;
use super::value::{ComputedDescriptor, ObjectRef, Value};
use crate::error::Result;
use crate::lifecycle::Scheduler;

/// Host hook claiming observers for render-target objects.
pub trait TargetObserverLocator: Send + Sync {
    /// Return an observer for the pair, or `None` to let the locator decide.
    fn get_observer(&self, obj: &Value, key: &str) -> Option<Arc<dyn Observer>>;
}

/// Host hook claiming accessors for render-target objects.
pub trait TargetAccessorLocator: Send + Sync {
    /// Return an accessor for the pair, or `None` to let the locator decide.
    fn get_accessor(&self, obj: &Value, key: &str) -> Option<Arc<dyn Accessor>>;
}

/// Pluggable interception ahead of the computed/dirty-check decision.
pub trait ObservationAdapter: Send + Sync {
    /// Return an observer for the pair, or `None` to pass.
    fn get_observer(
        &self,
        obj: &ObjectRef,
        key: &str,
        descriptor: Option<&ComputedDescriptor>,
    ) -> Option<Arc<dyn Observer>>;
}

struct LocatorState {
    scheduler: Arc<Scheduler>,
    context: Arc<ObservationContext>,
    batch: Arc<BatchQueue>,
    dirty_checker: Arc<DirtyChecker>,
    target_observers: RwLock<Option<Arc<dyn TargetObserverLocator>>>,
    target_accessors: RwLock<Option<Arc<dyn TargetAccessorLocator>>>,
    adapters: RwLock<Vec<Arc<dyn ObservationAdapter>>>,
    property_cache: DashMap<(u64, String), Arc<dyn Observer>>,
    array_cache: DashMap<u64, Arc<ArrayObserver>>,
    map_cache: DashMap<u64, Arc<MapObserver>>,
    set_cache: DashMap<u64, Arc<SetObserver>>,
}

/// Cheaply cloneable handle to one observation runtime instance.
#[derive(Clone)]
pub struct ObserverLocator {
    state: Arc<LocatorState>,
}

impl ObserverLocator {
    /// Create a locator (and its batch queue, observation context, and dirty
    /// checker) driven by `scheduler`.
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let dirty_checker = DirtyChecker::new(scheduler.clone());
        Self {
            state: Arc::new(LocatorState {
                scheduler,
                context: ObservationContext::new(),
                batch: Arc::new(BatchQueue::new()),
                dirty_checker,
                target_observers: RwLock::new(None),
                target_accessors: RwLock::new(None),
                adapters: RwLock::new(Vec::new()),
                property_cache: DashMap::new(),
                array_cache: DashMap::new(),
                map_cache: DashMap::new(),
                set_cache: DashMap::new(),
            }),
        }
    }

    /// The scheduler driving deferred work.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.state.scheduler
    }

    /// The shared observation context (dependency-tracking watcher stack).
    pub fn context(&self) -> &Arc<ObservationContext> {
        &self.state.context
    }

    /// The shared batch queue.
    pub fn batch_queue(&self) -> &Arc<BatchQueue> {
        &self.state.batch
    }

    /// The shared dirty checker.
    pub fn dirty_checker(&self) -> &Arc<DirtyChecker> {
        &self.state.dirty_checker
    }

    /// Install the host's render-target observer hook.
    pub fn set_target_observer_locator(&self, locator: Arc<dyn TargetObserverLocator>) {
        *self
            .state
            .target_observers
            .write()
            .expect("target locator lock poisoned") = Some(locator);
    }

    /// Install the host's render-target accessor hook.
    pub fn set_target_accessor_locator(&self, locator: Arc<dyn TargetAccessorLocator>) {
        *self
            .state
            .target_accessors
            .write()
            .expect("target locator lock poisoned") = Some(locator);
    }

    /// Register an observation adapter.
    pub fn add_adapter(&self, adapter: Arc<dyn ObservationAdapter>) {
        self.state
            .adapters
            .write()
            .expect("adapter lock poisoned")
            .push(adapter);
    }

    /// The (memoized) collection observer for `array`.
    pub fn get_array_observer(&self, array: &super::value::ArrayRef) -> Arc<ArrayObserver> {
        self.state
            .array_cache
            .entry(array.id())
            .or_insert_with(|| ArrayObserver::new(array.clone(), self.state.batch.clone()))
            .clone()
    }

    /// The (memoized) collection observer for `map`.
    pub fn get_map_observer(&self, map: &super::value::MapRef) -> Arc<MapObserver> {
        self.state
            .map_cache
            .entry(map.id())
            .or_insert_with(|| MapObserver::new(map.clone(), self.state.batch.clone()))
            .clone()
    }

    /// The (memoized) collection observer for `set`.
    pub fn get_set_observer(&self, set: &super::value::SetRef) -> Arc<SetObserver> {
        self.state
            .set_cache
            .entry(set.id())
            .or_insert_with(|| SetObserver::new(set.clone(), self.state.batch.clone()))
            .clone()
    }

    /// Locate or create the observer for `obj.key`.
    pub fn get_observer(&self, obj: &Value, key: &str) -> Result<Arc<dyn Observer>> {
        // 1. Host-specific target locator.
        let hook = self
            .state
            .target_observers
            .read()
            .expect("target locator lock poisoned")
            .clone();
        if let Some(hook) = hook {
            if let Some(observer) = hook.get_observer(obj, key) {
                return Ok(observer);
            }
        }

        match obj {
            Value::Array(array) => {
                // 2. Collection length; 3. numeric indices.
                if key == "length" {
                    return Ok(self.get_array_observer(array).length_observer());
                }
                if let Ok(index) = key.parse::<usize>() {
                    return self.cached_or(array.id(), key, || {
                        Ok(ArrayIndexObserver::new(self.get_array_observer(array), index))
                    });
                }
                self.cached_or(array.id(), key, || {
                    self.state
                        .dirty_checker
                        .create_observer(obj.clone(), key)
                        .map(|o| o as Arc<dyn Observer>)
                })
            }
            Value::Map(map) => {
                if key == "size" {
                    return Ok(self.get_map_observer(map).size_observer());
                }
                self.cached_or(map.id(), key, || {
                    self.state
                        .dirty_checker
                        .create_observer(obj.clone(), key)
                        .map(|o| o as Arc<dyn Observer>)
                })
            }
            Value::Set(set) => {
                if key == "size" {
                    return Ok(self.get_set_observer(set).size_observer());
                }
                self.cached_or(set.id(), key, || {
                    self.state
                        .dirty_checker
                        .create_observer(obj.clone(), key)
                        .map(|o| o as Arc<dyn Observer>)
                })
            }
            Value::Object(object) => self.cached_or(object.id(), key, || {
                self.create_object_observer(obj, object, key)
            }),
            // Non-object primitives: only `string.length` reads meaningfully.
            _ => Ok(PrimitiveObserver::new(obj.clone(), key)),
        }
    }

    /// Locate or create a read/write accessor for `obj.key`.
    ///
    /// Plain data properties get a pass-through accessor without change
    /// notification; everything else shares the observer, since bypassing it
    /// for writes would desynchronize notifications.
    pub fn get_accessor(&self, obj: &Value, key: &str) -> Result<Arc<dyn Accessor>> {
        let hook = self
            .state
            .target_accessors
            .read()
            .expect("target locator lock poisoned")
            .clone();
        if let Some(hook) = hook {
            if let Some(accessor) = hook.get_accessor(obj, key) {
                return Ok(accessor);
            }
        }

        if let Value::Object(object) = obj {
            if object.descriptor(key).is_none() {
                return Ok(PropertyAccessor::new(object.clone(), key));
            }
        }
        let observer = self.get_observer(obj, key)?;
        let accessor: Arc<dyn Accessor> = observer;
        Ok(accessor)
    }

    fn create_object_observer(
        &self,
        obj: &Value,
        object: &ObjectRef,
        key: &str,
    ) -> Result<Arc<dyn Observer>> {
        let descriptor = object.descriptor(key);

        // Adapters intercept ahead of the computed/dirty-check decision.
        let adapters = self
            .state
            .adapters
            .read()
            .expect("adapter lock poisoned")
            .clone();
        for adapter in adapters {
            if let Some(observer) = adapter.get_observer(object, key, descriptor.as_ref()) {
                return Ok(observer);
            }
        }

        match descriptor {
            Some(descriptor) if descriptor.cacheable => Ok(ComputedObserver::new(
                object.clone(),
                key,
                descriptor,
                self.state.context.clone(),
                self.state.batch.clone(),
            ) as Arc<dyn Observer>),
            Some(_) => self
                .state
                .dirty_checker
                .create_observer(obj.clone(), key)
                .map(|o| o as Arc<dyn Observer>),
            None => Ok(PropertyObserver::new(
                object.clone(),
                key,
                self.state.batch.clone(),
            ) as Arc<dyn Observer>),
        }
    }

    fn cached_or(
        &self,
        owner_id: u64,
        key: &str,
        create: impl FnOnce() -> Result<Arc<dyn Observer>>,
    ) -> Result<Arc<dyn Observer>> {
        let cache_key = (owner_id, key.to_string());
        if let Some(observer) = self.state.property_cache.get(&cache_key) {
            return Ok(observer.clone());
        }
        let observer = create()?;
        if observer.cacheable() {
            self.state.property_cache.insert(cache_key, observer.clone());
        }
        Ok(observer)
    }
}
