//! Observable Wrapper
//!
//! An explicit get/set-trap wrapper over a backing object: reads route
//! through the locator (registering the observer with the active dependency
//! watcher, if any) and writes route through the observer (notifying
//! subscribers). Code that reads and writes through the wrapper gets
//! implicit observability for arbitrarily-shaped objects without
//! per-property registration, at the cost of a small per-access indirection.
//!
//! Computed getters are the main customer: a getter written against a proxy
//! auto-tracks everything it touches.

use std::sync::Arc;

use super::locator::ObserverLocator;
use super::subscribers::Flags;
use super::value::{ObjectRef, Value};
use crate::error::Result;

/// Get/set-trap wrapper making reads observable and writes notifying.
#[derive(Clone)]
pub struct ObservableProxy {
    target: ObjectRef,
    locator: ObserverLocator,
}

impl ObservableProxy {
    /// Wrap `target` with traps routed through `locator`.
    pub fn new(target: ObjectRef, locator: ObserverLocator) -> Self {
        Self { target, locator }
    }

    /// The wrapped object.
    pub fn target(&self) -> &ObjectRef {
        &self.target
    }

    /// Tracked read: fetches the observer, reports it to the active
    /// dependency watcher, and returns the current value.
    pub fn get(&self, key: &str) -> Result<Value> {
        let value = Value::Object(self.target.clone());
        let observer = self.locator.get_observer(&value, key)?;
        self.locator.context().report(observer.clone());
        Ok(observer.get_value())
    }

    /// Notifying write: routes through the property's observer.
    pub fn set(&self, key: &str, new_value: Value, flags: Flags) -> Result<()> {
        let value = Value::Object(self.target.clone());
        let observer = self.locator.get_observer(&value, key)?;
        observer.set_value(new_value, flags)
    }

    /// Wrap a nested object member for chained tracked access. Returns
    /// `None` when the member is not an object.
    pub fn get_object(&self, key: &str) -> Result<Option<ObservableProxy>> {
        match self.get(key)? {
            Value::Object(obj) => Ok(Some(ObservableProxy::new(obj, self.locator.clone()))),
            _ => Ok(None),
        }
    }
}

/// Build a proxy-aware computed descriptor: the getter receives an
/// [`ObservableProxy`] over the owning object, so every read it performs is
/// tracked automatically.
pub fn computed_with_proxy(
    locator: &ObserverLocator,
    get: impl Fn(&ObservableProxy) -> Result<Value> + Send + Sync + 'static,
    set: Option<Arc<dyn Fn(&ObservableProxy, Value) -> Result<()> + Send + Sync>>,
) -> impl Fn(ObjectRef) -> super::value::ComputedDescriptor {
    let locator = locator.clone();
    let get = Arc::new(get);
    move |obj: ObjectRef| {
        let getter = {
            let get = get.clone();
            let locator = locator.clone();
            let obj = obj.clone();
            super::value::NativeFunction::new(move |_args| {
                let proxy = ObservableProxy::new(obj.clone(), locator.clone());
                get(&proxy)
            })
        };
        let setter = set.as_ref().map(|set| {
            let set = set.clone();
            let locator = locator.clone();
            let obj = obj.clone();
            super::value::NativeFunction::new(move |args| {
                let proxy = ObservableProxy::new(obj.clone(), locator.clone());
                let incoming = args.get(1).cloned().unwrap_or(Value::Null);
                set(&proxy, incoming)?;
                Ok(Value::Null)
            })
        });
        super::value::ComputedDescriptor {
            get: getter,
            set: setter,
            cacheable: true,
        }
    }
}
