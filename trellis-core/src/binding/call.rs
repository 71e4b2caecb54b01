//! Call Binding
//!
//! Installs a callable into the target property; invoking it evaluates the
//! source expression in a child scope carrying the invocation arguments as
//! `$event` (first argument) and `$arguments` (all of them). Unbinding
//! clears the target property.

use std::sync::{Arc, RwLock, Weak};

use super::ast::{EvalEnv, Expression};
use super::resources::ResourceRegistry;
use super::scope::Scope;
use crate::error::{Error, Result};
use crate::observation::{
    Accessor, ArrayData, Flags, NativeFunction, ObserverLocator, Value,
};

struct CallBindingInner {
    source: Arc<Expression>,
    target: Value,
    target_property: String,
    locator: ObserverLocator,
    resources: Option<Arc<ResourceRegistry>>,
    scope: RwLock<Option<Arc<Scope>>>,
    accessor: RwLock<Option<Arc<dyn Accessor>>>,
}

impl CallBindingInner {
    fn call_source(&self, args: &[Value]) -> Result<Value> {
        let scope = self
            .scope
            .read()
            .expect("scope lock poisoned")
            .clone()
            .ok_or(Error::NilScope)?;

        // Layer the invocation arguments over the same binding context.
        let child = Scope::from_parent(&scope, scope.binding_context().clone());
        child
            .override_context()
            .set_local("$event", args.first().cloned().unwrap_or(Value::Null));
        child.override_context().set_local(
            "$arguments",
            Value::Array(ArrayData::new(args.to_vec())),
        );

        let env = EvalEnv::new(&self.locator, self.resources.as_deref());
        self.source.evaluate(&child, &env)
    }
}

/// A binding that exposes its source expression as a callable on the target.
#[derive(Clone)]
pub struct CallBinding {
    inner: Arc<CallBindingInner>,
}

impl CallBinding {
    /// Create an unbound call binding.
    pub fn new(
        source: Arc<Expression>,
        target: Value,
        target_property: impl Into<String>,
        locator: ObserverLocator,
        resources: Option<Arc<ResourceRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new(CallBindingInner {
                source,
                target,
                target_property: target_property.into(),
                locator,
                resources,
                scope: RwLock::new(None),
                accessor: RwLock::new(None),
            }),
        }
    }

    /// True while bound.
    pub fn is_bound(&self) -> bool {
        self.inner.scope.read().expect("scope lock poisoned").is_some()
    }

    /// Attach to `scope` and install the callable.
    pub fn bind(&self, flags: Flags, scope: &Arc<Scope>) -> Result<()> {
        if self.is_bound() {
            self.unbind(Flags::UNBIND)?;
        }
        *self.inner.scope.write().expect("scope lock poisoned") = Some(scope.clone());

        let accessor = self
            .inner
            .locator
            .get_accessor(&self.inner.target, &self.inner.target_property)?;

        let weak: Weak<CallBindingInner> = Arc::downgrade(&self.inner);
        let callable = NativeFunction::new(move |args| match weak.upgrade() {
            Some(inner) => inner.call_source(args),
            None => Ok(Value::Null),
        });
        accessor.set_value(Value::Function(callable), flags)?;
        *self.inner.accessor.write().expect("accessor lock poisoned") = Some(accessor);
        Ok(())
    }

    /// Detach and clear the target property.
    pub fn unbind(&self, flags: Flags) -> Result<()> {
        if !self.is_bound() {
            return Ok(());
        }
        if let Some(accessor) = self
            .inner
            .accessor
            .write()
            .expect("accessor lock poisoned")
            .take()
        {
            accessor.set_value(Value::Null, flags)?;
        }
        *self.inner.scope.write().expect("scope lock poisoned") = None;
        Ok(())
    }
}
