//! Ref Binding
//!
//! Assigns the target object itself to the source expression at bind time,
//! giving view-model code a handle to a render target. Unbinding clears the
//! assignment, but only if the expression still points at this binding's
//! target (the scope may have been given a different reference since).

use std::sync::{Arc, RwLock};

use super::ast::{EvalEnv, Expression};
use super::resources::ResourceRegistry;
use super::scope::Scope;
use crate::error::Result;
use crate::observation::{Flags, ObserverLocator, Value};

/// A binding publishing the target object through the source expression.
#[derive(Clone)]
pub struct RefBinding {
    inner: Arc<RefBindingInner>,
}

struct RefBindingInner {
    source: Arc<Expression>,
    target: Value,
    locator: ObserverLocator,
    resources: Option<Arc<ResourceRegistry>>,
    scope: RwLock<Option<Arc<Scope>>>,
}

impl RefBinding {
    /// Create an unbound ref binding.
    pub fn new(
        source: Arc<Expression>,
        target: Value,
        locator: ObserverLocator,
        resources: Option<Arc<ResourceRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new(RefBindingInner {
                source,
                target,
                locator,
                resources,
                scope: RwLock::new(None),
            }),
        }
    }

    /// True while bound.
    pub fn is_bound(&self) -> bool {
        self.inner.scope.read().expect("scope lock poisoned").is_some()
    }

    /// Attach to `scope` and publish the target reference.
    pub fn bind(&self, _flags: Flags, scope: &Arc<Scope>) -> Result<()> {
        if self.is_bound() {
            self.unbind(Flags::UNBIND)?;
        }
        let env = EvalEnv::new(&self.inner.locator, self.inner.resources.as_deref());
        self.inner
            .source
            .assign(scope, &env, self.inner.target.clone())?;
        *self.inner.scope.write().expect("scope lock poisoned") = Some(scope.clone());
        Ok(())
    }

    /// Detach, clearing the reference if it still points at this target.
    pub fn unbind(&self, _flags: Flags) -> Result<()> {
        let scope = self.inner.scope.write().expect("scope lock poisoned").take();
        let Some(scope) = scope else {
            return Ok(());
        };
        let env = EvalEnv::new(&self.inner.locator, self.inner.resources.as_deref());
        if self.inner.source.evaluate(&scope, &env)? == self.inner.target {
            self.inner.source.assign(&scope, &env, Value::Null)?;
        }
        Ok(())
    }
}
