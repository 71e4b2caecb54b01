//! Let Binding
//!
//! Declares a computed local on the scope: `<let full-name.bind="first + ' '
//! + last">` keeps `fullName` in the override context (or the binding
//! context itself, when the let element opts into that) synchronized with
//! its expression. Internally this is a to-view property binding whose
//! target is chosen from the scope at bind time.

use std::sync::{Arc, RwLock};

use super::ast::Expression;
use super::mode::BindingMode;
use super::property::PropertyBinding;
use super::resources::ResourceRegistry;
use super::scope::Scope;
use crate::error::Result;
use crate::observation::{Flags, ObserverLocator, Value};

/// A binding maintaining a scope-local derived value.
#[derive(Clone)]
pub struct LetBinding {
    inner: Arc<LetBindingInner>,
}

struct LetBindingInner {
    source: Arc<Expression>,
    target_property: String,
    to_binding_context: bool,
    locator: ObserverLocator,
    resources: Option<Arc<ResourceRegistry>>,
    active: RwLock<Option<PropertyBinding>>,
}

impl LetBinding {
    /// Create an unbound let binding. With `to_binding_context`, the local
    /// lands on the binding context instead of the override context.
    pub fn new(
        source: Arc<Expression>,
        target_property: impl Into<String>,
        to_binding_context: bool,
        locator: ObserverLocator,
        resources: Option<Arc<ResourceRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new(LetBindingInner {
                source,
                target_property: target_property.into(),
                to_binding_context,
                locator,
                resources,
                active: RwLock::new(None),
            }),
        }
    }

    /// True while bound.
    pub fn is_bound(&self) -> bool {
        self.inner
            .active
            .read()
            .expect("active lock poisoned")
            .is_some()
    }

    /// Attach to `scope`: pick the target context and start the to-view
    /// propagation into it.
    pub fn bind(&self, flags: Flags, scope: &Arc<Scope>) -> Result<()> {
        if self.is_bound() {
            self.unbind(Flags::UNBIND)?;
        }
        let target = if self.inner.to_binding_context {
            scope.binding_context().clone()
        } else {
            Value::Object(scope.override_context().properties().clone())
        };
        let binding = PropertyBinding::new(
            self.inner.source.clone(),
            target,
            self.inner.target_property.clone(),
            BindingMode::ToView,
            self.inner.locator.clone(),
            self.inner.resources.clone(),
        );
        binding.bind(flags, scope)?;
        *self.inner.active.write().expect("active lock poisoned") = Some(binding);
        Ok(())
    }

    /// Detach and release the underlying propagation.
    pub fn unbind(&self, flags: Flags) -> Result<()> {
        let binding = self.inner.active.write().expect("active lock poisoned").take();
        if let Some(binding) = binding {
            binding.unbind(flags)?;
        }
        Ok(())
    }
}
