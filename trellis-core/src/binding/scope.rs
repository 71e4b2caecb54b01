//! Scope Chain
//!
//! A scope pairs a binding context (the component instance an expression
//! evaluates against) with an override context holding ad-hoc locals — the
//! loop-contextual variables a repeater declares (`index`, `first`, `last`,
//! `even`, `odd`) or the locals a `let` element introduces.
//!
//! Scopes form a singly-linked ancestor chain. Identifier lookup walks
//! outward until a context owns the requested name or the chain ends; an
//! explicit ancestor-hop count (`$parent.$parent.x`) jumps before looking.
//! Override locals live in an ordinary observed object, so the observer
//! machinery covers them with no special cases.

use std::sync::Arc;

use crate::observation::{ObjectData, ObjectRef, Value};

/// Ad-hoc locals layered over a binding context.
pub struct OverrideContext {
    binding_context: Value,
    properties: ObjectRef,
}

impl OverrideContext {
    /// Create an override context over `binding_context`.
    pub fn new(binding_context: Value) -> Self {
        Self {
            binding_context,
            properties: ObjectData::new(),
        }
    }

    /// The binding context this override layers over.
    pub fn binding_context(&self) -> &Value {
        &self.binding_context
    }

    /// The locals object. Observers for locals are created lazily by the
    /// observer locator on first access, like any other object.
    pub fn properties(&self) -> &ObjectRef {
        &self.properties
    }

    /// Declare or overwrite a local. Raw write; use the locator's observer
    /// once bindings may be watching.
    pub fn set_local(&self, name: impl Into<String>, value: Value) {
        self.properties.set_field(name, value);
    }

    /// True when this override owns `name`.
    pub fn has(&self, name: &str) -> bool {
        self.properties.has_own(name)
    }
}

/// One frame of the scope chain.
pub struct Scope {
    binding_context: Value,
    override_context: OverrideContext,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    /// Create a root scope over `binding_context`.
    pub fn create(binding_context: Value) -> Arc<Scope> {
        Arc::new(Scope {
            binding_context: binding_context.clone(),
            override_context: OverrideContext::new(binding_context),
            parent: None,
        })
    }

    /// Create a child scope over `binding_context`, chained to `parent`.
    pub fn from_parent(parent: &Arc<Scope>, binding_context: Value) -> Arc<Scope> {
        Arc::new(Scope {
            binding_context: binding_context.clone(),
            override_context: OverrideContext::new(binding_context),
            parent: Some(parent.clone()),
        })
    }

    /// This frame's binding context.
    pub fn binding_context(&self) -> &Value {
        &self.binding_context
    }

    /// This frame's override context.
    pub fn override_context(&self) -> &OverrideContext {
        &self.override_context
    }

    /// The parent frame, if any.
    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    /// The binding context `ancestor` hops up the chain, or `Null` when the
    /// chain is shorter.
    pub fn ancestor_context(&self, ancestor: usize) -> Value {
        let mut current = self;
        for _ in 0..ancestor {
            match current.parent.as_ref() {
                Some(parent) => current = parent,
                None => return Value::Null,
            }
        }
        current.binding_context.clone()
    }

    /// Resolve the context object that owns `name`.
    ///
    /// With `ancestor > 0`, the search is pinned to that frame: the frame's
    /// override locals win, then its binding context, with the binding
    /// context as fallback. With `ancestor == 0`, the chain is walked
    /// outward; if no frame owns the name, the starting frame's binding
    /// context is returned so assignment creates the property there.
    pub fn resolve_context(&self, name: &str, ancestor: usize) -> Value {
        if ancestor > 0 {
            let mut current = self;
            for _ in 0..ancestor {
                match current.parent.as_ref() {
                    Some(parent) => current = parent,
                    None => return Value::Null,
                }
            }
            return current
                .owning_context(name)
                .unwrap_or_else(|| current.binding_context.clone());
        }

        let mut current = self;
        loop {
            if let Some(context) = current.owning_context(name) {
                return context;
            }
            match current.parent.as_ref() {
                Some(parent) => current = parent,
                None => return self.binding_context.clone(),
            }
        }
    }

    fn owning_context(&self, name: &str) -> Option<Value> {
        if self.override_context.has(name) {
            return Some(Value::Object(self.override_context.properties().clone()));
        }
        if let Value::Object(obj) = &self.binding_context {
            if obj.has(name) {
                return Some(self.binding_context.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::object_from;

    #[test]
    fn resolves_binding_context_properties() {
        let root = object_from([("name", Value::str("Ann"))]);
        let scope = Scope::create(Value::Object(root.clone()));

        let context = scope.resolve_context("name", 0);
        assert_eq!(context, Value::Object(root));
    }

    #[test]
    fn override_locals_shadow_the_binding_context() {
        let root = object_from([("item", Value::str("outer"))]);
        let scope = Scope::create(Value::Object(root));
        scope.override_context().set_local("item", Value::str("local"));

        let context = scope.resolve_context("item", 0);
        assert_eq!(
            context,
            Value::Object(scope.override_context().properties().clone())
        );
    }

    #[test]
    fn lookup_walks_the_ancestor_chain() {
        let root = object_from([("shared", Value::from(1.0))]);
        let parent = Scope::create(Value::Object(root.clone()));
        let child = Scope::from_parent(&parent, Value::Object(ObjectData::new()));

        let context = child.resolve_context("shared", 0);
        assert_eq!(context, Value::Object(root));
    }

    #[test]
    fn unowned_names_fall_back_to_the_starting_context() {
        let inner = ObjectData::new();
        let parent = Scope::create(Value::Object(ObjectData::new()));
        let child = Scope::from_parent(&parent, Value::Object(inner.clone()));

        // Nobody owns "fresh": assignment should land on the child context.
        let context = child.resolve_context("fresh", 0);
        assert_eq!(context, Value::Object(inner));
    }

    #[test]
    fn ancestor_hops_pin_the_frame() {
        let grandparent = object_from([("x", Value::str("top"))]);
        let parent_obj = object_from([("x", Value::str("mid"))]);
        let child_obj = object_from([("x", Value::str("leaf"))]);

        let top = Scope::create(Value::Object(grandparent.clone()));
        let mid = Scope::from_parent(&top, Value::Object(parent_obj.clone()));
        let leaf = Scope::from_parent(&mid, Value::Object(child_obj));

        assert_eq!(leaf.resolve_context("x", 1), Value::Object(parent_obj));
        assert_eq!(leaf.resolve_context("x", 2), Value::Object(grandparent));
        // Overshooting the chain reads as Null.
        assert_eq!(leaf.resolve_context("x", 5), Value::Null);
        assert_eq!(leaf.ancestor_context(5), Value::Null);
    }
}
