//! Property Binding
//!
//! Connects a source expression to one target property in one of four modes.
//! The state machine is unbound → binding → bound → unbinding → unbound, and
//! binding to a second scope while bound performs a full unbind first.
//!
//! The binding is the subscriber of record for everything its expression
//! touches: on every change it re-evaluates (except the single-scope-access
//! fast path, which uses the authoritative new value), pushes to the target
//! when the result differs from the last push, and re-connects so
//! conditional expressions track the branch they currently take.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use super::ast::{Connectable, EvalEnv, Expression};
use super::connectable::{DependencyHandle, DependencyRecords};
use super::mode::BindingMode;
use super::resources::ResourceRegistry;
use super::scope::Scope;
use crate::error::{Error, Result};
use crate::observation::{
    Accessor, CollectionSubscriber, Flags, IndexMap, Observer, ObserverLocator, Subscriber,
    SubscriberId, Value,
};

/// Lifecycle state of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStatus {
    /// No scope attached.
    Unbound,
    /// `bind` in progress.
    Binding,
    /// Active.
    Bound,
    /// `unbind` in progress.
    Unbinding,
}

enum TargetHandle {
    Accessor(Arc<dyn Accessor>),
    Observer(Arc<dyn Observer>),
}

impl TargetHandle {
    fn set(&self, value: Value, flags: Flags) -> Result<()> {
        match self {
            TargetHandle::Accessor(a) => a.set_value(value, flags),
            TargetHandle::Observer(o) => o.set_value(value, flags),
        }
    }
}

pub(crate) struct PropertyBindingInner {
    id: SubscriberId,
    target_id: SubscriberId,
    source: Arc<Expression>,
    target: Value,
    target_property: String,
    mode: BindingMode,
    locator: ObserverLocator,
    resources: Option<Arc<ResourceRegistry>>,
    status: RwLock<BindingStatus>,
    scope: RwLock<Option<Arc<Scope>>>,
    target_handle: RwLock<Option<TargetHandle>>,
    last_value: RwLock<Option<Value>>,
    records: RwLock<DependencyRecords>,
    applied_behaviors: RwLock<Vec<String>>,
    updating_target: AtomicBool,
    updating_source: AtomicBool,
    self_ref: Weak<PropertyBindingInner>,
}

impl PropertyBindingInner {
    fn env(&self) -> EvalEnv<'_> {
        EvalEnv::new(&self.locator, self.resources.as_deref())
    }

    fn bound_scope(&self) -> Option<Arc<Scope>> {
        if *self.status.read().expect("status lock poisoned") != BindingStatus::Bound {
            return None;
        }
        self.scope.read().expect("scope lock poisoned").clone()
    }

    /// Source-side change: re-evaluate, push, re-connect.
    fn source_changed(&self, new_value: Option<&Value>, flags: Flags) {
        let Some(scope) = self.bound_scope() else {
            return;
        };

        if self.mode.updates_target() {
            let value = if self.source.unwrapped().is_single_access() && new_value.is_some() {
                // The observer handed us the authoritative value; skip the
                // re-evaluation. Converter wrappers still re-evaluate.
                if matches!(
                    self.source.as_ref(),
                    Expression::ValueConverter { .. } | Expression::BindingBehavior { .. }
                ) {
                    match self.source.evaluate(&scope, &self.env()) {
                        Ok(v) => v,
                        Err(err) => {
                            tracing::warn!(error = %err, "binding re-evaluation failed");
                            return;
                        }
                    }
                } else {
                    new_value.cloned().unwrap_or(Value::Null)
                }
            } else {
                match self.source.evaluate(&scope, &self.env()) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::warn!(error = %err, "binding re-evaluation failed");
                        return;
                    }
                }
            };

            let changed =
                self.last_value.read().expect("last value lock poisoned").as_ref() != Some(&value);
            if changed {
                self.push_to_target(value, flags);
            }
        }

        // Dependencies may differ call to call; refresh them and drop the
        // stale ones from the previous pass.
        self.records
            .write()
            .expect("records lock poisoned")
            .begin_pass();
        if let Err(err) = self.source.connect(&scope, &self.env(), self) {
            tracing::warn!(error = %err, "binding re-connect failed");
        }
        self.records
            .write()
            .expect("records lock poisoned")
            .unobserve_stale(self.id);
    }

    fn push_to_target(&self, value: Value, flags: Flags) {
        let handle = self.target_handle.read().expect("target lock poisoned");
        if let Some(handle) = handle.as_ref() {
            self.updating_target.store(true, Ordering::SeqCst);
            let result = handle.set(value.clone(), flags);
            self.updating_target.store(false, Ordering::SeqCst);
            if let Err(err) = result {
                tracing::warn!(error = %err, "target update failed");
                return;
            }
        }
        drop(handle);
        *self.last_value.write().expect("last value lock poisoned") = Some(value);
    }

    /// Target-side change: assign back through the source expression.
    fn target_changed(&self, new_value: &Value, _flags: Flags) {
        let Some(scope) = self.bound_scope() else {
            return;
        };
        *self.last_value.write().expect("last value lock poisoned") = Some(new_value.clone());
        self.updating_source.store(true, Ordering::SeqCst);
        let result = self.source.assign(&scope, &self.env(), new_value.clone());
        self.updating_source.store(false, Ordering::SeqCst);
        if let Err(err) = result {
            tracing::warn!(error = %err, "source update failed");
        }
    }
}

impl Connectable for PropertyBindingInner {
    fn observe_property(&self, obj: &Value, key: &str) -> Result<()> {
        let observer = self.locator.get_observer(obj, key)?;
        let subscriber: Arc<dyn Subscriber> = Arc::new(SourceSubscriber(self.self_ref.clone()));
        self.records
            .write()
            .expect("records lock poisoned")
            .observe_property(self.id, observer, &subscriber);
        Ok(())
    }

    fn observe_collection(&self, collection: &Value) -> Result<()> {
        let handle = match collection {
            Value::Array(array) => DependencyHandle::Array(self.locator.get_array_observer(array)),
            Value::Map(map) => DependencyHandle::Map(self.locator.get_map_observer(map)),
            Value::Set(set) => DependencyHandle::Set(self.locator.get_set_observer(set)),
            _ => return Ok(()),
        };
        let subscriber: Arc<dyn CollectionSubscriber> =
            Arc::new(SourceCollectionSubscriber(self.self_ref.clone()));
        self.records
            .write()
            .expect("records lock poisoned")
            .observe_collection(self.id, handle, &subscriber);
        Ok(())
    }
}

struct SourceSubscriber(Weak<PropertyBindingInner>);

impl Subscriber for SourceSubscriber {
    fn handle_change(&self, new_value: &Value, _old_value: &Value, flags: Flags) {
        if let Some(inner) = self.0.upgrade() {
            if inner.updating_source.load(Ordering::SeqCst) {
                return;
            }
            inner.source_changed(Some(new_value), flags);
        }
    }
}

struct SourceCollectionSubscriber(Weak<PropertyBindingInner>);

impl CollectionSubscriber for SourceCollectionSubscriber {
    fn handle_collection_change(&self, _index_map: &IndexMap, flags: Flags) {
        if let Some(inner) = self.0.upgrade() {
            inner.source_changed(None, flags);
        }
    }
}

struct TargetSubscriber(Weak<PropertyBindingInner>);

impl Subscriber for TargetSubscriber {
    fn handle_change(&self, new_value: &Value, _old_value: &Value, flags: Flags) {
        if let Some(inner) = self.0.upgrade() {
            if inner.updating_target.load(Ordering::SeqCst) {
                return;
            }
            inner.target_changed(new_value, flags);
        }
    }
}

/// A binding propagating between a source expression and a target property.
#[derive(Clone)]
pub struct PropertyBinding {
    inner: Arc<PropertyBindingInner>,
}

impl PropertyBinding {
    /// Create an unbound binding.
    pub fn new(
        source: Arc<Expression>,
        target: Value,
        target_property: impl Into<String>,
        mode: BindingMode,
        locator: ObserverLocator,
        resources: Option<Arc<ResourceRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new_cyclic(|self_ref| PropertyBindingInner {
                id: SubscriberId::new(),
                target_id: SubscriberId::new(),
                source,
                target,
                target_property: target_property.into(),
                mode,
                locator,
                resources,
                status: RwLock::new(BindingStatus::Unbound),
                scope: RwLock::new(None),
                target_handle: RwLock::new(None),
                last_value: RwLock::new(None),
                records: RwLock::new(DependencyRecords::new()),
                applied_behaviors: RwLock::new(Vec::new()),
                updating_target: AtomicBool::new(false),
                updating_source: AtomicBool::new(false),
                self_ref: self_ref.clone(),
            }),
        }
    }

    /// This binding's subscriber id.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// The binding mode.
    pub fn mode(&self) -> BindingMode {
        self.inner.mode
    }

    /// Current lifecycle status.
    pub fn status(&self) -> BindingStatus {
        *self.inner.status.read().expect("status lock poisoned")
    }

    /// True while bound to a scope.
    pub fn is_bound(&self) -> bool {
        self.status() == BindingStatus::Bound
    }

    /// Number of live source-dependency subscriptions.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .records
            .read()
            .expect("records lock poisoned")
            .count()
    }

    /// Attach to `scope`: apply behaviors, resolve the target, perform the
    /// initial push (for target-updating modes), and connect observers.
    pub fn bind(&self, flags: Flags, scope: &Arc<Scope>) -> Result<()> {
        let inner = &self.inner;
        {
            let status = *inner.status.read().expect("status lock poisoned");
            if status == BindingStatus::Bound {
                let same = inner
                    .scope
                    .read()
                    .expect("scope lock poisoned")
                    .as_ref()
                    .is_some_and(|s| Arc::ptr_eq(s, scope));
                if same {
                    return Ok(());
                }
                // A new scope implies a full unbind first.
                self.unbind(Flags::UNBIND)?;
            }
        }
        *inner.status.write().expect("status lock poisoned") = BindingStatus::Binding;
        *inner.scope.write().expect("scope lock poisoned") = Some(scope.clone());

        // Behavior hooks, outermost-first.
        for (name, args) in inner.source.behaviors() {
            let resources = inner
                .resources
                .as_ref()
                .ok_or_else(|| Error::NoResources(name.to_string()))?;
            let behavior = resources.binding_behavior(name)?;
            {
                let mut applied = inner
                    .applied_behaviors
                    .write()
                    .expect("behavior lock poisoned");
                if applied.iter().any(|n| n == name) {
                    return Err(Error::BehaviorAlreadyApplied(name.to_string()));
                }
                applied.push(name.to_string());
            }
            let arg_values: Vec<Value> = args
                .iter()
                .map(|arg| arg.evaluate(scope, &inner.env()))
                .collect::<Result<_>>()?;
            behavior.bind(scope, &arg_values)?;
        }

        // Resolve the target handle. Target-observing modes write through
        // the observer so sibling subscribers stay coherent.
        let handle = if inner.mode.observes_target() {
            let observer = inner
                .locator
                .get_observer(&inner.target, &inner.target_property)?;
            observer.subscribe(
                inner.target_id,
                Arc::new(TargetSubscriber(inner.self_ref.clone())),
            );
            TargetHandle::Observer(observer)
        } else {
            TargetHandle::Accessor(
                inner
                    .locator
                    .get_accessor(&inner.target, &inner.target_property)?,
            )
        };
        *inner.target_handle.write().expect("target lock poisoned") = Some(handle);

        if inner.mode.updates_target() {
            let value = inner.source.evaluate(scope, &inner.env())?;
            inner.push_to_target(value, Flags::BIND);
        }

        if inner.mode.observes_source() {
            inner
                .records
                .write()
                .expect("records lock poisoned")
                .begin_pass();
            inner.source.connect(scope, &inner.env(), inner.as_ref())?;
        }

        *inner.status.write().expect("status lock poisoned") = BindingStatus::Bound;
        Ok(())
    }

    /// Detach: release behaviors, target subscription, and every source
    /// dependency. Mirror of `bind`.
    pub fn unbind(&self, _flags: Flags) -> Result<()> {
        let inner = &self.inner;
        {
            let status = *inner.status.read().expect("status lock poisoned");
            if status != BindingStatus::Bound {
                return Ok(());
            }
        }
        *inner.status.write().expect("status lock poisoned") = BindingStatus::Unbinding;

        let scope = inner.scope.read().expect("scope lock poisoned").clone();
        if let (Some(scope), Some(resources)) = (scope.as_ref(), inner.resources.as_ref()) {
            // Innermost behavior last applied, so release in reverse.
            for (name, _) in inner.source.behaviors().into_iter().rev() {
                if let Ok(behavior) = resources.binding_behavior(name) {
                    behavior.unbind(scope)?;
                }
            }
        }
        inner
            .applied_behaviors
            .write()
            .expect("behavior lock poisoned")
            .clear();

        {
            let handle = inner.target_handle.write().expect("target lock poisoned").take();
            if let Some(TargetHandle::Observer(observer)) = handle {
                observer.unsubscribe(inner.target_id);
            }
        }
        inner
            .records
            .write()
            .expect("records lock poisoned")
            .unobserve_all(inner.id);

        *inner.scope.write().expect("scope lock poisoned") = None;
        *inner.last_value.write().expect("last value lock poisoned") = None;
        *inner.status.write().expect("status lock poisoned") = BindingStatus::Unbound;
        Ok(())
    }
}
