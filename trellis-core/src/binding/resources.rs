//! Resource Registry
//!
//! Explicit registration tables for the resources templates and expressions
//! refer to by name: value converters, binding behaviors, custom elements,
//! custom attributes (including template controllers), and binding commands.
//! Everything is registered up front against a registry instance passed to
//! the binder/compiler and to bindings — there is no annotation reflection
//! and no global registry.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap as OrderedMap;
use serde::{Deserialize, Serialize};

use super::mode::BindingMode;
use super::scope::Scope;
use crate::error::{Error, Result};
use crate::observation::Value;

/// Transforms values crossing a binding: source → target via `to_view`,
/// target → source via `from_view`.
pub trait ValueConverter: Send + Sync {
    /// Convert a value flowing toward the target.
    fn to_view(&self, value: Value, args: &[Value]) -> Result<Value>;

    /// Convert a value flowing back toward the source. Defaults to identity.
    fn from_view(&self, value: Value, _args: &[Value]) -> Result<Value> {
        Ok(value)
    }
}

/// Hooks into a binding's lifecycle. Applied via `& name` expression tails.
pub trait BindingBehavior: Send + Sync {
    /// Called while the wearing binding binds.
    fn bind(&self, scope: &Arc<Scope>, args: &[Value]) -> Result<()>;

    /// Called while the wearing binding unbinds.
    fn unbind(&self, _scope: &Arc<Scope>) -> Result<()> {
        Ok(())
    }
}

/// One bindable property of a custom element or attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct BindableDefinition {
    /// Property name on the component instance.
    pub property: String,
    /// Attribute name in markup.
    pub attribute: String,
    /// Default mode when bound with the plain `bind` command.
    pub mode: BindingMode,
}

/// A registered custom element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDefinition {
    /// Resource name (also the markup tag name).
    pub name: String,
    /// Render without an enclosing host element.
    pub containerless: bool,
    /// Bindables keyed by attribute name.
    pub bindables: OrderedMap<String, BindableDefinition>,
}

impl ElementDefinition {
    /// Define an element resource named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            containerless: false,
            bindables: OrderedMap::new(),
        }
    }

    /// Mark the element containerless.
    pub fn containerless(mut self) -> Self {
        self.containerless = true;
        self
    }

    /// Declare a bindable: `attribute` in markup maps to `property` on the
    /// instance, defaulting to `mode`.
    pub fn bindable(
        mut self,
        attribute: impl Into<String>,
        property: impl Into<String>,
        mode: BindingMode,
    ) -> Self {
        let attribute = attribute.into();
        self.bindables.insert(
            attribute.clone(),
            BindableDefinition {
                property: property.into(),
                attribute,
                mode,
            },
        );
        self
    }
}

/// A registered custom attribute or template controller.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDefinition {
    /// Resource name (also the attribute name in markup).
    pub name: String,
    /// Structural directive wrapping its host in a nested template.
    pub is_template_controller: bool,
    /// Bindables keyed by attribute (sub-binding) name.
    pub bindables: OrderedMap<String, BindableDefinition>,
    /// The bindable targeted when the attribute value is a single binding.
    pub primary: String,
}

impl AttributeDefinition {
    /// Define an ordinary custom attribute named `name` with a single
    /// `value` bindable.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name,
            is_template_controller: false,
            bindables: OrderedMap::new(),
            primary: "value".to_string(),
        }
        .bindable("value", "value", BindingMode::ToView)
    }

    /// Define a template controller named `name`.
    pub fn template_controller(name: impl Into<String>) -> Self {
        let mut def = Self::new(name);
        def.is_template_controller = true;
        def
    }

    /// Declare a bindable.
    pub fn bindable(
        mut self,
        attribute: impl Into<String>,
        property: impl Into<String>,
        mode: BindingMode,
    ) -> Self {
        let attribute = attribute.into();
        self.bindables.insert(
            attribute.clone(),
            BindableDefinition {
                property: property.into(),
                attribute,
                mode,
            },
        );
        self
    }

    /// Set the primary bindable.
    pub fn primary(mut self, attribute: impl Into<String>) -> Self {
        self.primary = attribute.into();
        self
    }

    /// True when the attribute has more than one declared bindable, making
    /// the semicolon-delimited multi-binding grammar applicable.
    pub fn accepts_multi_bindings(&self) -> bool {
        self.bindables.len() > 1
    }
}

/// A binding command: the `.suffix` of an attribute, deciding how its value
/// compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingCommand {
    /// Property binding with the bindable's default mode.
    Bind,
    /// Property binding, one-time.
    OneTime,
    /// Property binding, to-view.
    ToView,
    /// Property binding, from-view.
    FromView,
    /// Property binding, two-way.
    TwoWay,
    /// Call binding: the target property receives a callable.
    Call,
    /// Ref binding: the expression receives the target object.
    Ref,
    /// Iterator binding for repeaters (`item of items`).
    For,
}

impl BindingCommand {
    /// True when the command never resolves its target against custom
    /// attribute resources (`ref` targets the element itself, not a
    /// resource).
    pub fn ignores_custom_attributes(self) -> bool {
        matches!(self, BindingCommand::Ref)
    }

    /// The explicit binding mode, if the command names one.
    pub fn mode(self) -> Option<BindingMode> {
        match self {
            BindingCommand::OneTime => Some(BindingMode::OneTime),
            BindingCommand::ToView => Some(BindingMode::ToView),
            BindingCommand::FromView => Some(BindingMode::FromView),
            BindingCommand::TwoWay => Some(BindingMode::TwoWay),
            _ => None,
        }
    }
}

/// Registration tables for all named resources.
pub struct ResourceRegistry {
    converters: HashMap<String, Arc<dyn ValueConverter>>,
    behaviors: HashMap<String, Arc<dyn BindingBehavior>>,
    elements: HashMap<String, Arc<ElementDefinition>>,
    attributes: HashMap<String, Arc<AttributeDefinition>>,
    commands: HashMap<String, BindingCommand>,
}

impl ResourceRegistry {
    /// Create a registry with the standard binding commands registered.
    pub fn new() -> Self {
        let mut commands = HashMap::new();
        commands.insert("bind".to_string(), BindingCommand::Bind);
        commands.insert("one-time".to_string(), BindingCommand::OneTime);
        commands.insert("to-view".to_string(), BindingCommand::ToView);
        commands.insert("from-view".to_string(), BindingCommand::FromView);
        commands.insert("two-way".to_string(), BindingCommand::TwoWay);
        commands.insert("call".to_string(), BindingCommand::Call);
        commands.insert("ref".to_string(), BindingCommand::Ref);
        commands.insert("for".to_string(), BindingCommand::For);
        Self {
            converters: HashMap::new(),
            behaviors: HashMap::new(),
            elements: HashMap::new(),
            attributes: HashMap::new(),
            commands,
        }
    }

    /// Register a value converter under `name`.
    pub fn register_value_converter(
        &mut self,
        name: impl Into<String>,
        converter: Arc<dyn ValueConverter>,
    ) {
        self.converters.insert(name.into(), converter);
    }

    /// Look up a value converter.
    pub fn value_converter(&self, name: &str) -> Result<Arc<dyn ValueConverter>> {
        self.converters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownValueConverter(name.to_string()))
    }

    /// Register a binding behavior under `name`.
    pub fn register_binding_behavior(
        &mut self,
        name: impl Into<String>,
        behavior: Arc<dyn BindingBehavior>,
    ) {
        self.behaviors.insert(name.into(), behavior);
    }

    /// Look up a binding behavior.
    pub fn binding_behavior(&self, name: &str) -> Result<Arc<dyn BindingBehavior>> {
        self.behaviors
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownBindingBehavior(name.to_string()))
    }

    /// Register a custom element.
    pub fn register_element(&mut self, definition: ElementDefinition) {
        self.elements
            .insert(definition.name.clone(), Arc::new(definition));
    }

    /// Look up a custom element by tag name.
    pub fn element(&self, name: &str) -> Option<Arc<ElementDefinition>> {
        self.elements.get(name).cloned()
    }

    /// Register a custom attribute or template controller.
    pub fn register_attribute(&mut self, definition: AttributeDefinition) {
        self.attributes
            .insert(definition.name.clone(), Arc::new(definition));
    }

    /// Look up a custom attribute by name.
    pub fn attribute(&self, name: &str) -> Option<Arc<AttributeDefinition>> {
        self.attributes.get(name).cloned()
    }

    /// Register an additional binding command.
    pub fn register_command(&mut self, name: impl Into<String>, command: BindingCommand) {
        self.commands.insert(name.into(), command);
    }

    /// Look up a binding command by its attribute suffix.
    pub fn command(&self, name: &str) -> Option<BindingCommand> {
        self.commands.get(name).copied()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;
    impl ValueConverter for Upper {
        fn to_view(&self, value: Value, _args: &[Value]) -> Result<Value> {
            Ok(Value::str(value.to_display_string().to_uppercase()))
        }
    }

    #[test]
    fn converters_resolve_by_name() {
        let mut registry = ResourceRegistry::new();
        registry.register_value_converter("upper", Arc::new(Upper));

        let converter = registry.value_converter("upper").unwrap();
        assert_eq!(
            converter.to_view(Value::str("ann"), &[]).unwrap(),
            Value::str("ANN")
        );

        let err = registry.value_converter("missing").err().unwrap();
        assert!(matches!(err, Error::UnknownValueConverter(n) if n == "missing"));
    }

    #[test]
    fn standard_commands_are_preregistered() {
        let registry = ResourceRegistry::new();
        assert_eq!(registry.command("bind"), Some(BindingCommand::Bind));
        assert_eq!(registry.command("two-way"), Some(BindingCommand::TwoWay));
        assert_eq!(registry.command("for"), Some(BindingCommand::For));
        assert_eq!(registry.command("nope"), None);
    }

    #[test]
    fn attribute_definitions_declare_bindables() {
        let def = AttributeDefinition::new("square")
            .bindable("color", "color", BindingMode::ToView)
            .bindable("size", "size", BindingMode::ToView);
        assert!(def.accepts_multi_bindings());
        assert_eq!(def.primary, "value");

        let simple = AttributeDefinition::new("highlight");
        assert!(!simple.accepts_multi_bindings());
    }

    #[test]
    fn template_controllers_are_flagged() {
        let def = AttributeDefinition::template_controller("when");
        assert!(def.is_template_controller);
    }
}
