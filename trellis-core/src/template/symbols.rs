//! Symbol Tree
//!
//! The binder's output: a resolved, routing-complete representation of a
//! template. Every attribute has been classified (plain binding, custom
//! attribute, template controller, bindable), every controller chain has
//! been lifted into nested wrappers, and every replace-part has been moved
//! into its manifest root's parts registry. The compiler walks this tree to
//! emit instruction rows.

use std::sync::Arc;

use indexmap::IndexMap as OrderedMap;

use crate::binding::{
    AttributeDefinition, BindableDefinition, BindingCommand, ElementDefinition, Expression,
};

/// One node of the symbol tree.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSymbol {
    /// A plain or custom element.
    Element(ElementSymbol),
    /// A template controller wrapping an inner node.
    Controller(TemplateControllerSymbol),
    /// A `<let>` element declaring scope locals.
    Let(LetSymbol),
    /// A text node.
    Text(TextSymbol),
}

/// A plain or custom element with its classified attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSymbol {
    /// Tag name.
    pub name: String,
    /// The element resource, when the tag names a registered custom
    /// element.
    pub definition: Option<Arc<ElementDefinition>>,
    /// Attributes that resolved to nothing special.
    pub plain_attributes: Vec<PlainAttributeSymbol>,
    /// Bindings targeting the custom element's bindables.
    pub bindables: Vec<BindingSymbol>,
    /// Non-structural custom attributes.
    pub custom_attributes: Vec<CustomAttributeSymbol>,
    /// Child nodes in document order.
    pub children: Vec<NodeSymbol>,
    /// Named replaceable fragments registered on this manifest root.
    pub parts: OrderedMap<String, ReplacePartSymbol>,
}

impl ElementSymbol {
    /// Create an empty symbol for `name`.
    pub fn new(name: impl Into<String>, definition: Option<Arc<ElementDefinition>>) -> Self {
        Self {
            name: name.into(),
            definition,
            plain_attributes: Vec::new(),
            bindables: Vec::new(),
            custom_attributes: Vec::new(),
            children: Vec::new(),
            parts: OrderedMap::new(),
        }
    }

    /// True when the tag names a registered custom element.
    pub fn is_custom(&self) -> bool {
        self.definition.is_some()
    }

    /// True when this element contributes an instruction row.
    pub fn is_target(&self) -> bool {
        self.is_custom()
            || !self.custom_attributes.is_empty()
            || self
                .plain_attributes
                .iter()
                .any(|attr| attr.expression.is_some() || attr.command.is_some())
    }
}

/// A plain attribute, possibly expression-bearing.
#[derive(Debug, Clone, PartialEq)]
pub struct PlainAttributeSymbol {
    /// Target property name.
    pub target: String,
    /// Raw attribute value.
    pub raw_value: String,
    /// Binding command, if any.
    pub command: Option<BindingCommand>,
    /// Parsed expression: the command's expression, or an interpolation
    /// found in a commandless value.
    pub expression: Option<Expression>,
}

/// One binding aimed at a bindable property.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingSymbol {
    /// The targeted bindable.
    pub bindable: BindableDefinition,
    /// Binding command, if any.
    pub command: Option<BindingCommand>,
    /// Raw value text.
    pub raw_value: String,
    /// Parsed expression, when the value is expression-bearing.
    pub expression: Option<Expression>,
}

/// A non-structural custom attribute usage.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeSymbol {
    /// The attribute resource.
    pub definition: Arc<AttributeDefinition>,
    /// Sub-bindings (one, or several from the multi-binding grammar).
    pub bindings: Vec<BindingSymbol>,
}

/// A template controller lifted around an inner node.
///
/// Declaration order decides nesting: the first controller attribute on an
/// element is the innermost wrapper. The original element survives as the
/// innermost `template`; in the rendered tree its position is held by a
/// marker inside a synthetic template container, one per controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateControllerSymbol {
    /// The controller resource.
    pub definition: Arc<AttributeDefinition>,
    /// The controller's own bindings.
    pub bindings: Vec<BindingSymbol>,
    /// The wrapped node.
    pub template: Box<NodeSymbol>,
}

/// A `<let>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct LetSymbol {
    /// Declare locals on the binding context instead of the override
    /// context.
    pub to_binding_context: bool,
    /// One entry per declared local.
    pub bindings: Vec<LetBindingSymbol>,
}

/// One local declared by a `<let>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct LetBindingSymbol {
    /// Local name.
    pub target: String,
    /// The local's value expression.
    pub expression: Expression,
}

/// A text node; a target only when interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSymbol {
    /// The raw text.
    pub text: String,
    /// The interpolation expression, when the text has `${}` holes.
    pub interpolation: Option<Expression>,
}

/// A named replaceable fragment, substituted by name rather than
/// positionally.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacePartSymbol {
    /// Part name.
    pub name: String,
    /// The fragment's node.
    pub template: Box<NodeSymbol>,
}
