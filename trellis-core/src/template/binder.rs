//! Template Binder
//!
//! Walks a markup tree bottom-up and produces the symbol tree. Per element,
//! every attribute is parsed into its syntax triple and routed: plain
//! binding, custom-element bindable, custom attribute (single or
//! multi-binding), or template controller.
//!
//! # Lifting
//!
//! An element carrying controller attributes is wrapped once per controller,
//! in declaration order, the first-encountered controller innermost. Each
//! wrapper's `template` points at the next-inner node, so the compiler can
//! give every controller an independent nested definition. The element's
//! rendered position is held by a marker in a synthetic template container
//! per controller.
//!
//! # Replace parts
//!
//! A `part="name"` attribute short-circuits ordinary placement: the wrapped
//! node is registered under its name on the nearest custom-element ancestor
//! (the manifest root) and substituted by name at render time.

use std::sync::Arc;

use indexmap::IndexMap as OrderedMap;

use super::markup::{MarkupElement, MarkupNode};
use super::symbols::{
    BindingSymbol, CustomAttributeSymbol, ElementSymbol, LetBindingSymbol, LetSymbol, NodeSymbol,
    PlainAttributeSymbol, ReplacePartSymbol, TemplateControllerSymbol, TextSymbol,
};
use super::syntax::{has_multi_bindings, parse_multi_bindings, AttrSyntax};
use crate::binding::{
    AttributeDefinition, BindableDefinition, BindingCommand, BindingMode, Expression,
    ExpressionParser, ResourceRegistry,
};
use crate::error::{Error, Result};

/// Convert a kebab-case attribute name to the camelCase property it targets.
pub(crate) fn kebab_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Converts markup trees into symbol trees.
pub struct TemplateBinder<'a> {
    resources: &'a ResourceRegistry,
    parser: &'a ExpressionParser,
}

impl<'a> TemplateBinder<'a> {
    /// Create a binder over the given resources.
    pub fn new(resources: &'a ResourceRegistry, parser: &'a ExpressionParser) -> Self {
        Self { resources, parser }
    }

    /// Bind a template. The root element's attributes become surrogates;
    /// its children become the template content.
    pub fn bind(&self, template: &MarkupElement) -> Result<ElementSymbol> {
        let mut root = ElementSymbol::new(template.name.clone(), None);

        for attr in &template.attributes {
            let syntax = AttrSyntax::parse(&attr.name, &attr.value, self.resources);
            if syntax.target == "id" || syntax.target == "part" {
                return Err(Error::InvalidSurrogateAttribute(attr.name.clone()));
            }
            let resolves = syntax
                .command
                .map_or(true, |c| !c.ignores_custom_attributes());
            if resolves {
                if let Some(def) = self.resources.attribute(&syntax.target) {
                    if def.is_template_controller {
                        return Err(Error::ControllerOnSurrogate(syntax.target));
                    }
                    let bindings = self.bind_attribute_bindings(&def, &syntax)?;
                    root.custom_attributes.push(CustomAttributeSymbol {
                        definition: def,
                        bindings,
                    });
                    continue;
                }
            }
            root.plain_attributes.push(self.bind_plain(&syntax)?);
        }

        let mut parts = OrderedMap::new();
        root.children = self.bind_children(&template.children, &mut parts)?;
        root.parts = parts;

        tracing::debug!(
            element = %root.name,
            children = root.children.len(),
            parts = root.parts.len(),
            "bound template"
        );
        Ok(root)
    }

    fn bind_children(
        &self,
        children: &[MarkupNode],
        parts_root: &mut OrderedMap<String, ReplacePartSymbol>,
    ) -> Result<Vec<NodeSymbol>> {
        let mut out = Vec::new();
        for child in children {
            match child {
                MarkupNode::Text(text) => {
                    let interpolation = self.parser.parse_interpolation(text)?;
                    out.push(NodeSymbol::Text(TextSymbol {
                        text: text.clone(),
                        interpolation,
                    }));
                }
                MarkupNode::Element(el) if el.name == "let" => {
                    out.push(self.bind_let(el)?);
                }
                MarkupNode::Element(el) => {
                    if let Some(node) = self.bind_element(el, parts_root)? {
                        out.push(node);
                    }
                }
            }
        }
        Ok(out)
    }

    fn bind_element(
        &self,
        el: &MarkupElement,
        parts_root: &mut OrderedMap<String, ReplacePartSymbol>,
    ) -> Result<Option<NodeSymbol>> {
        let definition = self.resources.element(&el.name);
        let mut symbol = ElementSymbol::new(el.name.clone(), definition.clone());
        let mut controllers: Vec<(Arc<AttributeDefinition>, Vec<BindingSymbol>)> = Vec::new();
        let mut replace_part: Option<String> = None;

        for attr in &el.attributes {
            let syntax = AttrSyntax::parse(&attr.name, &attr.value, self.resources);

            if syntax.target == "part" && syntax.command.is_none() {
                replace_part = Some(syntax.raw_value.clone());
                continue;
            }

            let resolves = syntax
                .command
                .map_or(true, |c| !c.ignores_custom_attributes());
            if resolves {
                if let Some(def) = self.resources.attribute(&syntax.target) {
                    let bindings = self.bind_attribute_bindings(&def, &syntax)?;
                    if def.is_template_controller {
                        controllers.push((def, bindings));
                    } else {
                        symbol.custom_attributes.push(CustomAttributeSymbol {
                            definition: def,
                            bindings,
                        });
                    }
                    continue;
                }
            }

            if let Some(def) = &definition {
                if let Some(bindable) = def.bindables.get(&syntax.target) {
                    symbol.bindables.push(self.bind_binding(bindable.clone(), &syntax)?);
                    continue;
                }
            }

            symbol.plain_attributes.push(self.bind_plain(&syntax)?);
        }

        // A custom element is the manifest root for its own subtree's parts.
        if symbol.is_custom() {
            let mut own_parts = OrderedMap::new();
            symbol.children = self.bind_children(&el.children, &mut own_parts)?;
            symbol.parts = own_parts;
        } else {
            symbol.children = self.bind_children(&el.children, parts_root)?;
        }

        // Lift controllers: first declared wraps first, ending up innermost.
        let mut node = NodeSymbol::Element(symbol);
        for (def, bindings) in controllers {
            node = NodeSymbol::Controller(TemplateControllerSymbol {
                definition: def,
                bindings,
                template: Box::new(node),
            });
        }

        if let Some(name) = replace_part {
            parts_root.insert(
                name.clone(),
                ReplacePartSymbol {
                    name,
                    template: Box::new(node),
                },
            );
            return Ok(None);
        }
        Ok(Some(node))
    }

    fn bind_let(&self, el: &MarkupElement) -> Result<NodeSymbol> {
        let mut to_binding_context = false;
        let mut bindings = Vec::new();
        for attr in &el.attributes {
            if attr.name == "to-binding-context" {
                to_binding_context = true;
                continue;
            }
            let syntax = AttrSyntax::parse(&attr.name, &attr.value, self.resources);
            let expression = match syntax.command {
                Some(_) => self.parser.parse(&syntax.raw_value)?.as_ref().clone(),
                None => match self.parser.parse_interpolation(&syntax.raw_value)? {
                    Some(interpolation) => interpolation,
                    None => Expression::Literal {
                        value: crate::binding::Literal::Str(syntax.raw_value.clone()),
                    },
                },
            };
            bindings.push(LetBindingSymbol {
                target: kebab_to_camel(&syntax.target),
                expression,
            });
        }
        Ok(NodeSymbol::Let(LetSymbol {
            to_binding_context,
            bindings,
        }))
    }

    fn bind_attribute_bindings(
        &self,
        def: &Arc<AttributeDefinition>,
        syntax: &AttrSyntax,
    ) -> Result<Vec<BindingSymbol>> {
        if syntax.command == Some(BindingCommand::For) {
            let bindable = self.bindable_of(def, &def.primary);
            return Ok(vec![self.bind_binding(bindable, syntax)?]);
        }

        if syntax.command.is_none()
            && def.accepts_multi_bindings()
            && has_multi_bindings(&syntax.raw_value)
        {
            let mut out = Vec::new();
            for (name, value) in parse_multi_bindings(&syntax.raw_value) {
                let sub = AttrSyntax::parse(&name, &value, self.resources);
                let bindable = self.bindable_of(def, &sub.target);
                out.push(self.bind_binding(bindable, &sub)?);
            }
            return Ok(out);
        }

        let bindable = self.bindable_of(def, &def.primary);
        Ok(vec![self.bind_binding(bindable, syntax)?])
    }

    fn bindable_of(&self, def: &Arc<AttributeDefinition>, attribute: &str) -> BindableDefinition {
        def.bindables.get(attribute).cloned().unwrap_or_else(|| {
            BindableDefinition {
                property: kebab_to_camel(attribute),
                attribute: attribute.to_string(),
                mode: BindingMode::ToView,
            }
        })
    }

    fn bind_binding(
        &self,
        bindable: BindableDefinition,
        syntax: &AttrSyntax,
    ) -> Result<BindingSymbol> {
        let expression = match syntax.command {
            None => self.parser.parse_interpolation(&syntax.raw_value)?,
            Some(BindingCommand::For) => {
                Some(self.parser.parse_for_of(&syntax.raw_value)?.as_ref().clone())
            }
            Some(_) => Some(self.parser.parse(&syntax.raw_value)?.as_ref().clone()),
        };
        Ok(BindingSymbol {
            bindable,
            command: syntax.command,
            raw_value: syntax.raw_value.clone(),
            expression,
        })
    }

    fn bind_plain(&self, syntax: &AttrSyntax) -> Result<PlainAttributeSymbol> {
        let expression = match syntax.command {
            None => self.parser.parse_interpolation(&syntax.raw_value)?,
            Some(BindingCommand::For) => {
                Some(self.parser.parse_for_of(&syntax.raw_value)?.as_ref().clone())
            }
            Some(_) => Some(self.parser.parse(&syntax.raw_value)?.as_ref().clone()),
        };
        Ok(PlainAttributeSymbol {
            target: syntax.target.clone(),
            raw_value: syntax.raw_value.clone(),
            command: syntax.command,
            expression,
        })
    }
}
