//! Template Compiler
//!
//! Walks the symbol tree and emits one instruction row per render target,
//! in document order. Plain and custom elements emit attribute instructions
//! (custom elements lead with a hydrate-element instruction); template
//! controllers emit a hydrate instruction carrying a fully independent
//! nested compiled definition; `let` elements emit one let binding per
//! declared local; interpolated text emits a text-binding instruction.
//!
//! Compilation is deterministic: the same markup and resources produce a
//! structurally identical instruction tree every time, and a compiled
//! template is cached per compilation context rather than re-walked per
//! instantiation.

use indexmap::IndexMap as OrderedMap;

use super::binder::{kebab_to_camel, TemplateBinder};
use super::instructions::{CompiledTemplate, Instruction};
use super::markup::MarkupElement;
use super::symbols::{
    BindingSymbol, CustomAttributeSymbol, ElementSymbol, NodeSymbol, PlainAttributeSymbol,
    ReplacePartSymbol,
};
use crate::binding::{BindingCommand, BindingMode, ExpressionParser, ResourceRegistry};
use crate::error::{Error, Result};

/// Compiles markup templates into instruction trees.
pub struct TemplateCompiler<'a> {
    resources: &'a ResourceRegistry,
    parser: &'a ExpressionParser,
}

impl<'a> TemplateCompiler<'a> {
    /// Create a compiler over the given resources.
    pub fn new(resources: &'a ResourceRegistry, parser: &'a ExpressionParser) -> Self {
        Self { resources, parser }
    }

    /// Bind and compile `template`.
    pub fn compile(&self, template: &MarkupElement) -> Result<CompiledTemplate> {
        let binder = TemplateBinder::new(self.resources, self.parser);
        let root = binder.bind(template)?;
        self.compile_root(&root)
    }

    fn compile_root(&self, root: &ElementSymbol) -> Result<CompiledTemplate> {
        let mut scope_parts = Vec::new();

        let mut surrogates = Vec::new();
        for attr in &root.plain_attributes {
            if let Some(instruction) = self.compile_plain(attr)? {
                surrogates.push(instruction);
            }
        }
        for custom in &root.custom_attributes {
            surrogates.push(self.compile_custom_attribute(custom)?);
        }

        let mut rows = Vec::new();
        self.compile_children(&root.children, &mut rows, &mut scope_parts)?;
        let parts = self.compile_parts(&root.parts, &mut scope_parts)?;

        tracing::debug!(
            rows = rows.len(),
            surrogates = surrogates.len(),
            parts = parts.len(),
            "compiled template"
        );
        Ok(CompiledTemplate {
            name: root.name.clone(),
            instructions: rows,
            surrogates,
            parts,
            scope_parts,
        })
    }

    fn compile_children(
        &self,
        children: &[NodeSymbol],
        rows: &mut Vec<Vec<Instruction>>,
        scope_parts: &mut Vec<String>,
    ) -> Result<()> {
        for child in children {
            self.compile_node(child, rows, scope_parts)?;
        }
        Ok(())
    }

    fn compile_node(
        &self,
        node: &NodeSymbol,
        rows: &mut Vec<Vec<Instruction>>,
        scope_parts: &mut Vec<String>,
    ) -> Result<()> {
        match node {
            NodeSymbol::Element(symbol) => {
                let mut row = Vec::new();
                if let Some(definition) = &symbol.definition {
                    let mut instructions = Vec::new();
                    for binding in &symbol.bindables {
                        instructions.push(self.compile_binding(binding)?);
                    }
                    let parts = self.compile_parts(&symbol.parts, scope_parts)?;
                    row.push(Instruction::HydrateElement {
                        res: definition.name.clone(),
                        instructions,
                        parts,
                    });
                }
                for attr in &symbol.plain_attributes {
                    if let Some(instruction) = self.compile_plain(attr)? {
                        row.push(instruction);
                    }
                }
                for custom in &symbol.custom_attributes {
                    row.push(self.compile_custom_attribute(custom)?);
                }
                if !row.is_empty() {
                    rows.push(row);
                }
                self.compile_children(&symbol.children, rows, scope_parts)?;
            }
            NodeSymbol::Controller(symbol) => {
                // The controller owns a fully independent definition so it
                // can instantiate and destroy its subtree on its own.
                let mut nested_rows = Vec::new();
                let mut nested_scope = Vec::new();
                self.compile_node(&symbol.template, &mut nested_rows, &mut nested_scope)?;
                scope_parts.extend(nested_scope.iter().cloned());

                let def = CompiledTemplate {
                    name: symbol.definition.name.clone(),
                    instructions: nested_rows,
                    surrogates: Vec::new(),
                    parts: OrderedMap::new(),
                    scope_parts: nested_scope,
                };
                let instructions = symbol
                    .bindings
                    .iter()
                    .map(|binding| self.compile_binding(binding))
                    .collect::<Result<Vec<_>>>()?;
                rows.push(vec![Instruction::HydrateTemplateController {
                    res: symbol.definition.name.clone(),
                    def,
                    instructions,
                }]);
            }
            NodeSymbol::Let(symbol) => {
                let instructions = symbol
                    .bindings
                    .iter()
                    .map(|binding| Instruction::LetBinding {
                        from: binding.expression.clone(),
                        to: binding.target.clone(),
                    })
                    .collect();
                rows.push(vec![Instruction::HydrateLetElement {
                    instructions,
                    to_binding_context: symbol.to_binding_context,
                }]);
            }
            NodeSymbol::Text(symbol) => {
                if let Some(interpolation) = &symbol.interpolation {
                    rows.push(vec![Instruction::TextBinding {
                        from: interpolation.clone(),
                    }]);
                }
            }
        }
        Ok(())
    }

    fn compile_parts(
        &self,
        parts: &OrderedMap<String, ReplacePartSymbol>,
        scope_parts: &mut Vec<String>,
    ) -> Result<OrderedMap<String, CompiledTemplate>> {
        let mut out = OrderedMap::new();
        for (name, part) in parts {
            scope_parts.push(name.clone());
            let mut rows = Vec::new();
            let mut part_scope = Vec::new();
            self.compile_node(&part.template, &mut rows, &mut part_scope)?;
            scope_parts.extend(part_scope.iter().cloned());
            out.insert(
                name.clone(),
                CompiledTemplate {
                    name: name.clone(),
                    instructions: rows,
                    surrogates: Vec::new(),
                    parts: OrderedMap::new(),
                    scope_parts: part_scope,
                },
            );
        }
        Ok(out)
    }

    fn compile_binding(&self, binding: &BindingSymbol) -> Result<Instruction> {
        let to = binding.bindable.property.clone();
        let expr = || {
            binding
                .expression
                .clone()
                .ok_or_else(|| Error::Parse(format!("missing expression for '{to}'")))
        };
        Ok(match binding.command {
            None => match &binding.expression {
                Some(interpolation) => Instruction::Interpolation {
                    from: interpolation.clone(),
                    to,
                },
                // No command, no interpolation: the value is the bindable's
                // literal string.
                None => Instruction::SetProperty {
                    value: binding.raw_value.clone(),
                    to,
                },
            },
            Some(BindingCommand::Bind) => Instruction::PropertyBinding {
                from: expr()?,
                to,
                mode: binding.bindable.mode,
            },
            Some(BindingCommand::OneTime)
            | Some(BindingCommand::ToView)
            | Some(BindingCommand::FromView)
            | Some(BindingCommand::TwoWay) => Instruction::PropertyBinding {
                from: expr()?,
                to,
                mode: binding
                    .command
                    .and_then(BindingCommand::mode)
                    .unwrap_or(BindingMode::ToView),
            },
            Some(BindingCommand::Call) => Instruction::CallBinding { from: expr()?, to },
            Some(BindingCommand::Ref) => Instruction::RefBinding { from: expr()?, to },
            Some(BindingCommand::For) => Instruction::IteratorBinding { from: expr()?, to },
        })
    }

    fn compile_plain(&self, attr: &PlainAttributeSymbol) -> Result<Option<Instruction>> {
        let to = kebab_to_camel(&attr.target);
        let expr = || {
            attr.expression
                .clone()
                .ok_or_else(|| Error::Parse(format!("missing expression for '{to}'")))
        };
        Ok(match attr.command {
            None => {
                if attr.target == "ref" {
                    // `ref="expr"` publishes the element itself.
                    let from = self.parser.parse(&attr.raw_value)?.as_ref().clone();
                    return Ok(Some(Instruction::RefBinding {
                        from,
                        to: "element".to_string(),
                    }));
                }
                // Static attributes stay in the markup; only interpolated
                // values become instructions.
                attr.expression
                    .clone()
                    .map(|from| Instruction::Interpolation { from, to })
            }
            Some(BindingCommand::Bind) => Some(Instruction::PropertyBinding {
                from: expr()?,
                to,
                mode: BindingMode::ToView,
            }),
            Some(BindingCommand::OneTime)
            | Some(BindingCommand::ToView)
            | Some(BindingCommand::FromView)
            | Some(BindingCommand::TwoWay) => Some(Instruction::PropertyBinding {
                from: expr()?,
                to,
                mode: attr
                    .command
                    .and_then(BindingCommand::mode)
                    .unwrap_or(BindingMode::ToView),
            }),
            Some(BindingCommand::Call) => Some(Instruction::CallBinding { from: expr()?, to }),
            Some(BindingCommand::Ref) => Some(Instruction::RefBinding { from: expr()?, to }),
            Some(BindingCommand::For) => Some(Instruction::IteratorBinding { from: expr()?, to }),
        })
    }

    fn compile_custom_attribute(&self, custom: &CustomAttributeSymbol) -> Result<Instruction> {
        let instructions = custom
            .bindings
            .iter()
            .map(|binding| self.compile_binding(binding))
            .collect::<Result<Vec<_>>>()?;
        Ok(Instruction::HydrateAttribute {
            res: custom.definition.name.clone(),
            instructions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::AttributeDefinition;
    use crate::binding::ElementDefinition;
    use crate::binding::Expression;

    fn resources() -> ResourceRegistry {
        let mut r = ResourceRegistry::new();
        r.register_attribute(AttributeDefinition::template_controller("when"));
        r.register_attribute(AttributeDefinition::template_controller("each"));
        r.register_attribute(
            AttributeDefinition::new("square")
                .bindable("color", "color", BindingMode::ToView)
                .bindable("size", "size", BindingMode::ToView)
                .primary("color"),
        );
        r.register_element(
            ElementDefinition::new("user-card").bindable("user", "user", BindingMode::ToView),
        );
        r
    }

    fn compile(template: &MarkupElement) -> CompiledTemplate {
        let resources = resources();
        let parser = ExpressionParser::new();
        TemplateCompiler::new(&resources, &parser)
            .compile(template)
            .unwrap()
    }

    #[test]
    fn emits_one_row_per_target() {
        let template = MarkupElement::new("template")
            .child(MarkupElement::new("div").attr("title.bind", "user.name"))
            .child(MarkupElement::new("div").attr("title", "static"))
            .child(MarkupElement::new("span").text("plain"))
            .child(MarkupElement::new("span").text("${count}"));
        let compiled = compile(&template);

        // Static-only elements and plain text are not targets.
        assert_eq!(compiled.target_count(), 2);
        assert!(matches!(
            compiled.instructions[0][0],
            Instruction::PropertyBinding { .. }
        ));
        assert!(matches!(
            compiled.instructions[1][0],
            Instruction::TextBinding { .. }
        ));
        assert!(compiled.validate_target_count(2).is_ok());
        assert!(compiled.validate_target_count(5).is_err());
    }

    #[test]
    fn custom_elements_lead_with_hydrate() {
        let template = MarkupElement::new("template").child(
            MarkupElement::new("user-card")
                .attr("user.bind", "currentUser")
                .attr("class.bind", "theme"),
        );
        let compiled = compile(&template);

        let row = &compiled.instructions[0];
        let Instruction::HydrateElement { res, instructions, .. } = &row[0] else {
            panic!("expected hydrate element first");
        };
        assert_eq!(res, "user-card");
        assert_eq!(instructions.len(), 1);
        // The non-bindable attribute compiles into the same row, after the
        // hydrate instruction.
        assert!(matches!(row[1], Instruction::PropertyBinding { .. }));
    }

    #[test]
    fn controllers_carry_independent_nested_definitions() {
        let template = MarkupElement::new("template").child(
            MarkupElement::new("div")
                .attr("when.bind", "show")
                .attr("each.for", "item of items")
                .text("${item}"),
        );
        let compiled = compile(&template);

        assert_eq!(compiled.target_count(), 1);
        let Instruction::HydrateTemplateController { res, def, instructions } =
            &compiled.instructions[0][0]
        else {
            panic!("expected controller");
        };
        // Outermost controller: last declared.
        assert_eq!(res, "each");
        assert!(matches!(
            instructions[0],
            Instruction::IteratorBinding { .. }
        ));

        // Inner definition holds the `when` controller.
        let Instruction::HydrateTemplateController { res, def, .. } = &def.instructions[0][0]
        else {
            panic!("expected nested controller");
        };
        assert_eq!(res, "when");
        // Innermost definition holds the text binding row.
        assert!(matches!(
            def.instructions[0][0],
            Instruction::TextBinding { .. }
        ));
    }

    #[test]
    fn multi_binding_attribute_compiles_sub_instructions() {
        let template = MarkupElement::new("template")
            .child(MarkupElement::new("div").attr("square", "foo: 1; bar: 2"));
        let compiled = compile(&template);

        let Instruction::HydrateAttribute { res, instructions } = &compiled.instructions[0][0]
        else {
            panic!("expected hydrate attribute");
        };
        assert_eq!(res, "square");
        assert_eq!(
            instructions,
            &vec![
                Instruction::SetProperty {
                    value: "1".to_string(),
                    to: "foo".to_string(),
                },
                Instruction::SetProperty {
                    value: "2".to_string(),
                    to: "bar".to_string(),
                },
            ]
        );
    }

    #[test]
    fn let_elements_emit_let_rows() {
        let template = MarkupElement::new("template").child(
            MarkupElement::new("let")
                .attr("to-binding-context", "")
                .attr("total.bind", "a + b"),
        );
        let compiled = compile(&template);

        let Instruction::HydrateLetElement { instructions, to_binding_context } =
            &compiled.instructions[0][0]
        else {
            panic!("expected let element");
        };
        assert!(*to_binding_context);
        assert!(matches!(
            &instructions[0],
            Instruction::LetBinding { to, .. } if to == "total"
        ));
    }

    #[test]
    fn replace_parts_compile_into_the_element_row() {
        let template = MarkupElement::new("template").child(
            MarkupElement::new("user-card").child(
                MarkupElement::new("div")
                    .attr("part", "header")
                    .text("${title}"),
            ),
        );
        let compiled = compile(&template);

        let Instruction::HydrateElement { parts, .. } = &compiled.instructions[0][0] else {
            panic!("expected hydrate element");
        };
        let header = parts.get("header").expect("part registered by name");
        assert_eq!(header.target_count(), 1);
        assert!(compiled.scope_parts.contains(&"header".to_string()));
    }

    #[test]
    fn surrogate_attributes_land_in_the_surrogates_row() {
        let template = MarkupElement::new("template")
            .attr("class.bind", "theme")
            .child(MarkupElement::new("div").text("x"));
        let compiled = compile(&template);

        assert_eq!(compiled.surrogates.len(), 1);
        assert!(matches!(
            compiled.surrogates[0],
            Instruction::PropertyBinding { .. }
        ));
    }

    #[test]
    fn ref_attributes_publish_the_element() {
        let template =
            MarkupElement::new("template").child(MarkupElement::new("div").attr("ref", "el"));
        let compiled = compile(&template);

        let Instruction::RefBinding { from, to } = &compiled.instructions[0][0] else {
            panic!("expected ref binding");
        };
        assert_eq!(to, "element");
        assert!(matches!(from, Expression::AccessScope { name, .. } if name == "el"));
    }

    #[test]
    fn compilation_is_deterministic() {
        let template = MarkupElement::new("template")
            .attr("class.bind", "theme")
            .child(
                MarkupElement::new("user-card")
                    .attr("user.bind", "currentUser")
                    .child(
                        MarkupElement::new("div")
                            .attr("each.for", "item of items")
                            .text("${item}"),
                    ),
            );

        let resources = resources();
        let parser = ExpressionParser::new();
        let compiler = TemplateCompiler::new(&resources, &parser);
        let first = compiler.compile(&template).unwrap();
        let second = compiler.compile(&template).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }
}
