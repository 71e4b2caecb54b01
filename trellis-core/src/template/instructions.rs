//! Instruction Records
//!
//! The compiler's output: flat, serializable records, each describing one
//! renderable operation. The `type` field is a stable two-character tag so
//! compiled templates can cross process boundaries (ahead-of-time
//! compilation, caching) without carrying code.
//!
//! A compiled template is an ordered array of instruction rows aligned 1:1
//! with the render targets discovered at render time, plus a `surrogates`
//! row for root-element attributes and a `parts` map of nested compiled
//! sub-templates.

use indexmap::IndexMap as OrderedMap;
use serde::{Deserialize, Serialize};

use crate::binding::{BindingMode, Expression};
use crate::error::{Error, Result};

/// One renderable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Instruction {
    /// Set a property to a literal string value.
    #[serde(rename = "re")]
    SetProperty {
        /// The literal value.
        value: String,
        /// Target property.
        to: String,
    },
    /// Bind an interpolated string to a property.
    #[serde(rename = "rf")]
    Interpolation {
        /// The interpolation expression.
        from: Expression,
        /// Target property.
        to: String,
    },
    /// Bind an expression to a property in a given mode.
    #[serde(rename = "rg")]
    PropertyBinding {
        /// The source expression.
        from: Expression,
        /// Target property.
        to: String,
        /// Propagation mode.
        mode: BindingMode,
    },
    /// Install a callable evaluating the expression.
    #[serde(rename = "rh")]
    CallBinding {
        /// The invoked expression.
        from: Expression,
        /// Target property.
        to: String,
    },
    /// Publish the target through the expression.
    #[serde(rename = "rj")]
    RefBinding {
        /// The receiving expression.
        from: Expression,
        /// Names what is published (`element`, a view-model, ...).
        to: String,
    },
    /// Bind a repeater's iterable.
    #[serde(rename = "rk")]
    IteratorBinding {
        /// The `local of iterable` declaration.
        from: Expression,
        /// Target property on the controller.
        to: String,
    },
    /// Declare one scope local.
    #[serde(rename = "ri")]
    LetBinding {
        /// The local's value expression.
        from: Expression,
        /// Local name.
        to: String,
    },
    /// Instantiate a custom element.
    #[serde(rename = "ra")]
    HydrateElement {
        /// Element resource name.
        res: String,
        /// Bindable instructions.
        instructions: Vec<Instruction>,
        /// Named replaceable fragments for this element.
        parts: OrderedMap<String, CompiledTemplate>,
    },
    /// Instantiate a custom attribute.
    #[serde(rename = "rb")]
    HydrateAttribute {
        /// Attribute resource name.
        res: String,
        /// Sub-binding instructions.
        instructions: Vec<Instruction>,
    },
    /// Instantiate a template controller with an independent nested
    /// definition it can create and destroy on its own.
    #[serde(rename = "rc")]
    HydrateTemplateController {
        /// Controller resource name.
        res: String,
        /// The nested compiled template.
        def: CompiledTemplate,
        /// The controller's own binding instructions.
        instructions: Vec<Instruction>,
    },
    /// Instantiate a `<let>` element.
    #[serde(rename = "rd")]
    HydrateLetElement {
        /// One let-binding instruction per declared local.
        instructions: Vec<Instruction>,
        /// Locals land on the binding context instead of the override
        /// context.
        to_binding_context: bool,
    },
    /// Bind interpolated text content.
    #[serde(rename = "ha")]
    TextBinding {
        /// The interpolation expression.
        from: Expression,
    },
}

/// A compiled template: instruction rows aligned with render targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTemplate {
    /// Template name (the resource name for controller definitions).
    pub name: String,
    /// One row of instructions per render target, in target order.
    pub instructions: Vec<Vec<Instruction>>,
    /// Instructions for root-element (surrogate) attributes.
    pub surrogates: Vec<Instruction>,
    /// Named replaceable fragments declared at this template's root level.
    pub parts: OrderedMap<String, CompiledTemplate>,
    /// All part names reachable in this template's subtree, collected
    /// recursively through nested controller definitions.
    pub scope_parts: Vec<String>,
}

impl CompiledTemplate {
    /// The number of render targets this template expects.
    pub fn target_count(&self) -> usize {
        self.instructions.len()
    }

    /// Enforce the row/target alignment invariant. The renderer calls this
    /// with the number of targets it discovered.
    pub fn validate_target_count(&self, targets: usize) -> Result<()> {
        if targets != self.instructions.len() {
            return Err(Error::TargetCountMismatch {
                rows: self.instructions.len(),
                targets,
            });
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Parse a compiled template from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Literal;

    #[test]
    fn instructions_serialize_with_two_char_tags() {
        let instruction = Instruction::SetProperty {
            value: "static".to_string(),
            to: "title".to_string(),
        };
        let json = serde_json::to_string(&instruction).unwrap();
        assert!(json.contains("\"type\":\"re\""));

        let back: Instruction = serde_json::from_str(&json).unwrap();
        assert_eq!(instruction, back);
    }

    #[test]
    fn compiled_templates_round_trip_through_json() {
        let template = CompiledTemplate {
            name: "demo".to_string(),
            instructions: vec![vec![Instruction::PropertyBinding {
                from: Expression::AccessScope {
                    name: "x".to_string(),
                    ancestor: 0,
                },
                to: "value".to_string(),
                mode: BindingMode::ToView,
            }]],
            surrogates: vec![Instruction::SetProperty {
                value: "app".to_string(),
                to: "class".to_string(),
            }],
            parts: OrderedMap::new(),
            scope_parts: vec![],
        };
        let json = template.to_json().unwrap();
        let back = CompiledTemplate::from_json(&json).unwrap();
        assert_eq!(template, back);
    }

    #[test]
    fn target_count_validation() {
        let template = CompiledTemplate {
            name: "demo".to_string(),
            instructions: vec![
                vec![Instruction::TextBinding {
                    from: Expression::Literal {
                        value: Literal::Str("x".to_string()),
                    },
                }],
                vec![],
            ],
            surrogates: vec![],
            parts: OrderedMap::new(),
            scope_parts: vec![],
        };
        assert!(template.validate_target_count(2).is_ok());
        let err = template.validate_target_count(3).unwrap_err();
        assert!(matches!(
            err,
            Error::TargetCountMismatch { rows: 2, targets: 3 }
        ));
    }
}
