//! Template Layer
//!
//! From parsed markup to serializable instructions:
//!
//! - [`MarkupElement`]/[`MarkupNode`]: the host-neutral parsed template
//!   tree.
//! - [`AttrSyntax`]: attribute-name parsing and the multi-binding
//!   mini-grammar.
//! - [`TemplateBinder`]: markup → symbol tree (attribute classification,
//!   controller lifting, replace-part registration).
//! - [`TemplateCompiler`]: symbol tree → [`CompiledTemplate`] (ordered
//!   instruction rows, surrogates, nested parts).
//!
//! Symbol trees and instructions are created once per template and cached
//! per compilation context by the caller; the renderer consumes the
//! instruction records.

mod binder;
mod compiler;
mod instructions;
mod markup;
mod symbols;
mod syntax;

pub use binder::TemplateBinder;
pub use compiler::TemplateCompiler;
pub use instructions::{CompiledTemplate, Instruction};
pub use markup::{MarkupAttribute, MarkupElement, MarkupNode};
pub use symbols::{
    BindingSymbol, CustomAttributeSymbol, ElementSymbol, LetBindingSymbol, LetSymbol, NodeSymbol,
    PlainAttributeSymbol, ReplacePartSymbol, TemplateControllerSymbol, TextSymbol,
};
pub use syntax::{has_multi_bindings, parse_multi_bindings, AttrSyntax};
