//! Trellis Core
//!
//! This crate provides the observation and template-compilation runtime for
//! the Trellis reactive UI framework. It implements:
//!
//! - Typed property/collection observers and the locator that selects them
//! - Dependency-tracked computed observation and dirty-check fallback
//! - Expression parsing, evaluation, and binding lifecycle objects
//! - Cancelable, composable lifecycle tasks over a frame scheduler
//! - A template binder and compiler emitting serializable instructions
//!
//! The crate is renderer-agnostic: it emits and consumes instruction
//! records and a binding contract, and any tree-shaped render target can
//! sit on the other side.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observation`: observers, subscriber collections, dependency tracking
//! - `binding`: scope chain, expression AST/parser, binding objects
//! - `lifecycle`: frame scheduler and composable lifecycle tasks
//! - `template`: markup binder and instruction compiler
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::binding::{BindingMode, ExpressionParser, PropertyBinding, Scope};
//! use trellis_core::lifecycle::Scheduler;
//! use trellis_core::observation::{object_from, Flags, ObserverLocator, Value};
//!
//! let locator = ObserverLocator::new(Scheduler::new());
//! let parser = ExpressionParser::new();
//!
//! let user = object_from([("name", Value::str("Ann"))]);
//! let scope = Scope::create(Value::Object(object_from([
//!     ("user", Value::Object(user.clone())),
//! ])));
//!
//! let target = trellis_core::observation::ObjectData::new();
//! let binding = PropertyBinding::new(
//!     parser.parse("user.name").unwrap(),
//!     Value::Object(target.clone()),
//!     "text",
//!     BindingMode::ToView,
//!     locator.clone(),
//!     None,
//! );
//! binding.bind(Flags::BIND, &scope).unwrap();
//!
//! // Mutations through the observer propagate to the target.
//! locator
//!     .get_observer(&Value::Object(user), "name")
//!     .unwrap()
//!     .set_value(Value::str("Bob"), Flags::NONE)
//!     .unwrap();
//! ```

pub mod binding;
pub mod error;
pub mod lifecycle;
pub mod observation;
pub mod template;

pub use error::{Error, Result};
