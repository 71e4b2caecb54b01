//! Error Types
//!
//! All failure modes in this crate are programmer-error signals rather than
//! recoverable runtime conditions: a missing scope, an unknown resource name,
//! a malformed template. They are surfaced as `Err` values and are not caught
//! internally; a failed bind, compile, or evaluate call must be treated as
//! terminal for that instance, and partially-applied state is not rolled back.
//!
//! The one policy-driven exception is [`Error::DirtyCheckDisallowed`], which
//! strict configurations use to fail fast when a property would silently fall
//! back to polling.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the observation, binding, and template layers.
#[derive(Debug, Error)]
pub enum Error {
    /// A binding operation was attempted without an active scope.
    #[error("no scope is bound; bind() must complete before this operation")]
    NilScope,

    /// An expression references a value converter or binding behavior but the
    /// binding was constructed without a resource registry.
    #[error("no resource registry available to resolve '{0}'")]
    NoResources(String),

    /// A value-converter name did not resolve in the resource registry.
    #[error("unknown value converter '{0}'")]
    UnknownValueConverter(String),

    /// A binding-behavior name did not resolve in the resource registry.
    #[error("unknown binding behavior '{0}'")]
    UnknownBindingBehavior(String),

    /// The same binding behavior was applied twice to one binding.
    #[error("binding behavior '{0}' is already applied to this binding")]
    BehaviorAlreadyApplied(String),

    /// A call expression resolved to something that is not callable.
    #[error("'{0}' is not a function")]
    NotAFunction(String),

    /// The expression source used an operator this runtime does not support.
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// An assignment targeted an expression that cannot be written through.
    #[error("expression is not assignable")]
    NotAssignable,

    /// The expression source could not be parsed.
    #[error("invalid expression: {0}")]
    Parse(String),

    /// An attribute that is not allowed on a surrogate (root) element.
    #[error("invalid surrogate attribute '{0}'")]
    InvalidSurrogateAttribute(String),

    /// A template controller was declared on a surrogate (root) element.
    #[error("template controller '{0}' cannot be placed on a surrogate element")]
    ControllerOnSurrogate(String),

    /// The number of render targets found at render time does not match the
    /// number of instruction rows in the compiled template.
    #[error("compiled template has {rows} instruction rows but {targets} render targets were found")]
    TargetCountMismatch {
        /// Instruction row count in the compiled template.
        rows: usize,
        /// Render target count reported by the renderer.
        targets: usize,
    },

    /// A property required dirty-check observation while the dirty checker is
    /// configured to disallow it.
    #[error("property '{0}' requires dirty checking, which is disabled")]
    DirtyCheckDisallowed(String),
}
