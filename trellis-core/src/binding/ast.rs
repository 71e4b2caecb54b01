//! Expression AST
//!
//! A small recursive-descent AST evaluated against the scope chain. Three
//! passes share the tree:
//!
//! - `evaluate` reads a value (pure except for user-supplied getters and
//!   calls).
//! - `assign` writes a value back through the observation layer, so the
//!   write notifies.
//! - `connect` is a side-effect-free walk registering the binding as a
//!   subscriber of every observable sub-expression.
//!
//! Evaluation and connection are deliberately separate passes: a value can
//! be read without forcing subscription, which one-time bindings and
//! teardown paths rely on.
//!
//! Keyed and call-member connection re-evaluates the object expression to
//! obtain the key/receiver even though the value pass already evaluated it;
//! user-supplied getters may have observable side effects, so the duplicate
//! evaluation is kept rather than cached.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::resources::ResourceRegistry;
use super::scope::Scope;
use crate::error::{Error, Result};
use crate::observation::{ObserverLocator, Value};

/// Everything expression execution needs besides the scope.
pub struct EvalEnv<'a> {
    /// The observation runtime; writes route through it.
    pub locator: &'a ObserverLocator,
    /// Named resources for converter/behavior tails. Bindings constructed
    /// without a registry evaluate converter-free expressions only.
    pub resources: Option<&'a ResourceRegistry>,
}

impl<'a> EvalEnv<'a> {
    /// Bundle a locator and registry.
    pub fn new(locator: &'a ObserverLocator, resources: Option<&'a ResourceRegistry>) -> Self {
        Self { locator, resources }
    }

    fn converter(&self, name: &str) -> Result<Arc<dyn super::resources::ValueConverter>> {
        match self.resources {
            Some(resources) => resources.value_converter(name),
            None => Err(Error::NoResources(name.to_string())),
        }
    }
}

/// A party interested in the observable reads an expression performs.
pub trait Connectable {
    /// Observe `obj.key` on behalf of the binding.
    fn observe_property(&self, obj: &Value, key: &str) -> Result<()>;

    /// Observe a collection's mutations on behalf of the binding.
    fn observe_collection(&self, collection: &Value) -> Result<()>;
}

/// Scalar literal embedded in an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    /// `null`.
    Null,
    /// `true` / `false`.
    Bool(bool),
    /// Numeric literal.
    Number(f64),
    /// String literal.
    Str(String),
}

impl Literal {
    fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(*n),
            Literal::Str(s) => Value::str(s),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `&&`
    #[serde(rename = "&&")]
    And,
    /// `||`
    #[serde(rename = "||")]
    Or,
    /// `==`
    #[serde(rename = "==")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    Ne,
    /// `===`
    #[serde(rename = "===")]
    StrictEq,
    /// `!==`
    #[serde(rename = "!==")]
    StrictNe,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// `+`
    #[serde(rename = "+")]
    Add,
    /// `-`
    #[serde(rename = "-")]
    Sub,
    /// `*`
    #[serde(rename = "*")]
    Mul,
    /// `/`
    #[serde(rename = "/")]
    Div,
    /// `%`
    #[serde(rename = "%")]
    Mod,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `!`
    #[serde(rename = "!")]
    Not,
    /// `-`
    #[serde(rename = "-")]
    Neg,
    /// `+`
    #[serde(rename = "+")]
    Pos,
}

/// One node of the expression tree. Pure data; serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Expression {
    /// `$this` / `$parent`-chains: the binding context `ancestor` hops up.
    AccessThis {
        /// Number of `$parent` hops.
        ancestor: usize,
    },
    /// A scoped identifier, resolved by walking the scope chain.
    AccessScope {
        /// Identifier name.
        name: String,
        /// Number of `$parent` hops before resolution.
        ancestor: usize,
    },
    /// `object.name`.
    AccessMember {
        /// The object expression.
        object: Box<Expression>,
        /// Member name.
        name: String,
    },
    /// `object[key]`.
    AccessKeyed {
        /// The object expression.
        object: Box<Expression>,
        /// The key expression.
        key: Box<Expression>,
    },
    /// `name(args)` with the receiver resolved from the scope chain.
    CallScope {
        /// Function name.
        name: String,
        /// Argument expressions.
        args: Vec<Expression>,
        /// Number of `$parent` hops before resolution.
        ancestor: usize,
    },
    /// `object.name(args)`.
    CallMember {
        /// The receiver expression.
        object: Box<Expression>,
        /// Method name.
        name: String,
        /// Argument expressions.
        args: Vec<Expression>,
    },
    /// `func(args)` where `func` is itself an expression.
    CallFunction {
        /// The callee expression.
        func: Box<Expression>,
        /// Argument expressions.
        args: Vec<Expression>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expression>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// `condition ? yes : no`.
    Conditional {
        /// The test.
        condition: Box<Expression>,
        /// Taken when truthy.
        yes: Box<Expression>,
        /// Taken when falsy.
        no: Box<Expression>,
    },
    /// `target = value`.
    Assign {
        /// Assignable target.
        target: Box<Expression>,
        /// Value expression.
        value: Box<Expression>,
    },
    /// `expr | name:args`.
    ValueConverter {
        /// Wrapped expression.
        expr: Box<Expression>,
        /// Converter name.
        name: String,
        /// Converter arguments.
        args: Vec<Expression>,
    },
    /// `expr & name:args`.
    BindingBehavior {
        /// Wrapped expression.
        expr: Box<Expression>,
        /// Behavior name.
        name: String,
        /// Behavior arguments.
        args: Vec<Expression>,
    },
    /// Scalar literal.
    Literal {
        /// The literal.
        value: Literal,
    },
    /// `[a, b, c]`. Evaluation creates a fresh array identity each pass.
    ArrayLiteral {
        /// Element expressions.
        elements: Vec<Expression>,
    },
    /// `{ key: value, ... }`. Fresh object identity each pass.
    ObjectLiteral {
        /// Keys, parallel to `values`.
        keys: Vec<String>,
        /// Value expressions.
        values: Vec<Expression>,
    },
    /// `` `a${b}c` ``.
    TemplateLiteral {
        /// Cooked string parts; always `expressions.len() + 1` entries.
        cooked: Vec<String>,
        /// Embedded expressions.
        expressions: Vec<Expression>,
    },
    /// Text interpolation: `prefix${expr}suffix`.
    Interpolation {
        /// Static parts; always `expressions.len() + 1` entries.
        parts: Vec<String>,
        /// Embedded expressions.
        expressions: Vec<Expression>,
    },
    /// Iterator declaration `local of iterable` for repeaters.
    ForOf {
        /// Loop-local name.
        local: String,
        /// The iterable expression.
        iterable: Box<Expression>,
    },
}

impl Expression {
    /// Evaluate against `scope`.
    pub fn evaluate(&self, scope: &Arc<Scope>, env: &EvalEnv) -> Result<Value> {
        match self {
            Expression::AccessThis { ancestor } => Ok(scope.ancestor_context(*ancestor)),
            Expression::AccessScope { name, ancestor } => {
                let context = scope.resolve_context(name, *ancestor);
                context.get_member(name)
            }
            Expression::AccessMember { object, name } => {
                let obj = object.evaluate(scope, env)?;
                obj.get_member(name)
            }
            Expression::AccessKeyed { object, key } => {
                let obj = object.evaluate(scope, env)?;
                let key = key.evaluate(scope, env)?;
                obj.get_member(&key.to_display_string())
            }
            Expression::CallScope { name, args, ancestor } => {
                let context = scope.resolve_context(name, *ancestor);
                let func = context.get_member(name)?;
                call_value(&func, name, &evaluate_args(args, scope, env)?)
            }
            Expression::CallMember { object, name, args } => {
                let obj = object.evaluate(scope, env)?;
                let func = obj.get_member(name)?;
                call_value(&func, name, &evaluate_args(args, scope, env)?)
            }
            Expression::CallFunction { func, args } => {
                let callee = func.evaluate(scope, env)?;
                call_value(&callee, "(expression)", &evaluate_args(args, scope, env)?)
            }
            Expression::Unary { op, expr } => {
                let value = expr.evaluate(scope, env)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.as_number()),
                    UnaryOp::Pos => Value::Number(value.as_number()),
                })
            }
            Expression::Binary { op, left, right } => evaluate_binary(*op, left, right, scope, env),
            Expression::Conditional { condition, yes, no } => {
                if condition.evaluate(scope, env)?.is_truthy() {
                    yes.evaluate(scope, env)
                } else {
                    no.evaluate(scope, env)
                }
            }
            Expression::Assign { target, value } => {
                let value = value.evaluate(scope, env)?;
                target.assign(scope, env, value.clone())?;
                Ok(value)
            }
            Expression::ValueConverter { expr, name, args } => {
                let value = expr.evaluate(scope, env)?;
                let converter = env.converter(name)?;
                converter.to_view(value, &evaluate_args(args, scope, env)?)
            }
            Expression::BindingBehavior { expr, .. } => expr.evaluate(scope, env),
            Expression::Literal { value } => Ok(value.to_value()),
            Expression::ArrayLiteral { elements } => {
                let items = evaluate_args(elements, scope, env)?;
                Ok(Value::Array(crate::observation::ArrayData::new(items)))
            }
            Expression::ObjectLiteral { keys, values } => {
                let obj = crate::observation::ObjectData::new();
                for (key, value) in keys.iter().zip(values) {
                    obj.set_field(key.clone(), value.evaluate(scope, env)?);
                }
                Ok(Value::Object(obj))
            }
            Expression::TemplateLiteral { cooked, expressions } => {
                Ok(Value::str(concat_parts(cooked, expressions, scope, env)?))
            }
            Expression::Interpolation { parts, expressions } => {
                Ok(Value::str(concat_parts(parts, expressions, scope, env)?))
            }
            Expression::ForOf { iterable, .. } => iterable.evaluate(scope, env),
        }
    }

    /// Write `value` through the expression, routing via observers so the
    /// write notifies.
    pub fn assign(&self, scope: &Arc<Scope>, env: &EvalEnv, value: Value) -> Result<()> {
        match self {
            Expression::AccessScope { name, ancestor } => {
                let context = scope.resolve_context(name, *ancestor);
                if context.is_null() {
                    return Err(Error::NilScope);
                }
                env.locator
                    .get_observer(&context, name)?
                    .set_value(value, Default::default())
            }
            Expression::AccessMember { object, name } => {
                let obj = object.evaluate(scope, env)?;
                env.locator
                    .get_observer(&obj, name)?
                    .set_value(value, Default::default())
            }
            Expression::AccessKeyed { object, key } => {
                let obj = object.evaluate(scope, env)?;
                let key = key.evaluate(scope, env)?.to_display_string();
                match &obj {
                    Value::Map(map) => {
                        env.locator
                            .get_map_observer(map)
                            .set(key, value, Default::default());
                        Ok(())
                    }
                    _ => env
                        .locator
                        .get_observer(&obj, &key)?
                        .set_value(value, Default::default()),
                }
            }
            Expression::ValueConverter { expr, name, args } => {
                let converter = env.converter(name)?;
                let converted =
                    converter.from_view(value, &evaluate_args(args, scope, env)?)?;
                expr.assign(scope, env, converted)
            }
            Expression::BindingBehavior { expr, .. } => expr.assign(scope, env, value),
            _ => Err(Error::NotAssignable),
        }
    }

    /// Register `binding` as a subscriber of every observable
    /// sub-expression. Side-effect-free with respect to values.
    pub fn connect(
        &self,
        scope: &Arc<Scope>,
        env: &EvalEnv,
        binding: &dyn Connectable,
    ) -> Result<()> {
        match self {
            Expression::AccessThis { .. } | Expression::Literal { .. } => Ok(()),
            Expression::AccessScope { name, ancestor } => {
                let context = scope.resolve_context(name, *ancestor);
                if !context.is_null() {
                    binding.observe_property(&context, name)?;
                }
                Ok(())
            }
            Expression::AccessMember { object, name } => {
                object.connect(scope, env, binding)?;
                let obj = object.evaluate(scope, env)?;
                if obj.object_id().is_some() {
                    binding.observe_property(&obj, name)?;
                }
                Ok(())
            }
            Expression::AccessKeyed { object, key } => {
                object.connect(scope, env, binding)?;
                key.connect(scope, env, binding)?;
                // Re-evaluate object and key to locate the observed slot.
                let obj = object.evaluate(scope, env)?;
                let key = key.evaluate(scope, env)?;
                if obj.object_id().is_some() {
                    binding.observe_property(&obj, &key.to_display_string())?;
                }
                Ok(())
            }
            Expression::CallScope { args, .. } => connect_all(args, scope, env, binding),
            Expression::CallMember { object, args, .. } => {
                object.connect(scope, env, binding)?;
                connect_all(args, scope, env, binding)
            }
            Expression::CallFunction { func, args } => {
                func.connect(scope, env, binding)?;
                connect_all(args, scope, env, binding)
            }
            Expression::Unary { expr, .. } => expr.connect(scope, env, binding),
            Expression::Binary { left, right, .. } => {
                left.connect(scope, env, binding)?;
                right.connect(scope, env, binding)
            }
            Expression::Conditional { condition, yes, no } => {
                condition.connect(scope, env, binding)?;
                // Only the taken branch is observed; dependencies refresh on
                // the next evaluation pass when the condition flips.
                if condition.evaluate(scope, env)?.is_truthy() {
                    yes.connect(scope, env, binding)
                } else {
                    no.connect(scope, env, binding)
                }
            }
            Expression::Assign { target, value } => {
                target.connect(scope, env, binding)?;
                value.connect(scope, env, binding)
            }
            Expression::ValueConverter { expr, args, .. }
            | Expression::BindingBehavior { expr, args, .. } => {
                expr.connect(scope, env, binding)?;
                connect_all(args, scope, env, binding)
            }
            Expression::ArrayLiteral { elements } => connect_all(elements, scope, env, binding),
            Expression::ObjectLiteral { values, .. } => connect_all(values, scope, env, binding),
            Expression::TemplateLiteral { expressions, .. }
            | Expression::Interpolation { expressions, .. } => {
                connect_all(expressions, scope, env, binding)
            }
            Expression::ForOf { iterable, .. } => {
                iterable.connect(scope, env, binding)?;
                let value = iterable.evaluate(scope, env)?;
                binding.observe_collection(&value)?;
                Ok(())
            }
        }
    }

    /// True for a single scope-chain access, which `handleChange` can serve
    /// from the authoritative new value without re-evaluating.
    pub fn is_single_access(&self) -> bool {
        matches!(self, Expression::AccessScope { .. })
    }

    /// Binding-behavior tails in outermost-first order.
    pub fn behaviors(&self) -> Vec<(&str, &[Expression])> {
        let mut found = Vec::new();
        let mut current = self;
        while let Expression::BindingBehavior { expr, name, args } = current {
            found.push((name.as_str(), args.as_slice()));
            current = expr;
        }
        found
    }

    /// The expression inside any behavior/converter wrappers.
    pub fn unwrapped(&self) -> &Expression {
        match self {
            Expression::BindingBehavior { expr, .. } | Expression::ValueConverter { expr, .. } => {
                expr.unwrapped()
            }
            other => other,
        }
    }
}

fn evaluate_args(args: &[Expression], scope: &Arc<Scope>, env: &EvalEnv) -> Result<Vec<Value>> {
    args.iter().map(|arg| arg.evaluate(scope, env)).collect()
}

fn connect_all(
    exprs: &[Expression],
    scope: &Arc<Scope>,
    env: &EvalEnv,
    binding: &dyn Connectable,
) -> Result<()> {
    for expr in exprs {
        expr.connect(scope, env, binding)?;
    }
    Ok(())
}

fn concat_parts(
    parts: &[String],
    expressions: &[Expression],
    scope: &Arc<Scope>,
    env: &EvalEnv,
) -> Result<String> {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        out.push_str(part);
        if let Some(expr) = expressions.get(i) {
            out.push_str(&expr.evaluate(scope, env)?.to_display_string());
        }
    }
    Ok(out)
}

fn call_value(func: &Value, name: &str, args: &[Value]) -> Result<Value> {
    match func {
        Value::Function(f) => f.call(args),
        _ => Err(Error::NotAFunction(name.to_string())),
    }
}

/// Loose equality: same-type comparison, with number/string/bool coercion
/// across types. `Null` equals only `Null`.
fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), Value::Str(_))
        | (Value::Str(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => {
            let (x, y) = (a.as_number(), b.as_number());
            x == y
        }
        _ => a == b,
    }
}

fn evaluate_binary(
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    scope: &Arc<Scope>,
    env: &EvalEnv,
) -> Result<Value> {
    // Short-circuit operators yield an operand, not a boolean.
    match op {
        BinaryOp::And => {
            let l = left.evaluate(scope, env)?;
            return if l.is_truthy() { right.evaluate(scope, env) } else { Ok(l) };
        }
        BinaryOp::Or => {
            let l = left.evaluate(scope, env)?;
            return if l.is_truthy() { Ok(l) } else { right.evaluate(scope, env) };
        }
        _ => {}
    }

    let l = left.evaluate(scope, env)?;
    let r = right.evaluate(scope, env)?;
    Ok(match op {
        BinaryOp::Eq => Value::Bool(loose_equals(&l, &r)),
        BinaryOp::Ne => Value::Bool(!loose_equals(&l, &r)),
        BinaryOp::StrictEq => Value::Bool(l == r),
        BinaryOp::StrictNe => Value::Bool(l != r),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            let result = match (&l, &r) {
                (Value::Str(a), Value::Str(b)) => match op {
                    BinaryOp::Lt => a < b,
                    BinaryOp::Gt => a > b,
                    BinaryOp::Le => a <= b,
                    _ => a >= b,
                },
                _ => {
                    let (a, b) = (l.as_number(), r.as_number());
                    match op {
                        BinaryOp::Lt => a < b,
                        BinaryOp::Gt => a > b,
                        BinaryOp::Le => a <= b,
                        _ => a >= b,
                    }
                }
            };
            Value::Bool(result)
        }
        BinaryOp::Add => match (&l, &r) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Value::str(format!("{}{}", l.to_display_string(), r.to_display_string()))
            }
            _ => Value::Number(l.as_number() + r.as_number()),
        },
        BinaryOp::Sub => Value::Number(l.as_number() - r.as_number()),
        BinaryOp::Mul => Value::Number(l.as_number() * r.as_number()),
        BinaryOp::Div => Value::Number(l.as_number() / r.as_number()),
        BinaryOp::Mod => Value::Number(l.as_number() % r.as_number()),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit handled above"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Scheduler;
    use crate::observation::{object_from, ObjectData};
    use std::cell::RefCell;

    fn env_fixture() -> (ObserverLocator, ResourceRegistry) {
        (ObserverLocator::new(Scheduler::new()), ResourceRegistry::new())
    }

    fn access(name: &str) -> Expression {
        Expression::AccessScope {
            name: name.to_string(),
            ancestor: 0,
        }
    }

    fn member(object: Expression, name: &str) -> Expression {
        Expression::AccessMember {
            object: Box::new(object),
            name: name.to_string(),
        }
    }

    #[test]
    fn evaluates_member_chains_against_the_scope() {
        let (locator, resources) = env_fixture();
        let env = EvalEnv::new(&locator, Some(&resources));

        let user = object_from([("name", Value::str("Ann"))]);
        let root = object_from([("user", Value::Object(user))]);
        let scope = Scope::create(Value::Object(root));

        let expr = member(access("user"), "name");
        assert_eq!(expr.evaluate(&scope, &env).unwrap(), Value::str("Ann"));
    }

    #[test]
    fn assign_routes_through_observers() {
        let (locator, resources) = env_fixture();
        let env = EvalEnv::new(&locator, Some(&resources));

        let root = object_from([("count", Value::from(1.0))]);
        let scope = Scope::create(Value::Object(root.clone()));

        access("count")
            .assign(&scope, &env, Value::from(5.0))
            .unwrap();
        assert_eq!(root.field("count"), Some(Value::from(5.0)));
    }

    #[test]
    fn binary_and_conditional_semantics() {
        let (locator, resources) = env_fixture();
        let env = EvalEnv::new(&locator, Some(&resources));
        let scope = Scope::create(Value::Object(object_from([
            ("a", Value::from(2.0)),
            ("b", Value::from(3.0)),
            ("label", Value::str("n=")),
        ])));

        let sum = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(access("a")),
            right: Box::new(access("b")),
        };
        assert_eq!(sum.evaluate(&scope, &env).unwrap(), Value::from(5.0));

        // String concatenation when either side is a string.
        let concat = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(access("label")),
            right: Box::new(access("a")),
        };
        assert_eq!(concat.evaluate(&scope, &env).unwrap(), Value::str("n=2"));

        // Short-circuit yields the operand itself.
        let or = Expression::Binary {
            op: BinaryOp::Or,
            left: Box::new(Expression::Literal {
                value: Literal::Null,
            }),
            right: Box::new(access("b")),
        };
        assert_eq!(or.evaluate(&scope, &env).unwrap(), Value::from(3.0));

        let pick = Expression::Conditional {
            condition: Box::new(Expression::Binary {
                op: BinaryOp::Lt,
                left: Box::new(access("a")),
                right: Box::new(access("b")),
            }),
            yes: Box::new(Expression::Literal {
                value: Literal::Str("less".to_string()),
            }),
            no: Box::new(Expression::Literal {
                value: Literal::Str("more".to_string()),
            }),
        };
        assert_eq!(pick.evaluate(&scope, &env).unwrap(), Value::str("less"));
    }

    #[test]
    fn call_scope_invokes_host_functions() {
        let (locator, resources) = env_fixture();
        let env = EvalEnv::new(&locator, Some(&resources));

        let root = ObjectData::new();
        root.set_field(
            "double",
            Value::Function(crate::observation::NativeFunction::new(|args| {
                Ok(Value::Number(args[0].as_number() * 2.0))
            })),
        );
        let scope = Scope::create(Value::Object(root));

        let expr = Expression::CallScope {
            name: "double".to_string(),
            args: vec![Expression::Literal {
                value: Literal::Number(21.0),
            }],
            ancestor: 0,
        };
        assert_eq!(expr.evaluate(&scope, &env).unwrap(), Value::from(42.0));
    }

    #[test]
    fn calling_a_non_function_errors() {
        let (locator, resources) = env_fixture();
        let env = EvalEnv::new(&locator, Some(&resources));
        let scope = Scope::create(Value::Object(object_from([("x", Value::from(1.0))])));

        let expr = Expression::CallScope {
            name: "x".to_string(),
            args: vec![],
            ancestor: 0,
        };
        let err = expr.evaluate(&scope, &env).unwrap_err();
        assert!(matches!(err, Error::NotAFunction(n) if n == "x"));
    }

    #[test]
    fn interpolation_concatenates_display_strings() {
        let (locator, resources) = env_fixture();
        let env = EvalEnv::new(&locator, Some(&resources));
        let scope = Scope::create(Value::Object(object_from([("n", Value::from(3.0))])));

        let expr = Expression::Interpolation {
            parts: vec!["count: ".to_string(), "!".to_string()],
            expressions: vec![access("n")],
        };
        assert_eq!(expr.evaluate(&scope, &env).unwrap(), Value::str("count: 3!"));
    }

    struct ConnectRecorder {
        observed: RefCell<Vec<String>>,
        collections: RefCell<usize>,
    }

    impl ConnectRecorder {
        fn new() -> Self {
            Self {
                observed: RefCell::new(Vec::new()),
                collections: RefCell::new(0),
            }
        }
    }

    impl Connectable for ConnectRecorder {
        fn observe_property(&self, _obj: &Value, key: &str) -> Result<()> {
            self.observed.borrow_mut().push(key.to_string());
            Ok(())
        }

        fn observe_collection(&self, _collection: &Value) -> Result<()> {
            *self.collections.borrow_mut() += 1;
            Ok(())
        }
    }

    #[test]
    fn connect_registers_every_touched_property() {
        let (locator, resources) = env_fixture();
        let env = EvalEnv::new(&locator, Some(&resources));

        let user = object_from([("name", Value::str("Ann"))]);
        let root = object_from([("user", Value::Object(user))]);
        let scope = Scope::create(Value::Object(root));

        let recorder = ConnectRecorder::new();
        member(access("user"), "name")
            .connect(&scope, &env, &recorder)
            .unwrap();

        assert_eq!(*recorder.observed.borrow(), vec!["user", "name"]);
    }

    #[test]
    fn conditional_connect_observes_only_taken_branch() {
        let (locator, resources) = env_fixture();
        let env = EvalEnv::new(&locator, Some(&resources));
        let scope = Scope::create(Value::Object(object_from([
            ("flag", Value::from(true)),
            ("a", Value::from(1.0)),
            ("b", Value::from(2.0)),
        ])));

        let expr = Expression::Conditional {
            condition: Box::new(access("flag")),
            yes: Box::new(access("a")),
            no: Box::new(access("b")),
        };

        let recorder = ConnectRecorder::new();
        expr.connect(&scope, &env, &recorder).unwrap();
        assert_eq!(*recorder.observed.borrow(), vec!["flag", "a"]);
    }

    #[test]
    fn for_of_observes_the_collection() {
        let (locator, resources) = env_fixture();
        let env = EvalEnv::new(&locator, Some(&resources));

        let items = crate::observation::ArrayData::new(vec![Value::from(1.0)]);
        let scope = Scope::create(Value::Object(object_from([(
            "items",
            Value::Array(items),
        )])));

        let expr = Expression::ForOf {
            local: "item".to_string(),
            iterable: Box::new(access("items")),
        };
        let recorder = ConnectRecorder::new();
        expr.connect(&scope, &env, &recorder).unwrap();
        assert_eq!(*recorder.collections.borrow(), 1);
    }

    #[test]
    fn behaviors_collect_outermost_first() {
        let expr = Expression::BindingBehavior {
            expr: Box::new(Expression::BindingBehavior {
                expr: Box::new(access("x")),
                name: "inner".to_string(),
                args: vec![],
            }),
            name: "outer".to_string(),
            args: vec![],
        };
        let behaviors = expr.behaviors();
        assert_eq!(behaviors.len(), 2);
        assert_eq!(behaviors[0].0, "outer");
        assert_eq!(behaviors[1].0, "inner");
        assert!(matches!(
            expr.unwrapped(),
            Expression::AccessScope { name, .. } if name == "x"
        ));
    }

    #[test]
    fn ast_round_trips_through_serde() {
        let expr = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(access("a")),
            right: Box::new(Expression::Literal {
                value: Literal::Number(1.0),
            }),
        };
        let json = serde_json::to_string(&expr).unwrap();
        let back: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(expr, back);
    }
}
