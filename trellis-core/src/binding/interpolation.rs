//! Interpolation Binding
//!
//! Binds text with `${}` holes to a target property. Evaluation
//! concatenates the static parts with the display strings of each embedded
//! expression, so the target always receives one string. Interpolations are
//! inherently one-directional: to-view or one-time.

use std::sync::Arc;

use super::ast::Expression;
use super::mode::BindingMode;
use super::property::{BindingStatus, PropertyBinding};
use super::resources::ResourceRegistry;
use super::scope::Scope;
use crate::error::Result;
use crate::observation::{Flags, ObserverLocator, Value};

/// A to-view/one-time binding over an interpolated string.
#[derive(Clone)]
pub struct InterpolationBinding {
    binding: PropertyBinding,
}

impl InterpolationBinding {
    /// Create an unbound interpolation binding.
    ///
    /// `source` must be an [`Expression::Interpolation`]; `mode` must be
    /// one-directional.
    pub fn new(
        source: Arc<Expression>,
        target: Value,
        target_property: impl Into<String>,
        mode: BindingMode,
        locator: ObserverLocator,
        resources: Option<Arc<ResourceRegistry>>,
    ) -> Self {
        debug_assert!(matches!(
            source.as_ref(),
            Expression::Interpolation { .. }
        ));
        debug_assert!(matches!(
            mode,
            BindingMode::ToView | BindingMode::OneTime
        ));
        Self {
            binding: PropertyBinding::new(source, target, target_property, mode, locator, resources),
        }
    }

    /// Attach to `scope` and push the initial concatenation.
    pub fn bind(&self, flags: Flags, scope: &Arc<Scope>) -> Result<()> {
        self.binding.bind(flags, scope)
    }

    /// Detach and release all expression subscriptions.
    pub fn unbind(&self, flags: Flags) -> Result<()> {
        self.binding.unbind(flags)
    }

    /// Current lifecycle status.
    pub fn status(&self) -> BindingStatus {
        self.binding.status()
    }

    /// True while bound.
    pub fn is_bound(&self) -> bool {
        self.binding.is_bound()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::parser::ExpressionParser;
    use crate::lifecycle::Scheduler;
    use crate::observation::{object_from, ObjectData};

    #[test]
    fn concatenates_and_tracks_every_hole() {
        let locator = ObserverLocator::new(Scheduler::new());
        let parser = ExpressionParser::new();

        let root = object_from([
            ("name", Value::str("Ann")),
            ("count", Value::from(2.0)),
        ]);
        let scope = Scope::create(Value::Object(root.clone()));
        let target = ObjectData::new();

        let source = Arc::new(
            parser
                .parse_interpolation("Hi ${name}, ${count} new")
                .unwrap()
                .unwrap(),
        );
        let binding = InterpolationBinding::new(
            source,
            Value::Object(target.clone()),
            "text",
            BindingMode::ToView,
            locator.clone(),
            None,
        );
        binding.bind(Flags::BIND, &scope).unwrap();
        assert_eq!(target.field("text"), Some(Value::str("Hi Ann, 2 new")));

        locator
            .get_observer(&Value::Object(root), "count")
            .unwrap()
            .set_value(Value::from(3.0), Flags::NONE)
            .unwrap();
        assert_eq!(target.field("text"), Some(Value::str("Hi Ann, 3 new")));
    }

    #[test]
    fn one_time_interpolation_stays_frozen() {
        let locator = ObserverLocator::new(Scheduler::new());
        let parser = ExpressionParser::new();

        let root = object_from([("name", Value::str("Ann"))]);
        let scope = Scope::create(Value::Object(root.clone()));
        let target = ObjectData::new();

        let source = Arc::new(parser.parse_interpolation("${name}").unwrap().unwrap());
        let binding = InterpolationBinding::new(
            source,
            Value::Object(target.clone()),
            "text",
            BindingMode::OneTime,
            locator.clone(),
            None,
        );
        binding.bind(Flags::BIND, &scope).unwrap();
        assert_eq!(target.field("text"), Some(Value::str("Ann")));

        locator
            .get_observer(&Value::Object(root), "name")
            .unwrap()
            .set_value(Value::str("Bob"), Flags::NONE)
            .unwrap();
        assert_eq!(target.field("text"), Some(Value::str("Ann")));
    }
}
