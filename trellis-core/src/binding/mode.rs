//! Binding Modes
//!
//! The direction(s) in which a binding propagates changes.

use serde::{Deserialize, Serialize};

/// Direction of change propagation for a property binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingMode {
    /// Evaluate once at bind time; never observe.
    OneTime,
    /// Source changes push to the target.
    ToView,
    /// Target changes push back to the source.
    FromView,
    /// Both directions.
    TwoWay,
}

impl BindingMode {
    /// True when the mode pushes source values to the target.
    pub fn updates_target(self) -> bool {
        matches!(self, BindingMode::OneTime | BindingMode::ToView | BindingMode::TwoWay)
    }

    /// True when the mode observes the source after the initial push.
    pub fn observes_source(self) -> bool {
        matches!(self, BindingMode::ToView | BindingMode::TwoWay)
    }

    /// True when the mode observes the target.
    pub fn observes_target(self) -> bool {
        matches!(self, BindingMode::FromView | BindingMode::TwoWay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_predicates() {
        assert!(BindingMode::OneTime.updates_target());
        assert!(!BindingMode::OneTime.observes_source());
        assert!(BindingMode::ToView.observes_source());
        assert!(!BindingMode::ToView.observes_target());
        assert!(BindingMode::FromView.observes_target());
        assert!(!BindingMode::FromView.updates_target());
        assert!(BindingMode::TwoWay.observes_source());
        assert!(BindingMode::TwoWay.observes_target());
    }

    #[test]
    fn serializes_as_camel_case() {
        assert_eq!(
            serde_json::to_string(&BindingMode::TwoWay).unwrap(),
            "\"twoWay\""
        );
    }
}
