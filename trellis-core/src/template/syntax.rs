//! Attribute Syntax
//!
//! Parses an attribute name/value pair into the `(target, command, value)`
//! triple the binder routes on, and implements the semicolon-delimited
//! multi-binding mini-grammar used by custom attributes with several
//! bindables.

use crate::binding::{BindingCommand, ResourceRegistry};

/// One parsed attribute: target property, optional binding command, raw
/// value.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrSyntax {
    /// The attribute name with any command suffix removed.
    pub target: String,
    /// The recognized binding command, if the suffix named one.
    pub command: Option<BindingCommand>,
    /// The raw attribute value.
    pub raw_value: String,
}

impl AttrSyntax {
    /// Parse `name="value"`. A trailing `.suffix` is a command only when the
    /// registry recognizes it; otherwise the dot is part of the target name.
    pub fn parse(name: &str, value: &str, resources: &ResourceRegistry) -> AttrSyntax {
        if let Some(dot) = name.rfind('.') {
            let (target, suffix) = name.split_at(dot);
            let suffix = &suffix[1..];
            if !target.is_empty() {
                if let Some(command) = resources.command(suffix) {
                    return AttrSyntax {
                        target: target.to_string(),
                        command: Some(command),
                        raw_value: value.to_string(),
                    };
                }
            }
        }
        AttrSyntax {
            target: name.to_string(),
            command: None,
            raw_value: value.to_string(),
        }
    }
}

/// True when `value` contains a colon that is not backslash-escaped, i.e.
/// the multi-binding grammar applies.
pub fn has_multi_bindings(value: &str) -> bool {
    let mut escaped = false;
    for ch in value.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            ':' => return true,
            _ => {}
        }
    }
    false
}

/// Split a multi-binding value into `(name, value)` pairs.
///
/// The grammar is `name: value; name2: value2`. Backslash escapes the next
/// character in both the name and value spans, so `:` and `;` only
/// terminate when unescaped. Whitespace around names and values is trimmed;
/// empty segments are skipped.
pub fn parse_multi_bindings(value: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut name = String::new();
    let mut current = String::new();
    let mut in_value = false;
    let mut escaped = false;

    let mut finish = |name: &mut String, current: &mut String, in_value: &mut bool| {
        let n = std::mem::take(name);
        let v = std::mem::take(current);
        let (n, v) = if *in_value {
            (n, v)
        } else {
            // A segment with no colon is a bare name with an empty value.
            (v, String::new())
        };
        *in_value = false;
        let n = n.trim().to_string();
        if !n.is_empty() {
            pairs.push((n, v.trim().to_string()));
        }
    };

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            ':' if !in_value => {
                name = std::mem::take(&mut current);
                in_value = true;
            }
            ';' => finish(&mut name, &mut current, &mut in_value),
            _ => current.push(ch),
        }
    }
    finish(&mut name, &mut current, &mut in_value);
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ResourceRegistry {
        ResourceRegistry::new()
    }

    #[test]
    fn splits_known_command_suffixes() {
        let r = registry();
        let syntax = AttrSyntax::parse("value.bind", "user.name", &r);
        assert_eq!(syntax.target, "value");
        assert_eq!(syntax.command, Some(BindingCommand::Bind));
        assert_eq!(syntax.raw_value, "user.name");

        let syntax = AttrSyntax::parse("item.for", "x", &r);
        assert_eq!(syntax.command, Some(BindingCommand::For));
    }

    #[test]
    fn unknown_suffixes_stay_in_the_target() {
        let r = registry();
        let syntax = AttrSyntax::parse("data.role", "admin", &r);
        assert_eq!(syntax.target, "data.role");
        assert_eq!(syntax.command, None);
    }

    #[test]
    fn plain_names_have_no_command() {
        let r = registry();
        let syntax = AttrSyntax::parse("title", "hello", &r);
        assert_eq!(syntax.target, "title");
        assert_eq!(syntax.command, None);
    }

    #[test]
    fn multi_binding_detection_honors_escapes() {
        assert!(has_multi_bindings("foo: 1"));
        assert!(!has_multi_bindings("no colons here"));
        assert!(!has_multi_bindings("escaped\\: colon"));
    }

    #[test]
    fn splits_two_sub_bindings() {
        let pairs = parse_multi_bindings("foo: 1; bar: 2");
        assert_eq!(
            pairs,
            vec![
                ("foo".to_string(), "1".to_string()),
                ("bar".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn escapes_survive_in_names_and_values() {
        let pairs = parse_multi_bindings("a\\:b: c\\;d; e: f");
        assert_eq!(
            pairs,
            vec![
                ("a:b".to_string(), "c;d".to_string()),
                ("e".to_string(), "f".to_string()),
            ]
        );
    }

    #[test]
    fn empty_segments_are_skipped() {
        let pairs = parse_multi_bindings("foo: 1;; bar: 2;");
        assert_eq!(pairs.len(), 2);
    }
}
