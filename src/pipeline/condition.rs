//! Run-condition evaluation
//!
//! Conditions are arbitrary YAML values coerced to a boolean. Strings are
//! true when non-empty, except for the literal spellings of false that
//! templating commonly renders (`"false"`, `"False"`, `"FALSE"`).

use serde_yaml::Value;

/// Strings treated as false even though they are non-empty
pub const FALSE_STRINGS: &[&str] = &["false", "False", "FALSE"];

/// Returns the truthiness of a single condition value
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && !FALSE_STRINGS.contains(&s.as_str()),
        Value::Sequence(seq) => !seq.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
        Value::Tagged(tagged) => is_truthy(&tagged.value),
    }
}

/// Returns true if every condition is truthy (an empty list is true)
#[must_use]
pub fn all_truthy(conditions: &[Value]) -> bool {
    conditions.iter().all(is_truthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn s(value: &str) -> Value {
        Value::String(value.to_string())
    }

    #[test]
    fn test_false_spellings() {
        assert!(!is_truthy(&s("false")));
        assert!(!is_truthy(&s("False")));
        assert!(!is_truthy(&s("FALSE")));
        assert!(!is_truthy(&s("")));
    }

    #[test]
    fn test_other_strings_are_true() {
        assert!(is_truthy(&s("0")));
        assert!(is_truthy(&s("no")));
        assert!(is_truthy(&s("fALSE")));
        assert!(is_truthy(&s("true")));
    }

    #[test]
    fn test_non_string_values() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&Value::Bool(false)));
        assert!(is_truthy(&Value::Bool(true)));
        assert!(!is_truthy(&Value::from(0)));
        assert!(!is_truthy(&Value::from(0.0)));
        assert!(is_truthy(&Value::from(2)));
        assert!(!is_truthy(&Value::Sequence(vec![])));
        assert!(is_truthy(&Value::Sequence(vec![Value::Null])));
    }

    #[test]
    fn test_all_truthy_and_semantics() {
        assert!(all_truthy(&[]));
        assert!(all_truthy(&[Value::Bool(true), s("yes")]));
        assert!(!all_truthy(&[Value::Bool(true), s("False")]));
    }

    proptest! {
        #[test]
        fn prop_non_empty_strings_are_true_unless_false_spelling(text in ".+") {
            let expected = !FALSE_STRINGS.contains(&text.as_str());
            prop_assert_eq!(is_truthy(&Value::String(text)), expected);
        }

        #[test]
        fn prop_integers_true_iff_non_zero(n in any::<i64>()) {
            prop_assert_eq!(is_truthy(&Value::from(n)), n != 0);
        }
    }
}
