//! Path expressions
//!
//! A path such as `spec.template.[2].image` is split on `.` into segments.
//! A segment of the form `[N]` indexes into a list, anything else is a
//! mapping key.

use crate::pipeline::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

static ARRAY_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(\d+)\]$").unwrap());

/// One step of a path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Mapping key
    Key(String),
    /// List index
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// A parsed, non-empty path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    segments: Vec<Segment>,
}

impl PathExpr {
    /// Parses a dot-and-bracket path expression
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPath`] for an empty expression, an
    /// empty segment, or an index that does not fit a `usize`.
    pub fn parse(expr: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidPath {
            path: expr.to_string(),
        };

        if expr.is_empty() {
            return Err(invalid());
        }

        let segments = expr
            .split('.')
            .map(|part| {
                if part.is_empty() {
                    return Err(invalid());
                }
                match ARRAY_REF.captures(part) {
                    Some(caps) => caps[1]
                        .parse::<usize>()
                        .map(Segment::Index)
                        .map_err(|_| invalid()),
                    None => Ok(Segment::Key(part.to_string())),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { segments })
    }

    /// All segments, in order
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Every segment but the last, addressing the parent container
    #[must_use]
    pub fn parent(&self) -> &[Segment] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The final segment
    #[must_use]
    pub fn last(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }
}

impl FromStr for PathExpr {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_parse_keys_and_indexes() {
        let path = PathExpr::parse("spec.bar.[2].baz.key_name").unwrap();
        assert_eq!(
            path.segments(),
            [
                Segment::Key("spec".to_string()),
                Segment::Key("bar".to_string()),
                Segment::Index(2),
                Segment::Key("baz".to_string()),
                Segment::Key("key_name".to_string()),
            ]
        );
        assert_eq!(path.last(), &Segment::Key("key_name".to_string()));
        assert_eq!(path.parent().len(), 4);
    }

    #[test]
    fn test_single_segment_has_root_parent() {
        let path = PathExpr::parse("kind").unwrap();
        assert!(path.parent().is_empty());
    }

    #[test]
    fn test_bracket_forms_that_are_keys() {
        let path = PathExpr::parse("a.[x].[-1].[1]b").unwrap();
        assert_eq!(
            path.segments()[1..],
            [
                Segment::Key("[x]".to_string()),
                Segment::Key("[-1]".to_string()),
                Segment::Key("[1]b".to_string()),
            ]
        );
    }

    #[test]
    fn test_rejects_empty_segments() {
        assert!(PathExpr::parse("").is_err());
        assert!(PathExpr::parse("a..b").is_err());
        assert!(PathExpr::parse(".a").is_err());
        assert!(PathExpr::parse("a.").is_err());
    }

    #[test]
    fn test_rejects_overflowing_index() {
        assert!(PathExpr::parse("a.[99999999999999999999999]").is_err());
    }

    proptest! {
        #[test]
        fn prop_display_reproduces_input(
            parts in prop::collection::vec(
                prop_oneof![
                    "[a-z_][a-z0-9_-]{0,8}",
                    (0usize..1000).prop_map(|i| format!("[{i}]")),
                ],
                1..6,
            )
        ) {
            let expr = parts.join(".");
            let path = PathExpr::parse(&expr).unwrap();
            prop_assert_eq!(path.segments().len(), parts.len());
            prop_assert_eq!(path.to_string(), expr);
        }
    }
}
