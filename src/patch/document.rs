//! Typed walking of YAML documents

use super::path::{PathExpr, Segment};
use crate::pipeline::{PipelineError, stage::kind_of};
use serde_yaml::Value;

/// Returns the value addressed by `segments`, if every step resolves
#[must_use]
pub fn lookup<'a>(document: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(document, |current, segment| match (current, segment) {
            (Value::Mapping(map), Segment::Key(key)) => map.get(key.as_str()),
            (Value::Sequence(seq), Segment::Index(index)) => seq.get(*index),
            _ => None,
        })
}

fn lookup_mut<'a>(document: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    segments
        .iter()
        .try_fold(document, |current, segment| match (current, segment) {
            (Value::Mapping(map), Segment::Key(key)) => map.get_mut(key.as_str()),
            (Value::Sequence(seq), Segment::Index(index)) => seq.get_mut(*index),
            _ => None,
        })
}

/// Returns true if the container addressed by the path's parent exists
#[must_use]
pub fn parent_exists(document: &Value, path: &PathExpr) -> bool {
    lookup(document, path.parent()).is_some()
}

/// Sets the value at `path`
///
/// A key segment inserts into (or overwrites within) the parent mapping. An
/// index segment overwrites an existing list element; it never appends.
///
/// # Errors
///
/// Returns [`PipelineError::Path`] if the parent is missing, the index is
/// out of range, or the segment kind does not match the parent container.
pub fn replace(document: &mut Value, path: &PathExpr, value: Value) -> Result<(), PipelineError> {
    let path_error = |reason: String| PipelineError::Path {
        path: path.to_string(),
        reason,
    };

    let parent = lookup_mut(document, path.parent())
        .ok_or_else(|| path_error("parent does not exist".to_string()))?;

    match (parent, path.last()) {
        (Value::Mapping(map), Segment::Key(key)) => {
            map.insert(Value::String(key.clone()), value);
            Ok(())
        }
        (Value::Sequence(seq), Segment::Index(index)) => {
            let len = seq.len();
            let slot = seq.get_mut(*index).ok_or_else(|| {
                path_error(format!("Index out of range in YAML path: {index} >= {len}"))
            })?;
            *slot = value;
            Ok(())
        }
        (parent, segment) => Err(path_error(format!(
            "cannot set '{segment}' on a {}",
            kind_of(parent)
        ))),
    }
}
