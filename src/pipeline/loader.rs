//! Stage loading and validation
//!
//! Turns the raw stage tree supplied by the orchestrator into a flat,
//! ordered list of [`Stage`]s:
//!
//! - every raw stage is checked against [`ALLOWED_STAGE_KEYS`]
//! - `run_conditions` are evaluated, a false stage is dropped together with
//!   its nested group
//! - a nested `stages` group (a list, a mapping with a `stages` key, or a
//!   YAML string holding either) is validated with further nesting disallowed
//!   and appended right after its parent
//!
//! ```rust
//! use hotloop::StageLoader;
//!
//! let stages = StageLoader::new()
//!     .load_str(
//!         r#"
//! - name: A
//!   shell: "x"
//!   stages:
//!     - name: B
//!       shell: "y"
//! "#,
//!     )
//!     .unwrap();
//! let names: Vec<_> = stages.iter().map(|s| s.name.as_str()).collect();
//! assert_eq!(names, ["A", "B"]);
//! ```

use super::Validate;
use super::condition::all_truthy;
use super::errors::{PipelineError, ValidationError};
use super::stage::{ALLOWED_STAGE_KEYS, PASSIVE_STAGE_KEYS, Stage, kind_of};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// Loads and validates stage lists
#[derive(Debug, Clone, Copy, Default)]
pub struct StageLoader;

impl StageLoader {
    /// Creates a new loader
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Loads stages from a YAML file
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be read, otherwise
    /// the errors of [`StageLoader::load_str`].
    pub fn load_file(&self, path: &Path) -> Result<Vec<Stage>, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Io(format!("{}: {e}", path.display())))?;
        self.load_str(&text)
    }

    /// Loads stages from YAML text
    ///
    /// The root is either a list of stages or a mapping with a `stages` key.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Yaml`] for unparsable text, otherwise the
    /// errors of [`StageLoader::load`].
    pub fn load_str(&self, yaml: &str) -> Result<Vec<Stage>, PipelineError> {
        let root: Value = serde_yaml::from_str(yaml)?;
        match root {
            Value::Mapping(mut map) => {
                let stages = map.remove("stages").unwrap_or(Value::Sequence(Vec::new()));
                self.load(&stages)
            }
            other => self.load(&other),
        }
    }

    /// Loads a raw stage list
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] for any schema violation. Loading
    /// is all-or-nothing: no stages are returned if one is invalid.
    pub fn load(&self, raw: &Value) -> Result<Vec<Stage>, PipelineError> {
        let Value::Sequence(entries) = raw else {
            return Err(ValidationError::NotAList {
                what: "stages".to_string(),
                found: kind_of(raw).to_string(),
            }
            .into());
        };

        let mut loaded = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let mut body = validate_raw_stage(entry, index, false)?.clone();

            if !conditions_hold(&body) {
                tracing::debug!(stage = %stage_name(&body), "Run conditions not met, skipping stage");
                continue;
            }

            let nested = body.remove("stages");

            if is_actionable(&body) {
                loaded.push(into_stage(body)?);
            }

            if let Some(nested) = nested.filter(super::condition::is_truthy) {
                loaded.extend(self.load_nested(&nested)?);
            }
        }

        tracing::debug!(count = loaded.len(), "Loaded stages");
        Ok(loaded)
    }

    fn load_nested(&self, nested: &Value) -> Result<Vec<Stage>, PipelineError> {
        let entries = match nested {
            Value::String(text) => parse_nested_documents(text)?,
            other => nested_entries(other)?,
        };

        let mut loaded = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            let body = validate_raw_stage(entry, index, true)?;

            if conditions_hold(body) {
                loaded.push(into_stage(body.clone())?);
            } else {
                tracing::debug!(stage = %stage_name(body), "Run conditions not met, skipping nested stage");
            }
        }
        Ok(loaded)
    }
}

/// Checks a raw stage against the stage schema and returns its mapping
fn validate_raw_stage(
    entry: &Value,
    index: usize,
    nested: bool,
) -> Result<&Mapping, ValidationError> {
    let Value::Mapping(body) = entry else {
        return Err(ValidationError::NotAMapping {
            found: kind_of(entry).to_string(),
        });
    };

    let mut unknown: Vec<String> = body
        .keys()
        .filter(|key| !key.as_str().is_some_and(|k| ALLOWED_STAGE_KEYS.contains(&k)))
        .map(render_key)
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(ValidationError::UnknownKeys {
            stage: stage_name(body),
            keys: unknown,
        });
    }

    if !body.contains_key("name") {
        return Err(ValidationError::MissingName { index });
    }

    if let Some(wait) = body.get("wait_conditions")
        && !wait.is_sequence()
    {
        return Err(ValidationError::WaitConditionsNotAList {
            stage: stage_name(body),
            found: kind_of(wait).to_string(),
        });
    }

    if nested && body.contains_key("stages") {
        return Err(ValidationError::NestedTooDeep {
            stage: stage_name(body),
        });
    }

    if let Some(conditions) = body.get("run_conditions")
        && !conditions.is_sequence()
    {
        return Err(ValidationError::RunConditionsNotAList {
            stage: stage_name(body),
            found: kind_of(conditions).to_string(),
        });
    }

    Ok(body)
}

fn conditions_hold(body: &Mapping) -> bool {
    match body.get("run_conditions") {
        Some(Value::Sequence(conditions)) => all_truthy(conditions),
        _ => true,
    }
}

fn is_actionable(body: &Mapping) -> bool {
    body.keys()
        .any(|key| !key.as_str().is_some_and(|k| PASSIVE_STAGE_KEYS.contains(&k)))
}

fn into_stage(body: Mapping) -> Result<Stage, ValidationError> {
    let name = stage_name(&body);
    let stage: Stage =
        serde_yaml::from_value(Value::Mapping(body)).map_err(|e| ValidationError::InvalidStage {
            stage: name,
            reason: e.to_string(),
        })?;
    stage.validate()?;
    Ok(stage)
}

fn nested_entries(value: &Value) -> Result<Vec<Value>, ValidationError> {
    match value {
        Value::Sequence(entries) => Ok(entries.clone()),
        Value::Mapping(map) => match map.get("stages") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Sequence(entries)) => Ok(entries.clone()),
            Some(other) => Err(ValidationError::InvalidNestedStages {
                found: kind_of(other).to_string(),
            }),
        },
        other => Err(ValidationError::InvalidNestedStages {
            found: kind_of(other).to_string(),
        }),
    }
}

/// Parses a nested `stages` string, which may hold several YAML documents
fn parse_nested_documents(text: &str) -> Result<Vec<Value>, PipelineError> {
    let mut entries = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        entries.extend(nested_entries(&value)?);
    }
    Ok(entries)
}

fn stage_name(body: &Mapping) -> String {
    match body.get("name") {
        Some(Value::String(name)) => name.clone(),
        Some(other) => render_key(other),
        None => "<unnamed>".to_string(),
    }
}

fn render_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| kind_of(other).to_string()),
    }
}
