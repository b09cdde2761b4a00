//! Stage types for pipeline definition
//!
//! A [`Stage`] is the unit of pipeline work: a delegated command or shell
//! step, a manifest (optionally patched before it is applied) and a list of
//! wait conditions. Nested stage groups only exist in the raw input; the
//! [`StageLoader`](super::StageLoader) flattens them.

#![allow(clippy::must_use_candidate)]

use super::Validate;
use super::errors::ValidationError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;

/// Keys a raw stage mapping may carry
pub const ALLOWED_STAGE_KEYS: &[&str] = &[
    "name",
    "command",
    "documentation",
    "manifest",
    "patches",
    "run_conditions",
    "shell",
    "stages",
    "wait_conditions",
];

/// Keys that do not make a stage actionable on their own
pub const PASSIVE_STAGE_KEYS: &[&str] = &["name", "documentation"];

/// A single flattened stage, ready to execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    /// Stage name
    pub name: String,

    /// Descriptive text, no runtime effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,

    /// Command executed by the step delegate, without a shell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Script executed by the step delegate through a shell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Path to a manifest file or kustomization directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,

    /// Mutations applied to the manifest before it is applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,

    /// Gating predicates, already evaluated by the loader
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_conditions: Vec<Value>,

    /// Wait commands run after the manifest is applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wait_conditions: Vec<String>,
}

impl Stage {
    /// Creates a stage with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documentation: None,
            command: None,
            shell: None,
            manifest: None,
            patches: Vec::new(),
            run_conditions: Vec::new(),
            wait_conditions: Vec::new(),
        }
    }

    /// Sets the delegated command
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Sets the delegated shell script
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Sets the manifest path
    #[must_use]
    pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }

    /// Adds a patch
    #[must_use]
    pub fn with_patch(mut self, patch: Patch) -> Self {
        self.patches.push(patch);
        self
    }

    /// Adds a wait condition
    #[must_use]
    pub fn with_wait_condition(mut self, condition: impl Into<String>) -> Self {
        self.wait_conditions.push(condition.into());
        self
    }

    /// Returns true if the stage has anything to execute
    pub fn is_actionable(&self) -> bool {
        self.command.is_some()
            || self.shell.is_some()
            || self.manifest.is_some()
            || !self.patches.is_empty()
            || !self.wait_conditions.is_empty()
    }
}

impl Validate for Stage {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        for patch in &self.patches {
            patch.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A structured, path-addressed mutation of a YAML document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patch {
    /// Dot-and-bracket path, e.g. `spec.template.[0].image`
    pub path: String,

    /// Replacement value
    pub value: Value,

    /// Predicates selecting the documents to patch
    #[serde(default, rename = "where", skip_serializing_if = "Vec::is_empty")]
    pub where_clauses: Vec<WhereClause>,
}

impl Patch {
    /// Creates a patch without where clauses
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            where_clauses: Vec::new(),
        }
    }

    /// Adds a where clause
    #[must_use]
    pub fn matching(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_clauses.push(WhereClause {
            path: path.into(),
            value: value.into(),
        });
        self
    }
}

impl Validate for Patch {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match self.value {
            Value::String(_)
            | Value::Number(_)
            | Value::Bool(_)
            | Value::Sequence(_)
            | Value::Mapping(_) => Ok(()),
            Value::Null | Value::Tagged(_) => Err(ValidationError::InvalidPatchValue {
                path: self.path.clone(),
                found: kind_of(&self.value).to_string(),
            }),
        }
    }
}

/// A document predicate: the value at `path` must equal `value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhereClause {
    /// Dot-and-bracket path into the document
    pub path: String,

    /// Expected value; `null` matches a missing path
    pub value: Value,
}

impl fmt::Display for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = serde_json::to_string(&self.value).unwrap_or_else(|_| "?".to_string());
        write!(f, "{}={}", self.path, value)
    }
}

/// Names the YAML kind of a value, for error messages
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
