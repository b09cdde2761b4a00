//! YAML path patcher
//!
//! Applies [`Patch`]es to every document of a multi-document YAML file.
//! A patch succeeds when at least one document either already carries the
//! value or satisfies the patch's `where` clauses and gets updated.

use super::document::{lookup, parent_exists, replace};
use super::path::PathExpr;
use crate::pipeline::{
    Patch, PipelineError, PipelineResult, Validate, ValidationError, WhereClause,
};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;

/// Outcome of a single patch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchResult {
    /// Path expression that was patched
    pub path: String,
    /// Value written
    pub value: Value,
    /// Whether the file was rewritten
    pub changed: bool,
    /// Per-document where evaluation, in document order
    pub where_results: Vec<bool>,
}

/// Patches YAML files in place
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlPatcher;

impl YamlPatcher {
    /// Creates a new patcher
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Applies one patch to `file`
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or read-only, the patch is
    /// malformed, a path cannot be walked, or no document matched.
    pub fn patch(&self, file: &Path, patch: &Patch) -> PipelineResult<PatchResult> {
        check_file(file)?;
        patch.validate()?;

        let path = PathExpr::parse(&patch.path)?;
        let clauses = compile_where(&patch.where_clauses)?;

        let text = std::fs::read_to_string(file)?;
        let mut documents = parse_documents(&text)?;
        let (changed, where_results) =
            patch_documents(&mut documents, &path, &patch.value, &clauses)?;

        if changed {
            std::fs::write(file, render_documents(&documents)?)?;
        }

        if !where_results.contains(&true) {
            return Err(PipelineError::WhereNotMatched {
                file: file.to_path_buf(),
                clauses: render_clauses(&patch.where_clauses),
                results: where_results,
            });
        }

        tracing::info!(
            file = %file.display(),
            path = %patch.path,
            changed,
            "Patched manifest"
        );

        Ok(PatchResult {
            path: patch.path.clone(),
            value: patch.value.clone(),
            changed,
            where_results,
        })
    }

    /// Applies patches in order, stopping at the first failure
    ///
    /// # Errors
    ///
    /// Returns the first error produced by [`YamlPatcher::patch`].
    pub fn apply_patches(&self, file: &Path, patches: &[Patch]) -> PipelineResult<Vec<PatchResult>> {
        patches.iter().map(|patch| self.patch(file, patch)).collect()
    }
}

fn check_file(file: &Path) -> PipelineResult<()> {
    let metadata = std::fs::metadata(file)
        .map_err(|_| PipelineError::Io(format!("File {} does not exist", file.display())))?;
    if !metadata.is_file() {
        return Err(PipelineError::Io(format!("{} is not a file", file.display())));
    }
    if metadata.permissions().readonly() {
        return Err(ValidationError::not_writable(file).into());
    }
    Ok(())
}

fn compile_where(clauses: &[WhereClause]) -> PipelineResult<Vec<(PathExpr, &Value)>> {
    clauses
        .iter()
        .map(|clause| Ok((PathExpr::parse(&clause.path)?, &clause.value)))
        .collect()
}

fn where_matches(document: &Value, clauses: &[(PathExpr, &Value)]) -> bool {
    clauses.iter().all(|(path, expected)| {
        lookup(document, path.segments()).unwrap_or(&Value::Null) == *expected
    })
}

/// Returns whether any document changed, and the per-document where results
fn patch_documents(
    documents: &mut [Value],
    path: &PathExpr,
    value: &Value,
    clauses: &[(PathExpr, &Value)],
) -> PipelineResult<(bool, Vec<bool>)> {
    let mut changed = false;
    let mut where_results = Vec::with_capacity(documents.len());

    for document in documents.iter_mut() {
        let matched = where_matches(document, clauses);
        where_results.push(matched);

        if !parent_exists(document, path) {
            continue;
        }
        if lookup(document, path.segments()) == Some(value) {
            if let Some(last) = where_results.last_mut() {
                *last = true;
            }
            continue;
        }
        if matched {
            replace(document, path, value.clone())?;
            changed = true;
        }
    }

    Ok((changed, where_results))
}

/// Parses every document of a YAML stream
///
/// # Errors
///
/// Returns [`PipelineError::Yaml`] if any document fails to parse.
pub fn parse_documents(text: &str) -> PipelineResult<Vec<Value>> {
    serde_yaml::Deserializer::from_str(text)
        .map(|document| Value::deserialize(document).map_err(PipelineError::from))
        .collect()
}

/// Renders documents back into a `---` separated stream
///
/// # Errors
///
/// Returns [`PipelineError::Yaml`] if a document cannot be serialized.
pub fn render_documents(documents: &[Value]) -> PipelineResult<String> {
    let mut out = String::new();
    for (i, document) in documents.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(document)?);
    }
    Ok(out)
}

fn render_clauses(clauses: &[WhereClause]) -> String {
    let rendered: Vec<String> = clauses.iter().map(ToString::to_string).collect();
    format!("[{}]", rendered.join(", "))
}
