//! `hotloop patch` - Patch a YAML file in place
//!
//! ## Usage
//!
//! ```bash
//! hotloop patch deploy.yaml -p spec.replicas -v 3 -w kind=Deployment
//! ```

use super::{OutputFormat, print_json};
use anyhow::{Context, Result};
use hotloop::patch::{PatchResult, YamlPatcher};
use hotloop::pipeline::Patch;
use serde_yaml::Value;
use std::path::Path;

/// Builds a patch from command-line strings
///
/// Values are parsed as YAML, so `3` is a number and `'3'` a string.
pub fn build_patch(path: &str, value: &str, where_clauses: &[String]) -> Result<Patch> {
    let mut patch = Patch::new(path, parse_value(value)?);
    for clause in where_clauses {
        let (where_path, where_value) = clause
            .split_once('=')
            .with_context(|| format!("Invalid where clause '{clause}', expected path=value"))?;
        patch = patch.matching(where_path.trim(), parse_value(where_value)?);
    }
    Ok(patch)
}

fn parse_value(text: &str) -> Result<Value> {
    serde_yaml::from_str(text).with_context(|| format!("Invalid YAML value: {text}"))
}

/// Applies `patch` to `file` and prints the outcome
pub fn patch_file(file: &Path, patch: &Patch, format: OutputFormat) -> Result<PatchResult> {
    let result = YamlPatcher::new()
        .patch(file, patch)
        .with_context(|| format!("Failed to patch {}", file.display()))?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            let status = if result.changed { "changed" } else { "unchanged" };
            println!("{}: {} {status}", file.display(), result.path);
        }
    }
    Ok(result)
}
