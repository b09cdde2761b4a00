//! `hotloop load` - Validate a stage file
//!
//! Loads the file the same way `hotloop run` does, including run conditions
//! and nested stage flattening, and prints what would execute.
//!
//! ## Usage
//!
//! ```bash
//! hotloop load stages.yaml
//! hotloop load stages.yaml --format json
//! ```

use super::{OutputFormat, print_json};
use anyhow::{Context, Result};
use hotloop::pipeline::{Stage, StageLoader};
use std::path::Path;

/// Loads `file` and prints the flattened stages
pub fn load_stages(file: &Path, format: OutputFormat) -> Result<Vec<Stage>> {
    let stages = StageLoader::new()
        .load_file(file)
        .with_context(|| format!("Failed to load stages from {}", file.display()))?;

    tracing::debug!(file = %file.display(), stages_count = stages.len(), "Loaded stages");

    match format {
        OutputFormat::Json => print_json(&stages)?,
        OutputFormat::Text => print!("{}", describe(&stages)),
    }
    Ok(stages)
}

/// One line per stage listing its steps
pub fn describe(stages: &[Stage]) -> String {
    let mut out = String::new();
    for (i, stage) in stages.iter().enumerate() {
        let mut steps = Vec::new();
        if stage.command.is_some() {
            steps.push("command".to_string());
        }
        if stage.shell.is_some() {
            steps.push("shell".to_string());
        }
        if let Some(manifest) = &stage.manifest {
            match stage.patches.len() {
                0 => steps.push(format!("manifest {manifest}")),
                n => steps.push(format!("manifest {manifest} ({n} patches)")),
            }
        }
        if !stage.wait_conditions.is_empty() {
            steps.push(format!("{} wait conditions", stage.wait_conditions.len()));
        }
        if steps.is_empty() {
            steps.push("nothing to do".to_string());
        }
        out.push_str(&format!("{:>3}. {}: {}\n", i + 1, stage.name, steps.join(", ")));
    }
    out
}
