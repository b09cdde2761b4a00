//! `hotloop run` - Execute a stage file
//!
//! Stages run in order. `command` and `shell` steps run locally; manifests
//! are patched and applied; wait conditions are retried. The first failing
//! stage stops the run. Retry metrics are written even when the run fails.
//!
//! ## Usage
//!
//! ```bash
//! hotloop run stages.yaml --manifests-dir build/manifests
//! hotloop run stages.yaml --metrics metrics.json
//! ```

use super::{OutputFormat, print_json};
use anyhow::{Context, Result};
use hotloop::executor::{ExecutionContext, LocalDelegate, StageExecutor, StageReport};
use hotloop::infrastructure::{Config, RunSummary};
use hotloop::pipeline::StageLoader;
use std::path::Path;
use std::sync::Arc;

/// Loads and executes `file`
pub fn run_stages(
    config: &Config,
    context: ExecutionContext,
    file: &Path,
    metrics_path: Option<&Path>,
    format: OutputFormat,
) -> Result<Vec<StageReport>> {
    let stages = StageLoader::new()
        .load_file(file)
        .with_context(|| format!("Failed to load stages from {}", file.display()))?;

    let delegate = Arc::new(LocalDelegate::new(context.clone()));
    let executor = StageExecutor::from_config(config, context, delegate)?;

    let outcome = executor.execute(&stages);
    let summary = executor.metrics().summary();

    if let Some(path) = metrics_path {
        save_metrics(&summary, path)?;
    }

    let reports = outcome.with_context(|| format!("Run of {} failed", file.display()))?;

    match format {
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Text => {
            for report in &reports {
                let actions: Vec<String> = report.actions.iter().map(ToString::to_string).collect();
                let status = if report.changed { "changed" } else { "ok" };
                println!("{}: {status} [{}]", report.stage, actions.join(", "));
            }
            if summary.retried_applies > 0 {
                println!(
                    "{} applies needed {} retries ({:.1}s)",
                    summary.retried_applies,
                    summary.total_retries,
                    summary.total_retry_time.as_secs_f64()
                );
            }
        }
    }
    Ok(reports)
}

/// Writes the run summary as JSON
pub fn save_metrics(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize metrics")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write metrics to: {}", path.display()))?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_stages(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
        let path = dir.path().join("stages.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn test_run_local_steps() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let stages = write_stages(
            &dir,
            &format!(
                "- name: touch\n  shell: echo done > {}\n- name: check\n  command: test -f {}\n",
                marker.display(),
                marker.display()
            ),
        );
        let metrics = dir.path().join("metrics.json");

        let reports = run_stages(
            &Config::default(),
            ExecutionContext::system(),
            &stages,
            Some(&metrics),
            OutputFormat::Text,
        )
        .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(marker.exists());
        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&metrics).unwrap()).unwrap();
        assert_eq!(summary["total_retries"], 0);
    }

    #[test]
    fn test_run_stops_at_failing_stage() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("never");
        let stages = write_stages(
            &dir,
            &format!(
                "- name: broken\n  shell: exit 3\n- name: after\n  shell: touch {}\n",
                marker.display()
            ),
        );

        let err = run_stages(
            &Config::default(),
            ExecutionContext::system(),
            &stages,
            None,
            OutputFormat::Json,
        )
        .unwrap_err();

        assert!(format!("{err:#}").contains("Stage 'broken' failed"));
        assert!(!marker.exists());
    }
}
