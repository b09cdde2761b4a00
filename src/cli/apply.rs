//! `hotloop apply` - Apply one manifest or kustomization
//!
//! Uses the same retry, idempotence and artifact rules as `hotloop run`.
//!
//! ## Usage
//!
//! ```bash
//! hotloop apply manifests/operator.yaml
//! hotloop apply -k manifests/overlays/prod --timeout 120
//! ```

use super::{OutputFormat, print_json};
use anyhow::{Context, Result};
use hotloop::executor::{ApplyRequest, ApplyResult, ApplyTarget, ExecutionContext, ManifestApplier};
use hotloop::infrastructure::{ClusterCli, Config};
use std::path::PathBuf;
use std::sync::Arc;

/// Picks the apply target from the positional file or `--kustomize`
pub fn target(file: Option<PathBuf>, kustomize: Option<String>) -> Result<ApplyTarget> {
    match (file, kustomize) {
        (_, Some(source)) => {
            ApplyTarget::kustomization(source).context("Invalid kustomization")
        }
        (Some(file), None) => Ok(ApplyTarget::File(file)),
        (None, None) => anyhow::bail!("Nothing to apply: pass a manifest file or --kustomize"),
    }
}

/// Applies `target` and prints the outcome
pub fn apply_target(
    config: &Config,
    context: ExecutionContext,
    target: ApplyTarget,
    format: OutputFormat,
) -> Result<ApplyResult> {
    let classifier = Arc::new(config.classifier()?);
    let applier = ManifestApplier::new(context, ClusterCli::new(&config.cli), classifier, config.apply_policy());

    let request = ApplyRequest::new(target.clone(), config.apply_timeout());
    let result = applier
        .apply(&request)
        .with_context(|| format!("Failed to apply {target}"))?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            println!("{target}: {}", result.state);
            if result.retry_count > 0 {
                println!(
                    "  {} retries in {:.1}s",
                    result.retry_count,
                    result.retry_time.as_secs_f64()
                );
            }
            if let Some(artifact) = &result.artifact {
                println!("  artifact: {}", artifact.display());
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_target_selection() {
        let file = target(Some(PathBuf::from("a.yaml")), None).unwrap();
        assert_eq!(file, ApplyTarget::File(PathBuf::from("a.yaml")));

        let remote = target(None, Some("https://example.com/overlay".to_string())).unwrap();
        assert!(matches!(remote, ApplyTarget::Kustomization(_)));

        assert!(target(None, None).is_err());
    }

    #[test]
    fn test_kustomize_directory_is_validated() {
        let dir = TempDir::new().unwrap();
        let err = target(None, Some(dir.path().display().to_string())).unwrap_err();
        assert!(format!("{err:#}").contains("kustomization"));
    }

    #[test]
    fn test_missing_manifest_fails_before_running() {
        let err = apply_target(
            &Config::default(),
            ExecutionContext::system(),
            ApplyTarget::File(PathBuf::from("/nonexistent/manifest.yaml")),
            OutputFormat::Text,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to apply"));
    }
}
