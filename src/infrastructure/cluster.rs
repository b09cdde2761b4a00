//! Cluster CLI adapter
//!
//! Builds the `oc`/`kubectl` invocations used by the apply and wait engines
//! and parses what they print.

use crate::executor::CommandSpec;
use crate::pipeline::{PipelineResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Command builder for an `oc` compatible CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCli {
    program: String,
}

impl ClusterCli {
    /// Creates a builder for `program` (usually `oc` or `kubectl`)
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The CLI program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// `<cli> apply -f <file>`
    #[must_use]
    pub fn apply_file(&self, file: &Path) -> CommandSpec {
        CommandSpec::new(&self.program).args(["apply", "-f"]).arg(file.to_string_lossy())
    }

    /// `<cli> apply -k <source>`
    #[must_use]
    pub fn apply_kustomization(&self, source: &str) -> CommandSpec {
        CommandSpec::new(&self.program).args(["apply", "-k", source])
    }

    /// `<cli> get pods -n <namespace> -l <selector> -o json`
    #[must_use]
    pub fn get_pods(&self, namespace: &str, selector: &LabelSelector) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(["get", "pods", "-n", namespace, "-l"])
            .arg(selector.to_string())
            .args(["-o", "json"])
    }
}

impl Default for ClusterCli {
    fn default() -> Self {
        Self::new("oc")
    }
}

/// Equality-based label selector, rendered as `k=v,k2=v2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    labels: Vec<(String, String)>,
}

impl LabelSelector {
    /// Builds a selector, keeping the given label order
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptySelector`] when no labels are given.
    pub fn new<I, K, V>(labels: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let labels: Vec<(String, String)> = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if labels.is_empty() {
            return Err(ValidationError::EmptySelector);
        }
        Ok(Self { labels })
    }

    /// Parses `k=v,k2=v2`
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptySelector`] for an empty string, or
    /// [`ValidationError::InvalidCommand`] for a term without `=`.
    pub fn parse(selector: &str) -> Result<Self, ValidationError> {
        let labels = selector
            .split(',')
            .filter(|term| !term.trim().is_empty())
            .map(|term| {
                term.split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .ok_or_else(|| ValidationError::InvalidCommand {
                        command: selector.to_string(),
                        reason: format!("label '{term}' is not of the form key=value"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(labels)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Lifecycle phase of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted, not all containers running yet
    Pending,
    /// Bound to a node, containers running
    Running,
    /// All containers terminated successfully
    Succeeded,
    /// At least one container terminated in failure
    Failed,
    /// Missing or unrecognised phase
    #[default]
    #[serde(other)]
    Unknown,
}

impl PodPhase {
    /// Returns true for `Succeeded` and `Failed`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// Name and phase of one pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodStatus {
    /// Pod name, `unknown` when absent
    pub name: String,
    /// Pod phase
    pub phase: PodPhase,
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Deserialize)]
struct PodItem {
    #[serde(default)]
    metadata: PodMetadata,
    #[serde(default)]
    status: PodItemStatus,
}

#[derive(Deserialize, Default)]
struct PodMetadata {
    name: Option<String>,
}

#[derive(Deserialize, Default)]
struct PodItemStatus {
    #[serde(default)]
    phase: PodPhase,
}

/// Parses the JSON printed by `get pods -o json`
///
/// # Errors
///
/// Returns [`crate::pipeline::PipelineError::Json`] if the output is not a
/// pod list.
pub fn parse_pod_list(json: &str) -> PipelineResult<Vec<PodStatus>> {
    let list: PodList = serde_json::from_str(json)?;
    Ok(list
        .items
        .into_iter()
        .map(|item| PodStatus {
            name: item.metadata.name.unwrap_or_else(|| "unknown".to_string()),
            phase: item.status.phase,
        })
        .collect())
}
