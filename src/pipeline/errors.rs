//! Error types for the deployment pipeline

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading, patching, applying or waiting
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Validation failed with specified reason
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A patch path does not resolve, or indexes out of range
    #[error("Invalid YAML path '{path}': {reason}")]
    Path {
        /// The dotted path expression.
        path: String,
        /// What went wrong while walking it.
        reason: String,
    },

    /// No document in a file satisfied a patch's where clauses
    #[error(
        "Error replacing value, where conditions {clauses} not in YAML {}. Where results: {results:?}",
        .file.display()
    )]
    WhereNotMatched {
        /// The patched file.
        file: PathBuf,
        /// Rendering of the where clauses.
        clauses: String,
        /// Per-document evaluation, in document order.
        results: Vec<bool>,
    },

    /// A transient cluster error persisted after every retry
    #[error("Transient cluster error persisted: {0}")]
    TransientCluster(Box<FailureReport>),

    /// A cluster command failed with a non-retryable error
    #[error("Cluster command failed: {0}")]
    FatalCluster(Box<FailureReport>),

    /// A subprocess or poll loop exceeded its time budget
    #[error("{what} timed out after {}s{}", .duration.as_secs(), report_suffix(.report.as_deref()))]
    Timeout {
        /// What was being waited on.
        what: String,
        /// The exhausted budget.
        duration: Duration,
        /// Partial output of the last command, when there was one.
        report: Option<Box<FailureReport>>,
    },

    /// A resource-phase wait matched more than one resource
    #[error(
        "Label selector {selector} matches multiple pods ({}): {}. Use a more specific label selector to match exactly one pod",
        .pods.len(),
        .pods.join(", ")
    )]
    AmbiguousSelector {
        /// The label selector used.
        selector: String,
        /// Every matching pod name.
        pods: Vec<String>,
    },

    /// The awaited resource reached the `Failed` phase
    #[error("Pod {resource} failed after {attempts} polls")]
    ResourceFailed {
        /// Name of the resource.
        resource: String,
        /// Number of polls made.
        attempts: u32,
    },

    /// The run was cancelled at a subprocess boundary
    #[error("Cancelled while {0}")]
    Cancelled(String),

    /// A delegated command or shell step failed
    #[error("Command failed with exit code {code}: {stderr}")]
    CommandFailed {
        /// Exit code returned by the command.
        code: i32,
        /// Standard error output from the command.
        stderr: String,
    },

    /// Stage execution failed
    #[error("Stage '{stage}' failed: {error}")]
    StageFailed {
        /// Name of the stage that failed.
        stage: String,
        /// The underlying failure.
        #[source]
        error: Box<PipelineError>,
    },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),

    /// YAML could not be parsed or rendered
    #[error("YAML error: {0}")]
    Yaml(String),

    /// Cluster CLI output was not the expected JSON
    #[error("JSON error: {0}")]
    Json(String),
}

impl PipelineError {
    /// Wraps this error with the name of the stage it happened in
    #[must_use]
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            error: Box::new(self),
        }
    }

    /// Returns the failure report carried by cluster and timeout errors
    #[must_use]
    pub fn report(&self) -> Option<&FailureReport> {
        match self {
            Self::TransientCluster(report) | Self::FatalCluster(report) => Some(report),
            Self::Timeout { report, .. } => report.as_deref(),
            Self::StageFailed { error, .. } => error.report(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Everything known about a failed cluster command
///
/// Carries the artifact paths so a failed run can be diagnosed or resumed
/// without re-running the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureReport {
    /// The command line that was run.
    pub command: String,
    /// Exit code of the last attempt (`-1` when killed or never started).
    pub rc: i32,
    /// Standard output of the last attempt.
    pub stdout: String,
    /// Standard error of the last attempt.
    pub stderr: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// Wall-clock time spent across all attempts.
    pub elapsed: Duration,
    /// Where the failed manifest was moved, if any.
    pub artifact: Option<PathBuf>,
    /// Where the failure log was written, if any.
    pub log: Option<PathBuf>,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` exited with {} after {} attempt(s)",
            self.command, self.rc, self.attempts
        )?;
        if let Some(artifact) = &self.artifact {
            write!(f, ", saved to {}", artifact.display())?;
        }
        if let Some(log) = &self.log {
            write!(f, " with logs in {}", log.display())?;
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

fn report_suffix(report: Option<&FailureReport>) -> String {
    report.map(|r| format!(": {r}")).unwrap_or_default()
}

/// Validation errors for stages, patches and configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A value that must be a list was something else
    #[error("'{what}' must be a list, got {found}")]
    NotAList {
        /// Which value.
        what: String,
        /// The YAML kind that was found.
        found: String,
    },

    /// A stage entry is not a mapping
    #[error("All stages must be a mapping, got {found}")]
    NotAMapping {
        /// The YAML kind that was found.
        found: String,
    },

    /// A stage carries keys outside the allowed set
    #[error("Stage '{stage}' contains invalid keys: {}", .keys.join(", "))]
    UnknownKeys {
        /// Stage name, or a placeholder if unnamed.
        stage: String,
        /// The offending keys, sorted.
        keys: Vec<String>,
    },

    /// A stage has no name
    #[error("All stages must have a name, stage #{index} has none")]
    MissingName {
        /// Zero-based position of the stage in its listing.
        index: usize,
    },

    /// `run_conditions` is present but not a list
    #[error("'run_conditions' of stage '{stage}' must be a list, got {found}")]
    RunConditionsNotAList {
        /// Stage name.
        stage: String,
        /// The YAML kind that was found.
        found: String,
    },

    /// `wait_conditions` is present but not a list
    #[error("Wait conditions of stage '{stage}' must be a list, got {found}")]
    WaitConditionsNotAList {
        /// Stage name.
        stage: String,
        /// The YAML kind that was found.
        found: String,
    },

    /// A nested stage carries its own `stages`
    #[error("Nested stages cannot be nested, stage '{stage}'")]
    NestedTooDeep {
        /// Stage name.
        stage: String,
    },

    /// Nested `stages` is neither a list, a mapping nor a YAML string
    #[error("Nested stages must be a YAML string, list or mapping, got {found}")]
    InvalidNestedStages {
        /// The YAML kind that was found.
        found: String,
    },

    /// A stage body does not match the stage schema
    #[error("Stage '{stage}' is invalid: {reason}")]
    InvalidStage {
        /// Stage name.
        stage: String,
        /// Deserializer message.
        reason: String,
    },

    /// A patch value has an unsupported type
    #[error("Patch value for '{path}' must be a string, number, boolean, list or mapping, got {found}")]
    InvalidPatchValue {
        /// Patch path.
        path: String,
        /// The YAML kind that was found.
        found: String,
    },

    /// Where clauses are malformed
    #[error("Invalid where clause: {reason}")]
    InvalidWhere {
        /// What is wrong with it.
        reason: String,
    },

    /// A path expression is empty or has an empty segment
    #[error("Invalid path expression '{path}'")]
    InvalidPath {
        /// The offending expression.
        path: String,
    },

    /// A file that must be rewritten is read-only
    #[error("File {} is not writable", .file.display())]
    NotWritable {
        /// The file.
        file: PathBuf,
    },

    /// A kustomization source failed validation
    #[error("Invalid kustomization {}: {reason}", .directory.display())]
    InvalidKustomization {
        /// The directory.
        directory: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// A resource-phase wait was given no labels
    #[error("No labels provided")]
    EmptySelector,

    /// A wait command string could not be split into words
    #[error("Invalid command '{command}': {reason}")]
    InvalidCommand {
        /// The command string.
        command: String,
        /// Parser message.
        reason: String,
    },

    /// A configuration value is out of range
    #[error("Invalid configuration '{field}': {reason}")]
    InvalidConfig {
        /// Field name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ValidationError {
    /// Builds a [`ValidationError::NotWritable`] for `file`
    #[must_use]
    pub fn not_writable(file: &Path) -> Self {
        Self::NotWritable {
            file: file.to_path_buf(),
        }
    }
}
