//! Manifest apply state machine
//!
//! ```text
//! pending ──► applying ──► applied
//!    │           │  ▲
//!    │           ▼  │ (transient, delay ≤ ceiling)
//!    │        retrying
//!    │           │
//!    │           ▼
//!    │         failed
//!    └──► skipped (file identical to its last applied copy)
//! ```

use super::artifacts::{ArtifactMode, ArtifactStore, Artifacts, CommandLog, timestamp};
use super::backoff::Backoff;
use super::classify::{ErrorClassifier, ErrorContext};
use super::traits::{CommandOutput, CommandSpec, ExecutionContext};
use crate::infrastructure::ClusterCli;
use crate::pipeline::{FailureReport, PipelineError, PipelineResult, ValidationError};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const KUSTOMIZATION_FILES: [&str; 3] = ["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// What gets applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyTarget {
    /// A manifest file, applied with `apply -f`
    File(PathBuf),
    /// A kustomization directory or URL, applied with `apply -k`
    Kustomization(String),
}

impl ApplyTarget {
    /// Targets a manifest file
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Targets a kustomization
    ///
    /// Local directories must exist and contain a kustomization file. Remote
    /// `http(s)` sources are passed through unchecked.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidKustomization`] for a bad local
    /// directory.
    pub fn kustomization(source: impl Into<String>) -> Result<Self, ValidationError> {
        let source = source.into();
        if !is_remote(&source) {
            validate_kustomization_dir(Path::new(&source))?;
        }
        Ok(Self::Kustomization(source))
    }
}

impl fmt::Display for ApplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "manifest {}", path.display()),
            Self::Kustomization(source) => write!(f, "kustomization {source}"),
        }
    }
}

fn is_remote(source: &str) -> bool {
    url::Url::parse(source).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

fn validate_kustomization_dir(directory: &Path) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidKustomization {
        directory: directory.to_path_buf(),
        reason,
    };

    if !directory.exists() {
        return Err(invalid("directory does not exist".to_string()));
    }
    if !directory.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    if !KUSTOMIZATION_FILES
        .iter()
        .any(|name| directory.join(name).is_file())
    {
        return Err(invalid(format!(
            "no kustomization file found, expected one of: {}",
            KUSTOMIZATION_FILES.join(", ")
        )));
    }
    Ok(())
}

/// Lifecycle state of one apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyState {
    /// The file matched its last applied copy; nothing ran
    SkippedNoDiff,
    /// A command attempt is in flight
    Applying,
    /// Waiting before the next attempt
    Retrying,
    /// The cluster accepted the target
    Applied,
    /// Every attempt failed
    Failed,
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::SkippedNoDiff => "skipped_no_diff",
            Self::Applying => "applying",
            Self::Retrying => "retrying",
            Self::Applied => "applied",
            Self::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// One apply invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    /// What to apply
    pub target: ApplyTarget,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl ApplyRequest {
    /// Creates a request
    #[must_use]
    pub fn new(target: ApplyTarget, timeout: Duration) -> Self {
        Self { target, timeout }
    }
}

/// Outcome of a successful or skipped apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyResult {
    /// Final state
    pub state: ApplyState,
    /// Whether anything was sent to the cluster
    pub changed: bool,
    /// Exit code of the last attempt
    pub rc: i32,
    /// Standard output of the last attempt
    pub stdout: String,
    /// Standard error of the last attempt
    pub stderr: String,
    /// Number of retries after the first attempt
    pub retry_count: u32,
    /// Time spent from the first attempt until success, when retries happened
    pub retry_time: Duration,
    /// Persisted manifest artifact
    pub artifact: Option<PathBuf>,
    /// Persisted log sidecar
    pub log: Option<PathBuf>,
}

impl ApplyResult {
    fn skipped() -> Self {
        Self {
            state: ApplyState::SkippedNoDiff,
            changed: false,
            rc: 0,
            stdout: String::new(),
            stderr: String::new(),
            retry_count: 0,
            retry_time: Duration::ZERO,
            artifact: None,
            log: None,
        }
    }
}

/// Retry and artifact settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyPolicy {
    /// First backoff delay
    pub initial_retry_delay: Duration,
    /// Ceiling for the backoff, as a multiple of the first delay
    pub max_delay_multiplier: u32,
    /// What to do with the manifest after the outcome is known
    pub artifact_mode: ArtifactMode,
}

impl Default for ApplyPolicy {
    fn default() -> Self {
        Self {
            initial_retry_delay: Duration::from_secs(5),
            max_delay_multiplier: 12,
            artifact_mode: ArtifactMode::default(),
        }
    }
}

enum Terminal {
    Applied,
    Fatal,
    Exhausted,
    Cancelled,
}

/// Applies manifests and kustomizations with retry and bookkeeping
#[derive(Debug, Clone)]
pub struct ManifestApplier {
    context: ExecutionContext,
    cli: ClusterCli,
    classifier: Arc<ErrorClassifier>,
    policy: ApplyPolicy,
    artifacts: ArtifactStore,
}

impl ManifestApplier {
    /// Creates an applier
    #[must_use]
    pub fn new(
        context: ExecutionContext,
        cli: ClusterCli,
        classifier: Arc<ErrorClassifier>,
        policy: ApplyPolicy,
    ) -> Self {
        Self {
            context,
            cli,
            classifier,
            artifacts: ArtifactStore::new(policy.artifact_mode),
            policy,
        }
    }

    /// Drives one request to `Applied`, `SkippedNoDiff` or an error
    ///
    /// # Errors
    ///
    /// - [`PipelineError::TransientCluster`] once the backoff ceiling is hit
    /// - [`PipelineError::Timeout`] if the last attempt was killed
    /// - [`PipelineError::FatalCluster`] for non-retryable failures
    /// - [`PipelineError::Cancelled`] if cancellation was requested
    ///
    /// Failed file targets are moved aside before the error is returned.
    pub fn apply(&self, request: &ApplyRequest) -> PipelineResult<ApplyResult> {
        let target = &request.target;

        if let ApplyTarget::File(file) = target {
            if !file.is_file() {
                return Err(PipelineError::Io(format!(
                    "Manifest {} does not exist",
                    file.display()
                )));
            }
            if self.artifacts.is_unchanged(file)? {
                tracing::info!(
                    file = %file.display(),
                    "Manifest unchanged since last apply, skipping"
                );
                return Ok(ApplyResult::skipped());
            }
        }

        let spec = self.command_for(target).with_timeout(request.timeout);
        let command = spec.to_string();
        let stamp = timestamp();
        let start = self.context.now();
        let mut backoff = Backoff::new(
            self.policy.initial_retry_delay,
            self.policy.max_delay_multiplier,
        );
        let mut retry_count = 0u32;

        tracing::info!(
            resource = %target,
            state = %ApplyState::Applying,
            command = %command,
            "Applying"
        );
        let mut output = self.context.run(&spec)?;

        let terminal = loop {
            if output.cancelled {
                break Terminal::Cancelled;
            }
            if output.is_success() {
                break Terminal::Applied;
            }
            if !self.classifier.is_retryable(ErrorContext::Apply, &output.stderr) {
                break Terminal::Fatal;
            }
            let Some(delay) = backoff.next() else {
                break Terminal::Exhausted;
            };

            retry_count += 1;
            tracing::warn!(
                resource = %target,
                state = %ApplyState::Retrying,
                attempt = retry_count,
                delay_secs = delay.as_secs(),
                rc = output.rc,
                "Transient error while applying, retrying"
            );
            if let ApplyTarget::File(file) = target {
                let log = command_log(&command, &output, request.timeout);
                self.artifacts.record_retry(file, &stamp, retry_count, &log)?;
            }

            self.context.sleep(delay);
            if self.context.is_cancelled() {
                break Terminal::Cancelled;
            }
            output = self.context.run(&spec)?;
        };

        let elapsed = self.context.now().saturating_duration_since(start);
        let log = command_log(&command, &output, request.timeout);

        if let Terminal::Applied = terminal {
            let saved = match target {
                ApplyTarget::File(file) => Some(self.artifacts.record_success(file, &log)?),
                ApplyTarget::Kustomization(_) => None,
            };
            tracing::info!(
                resource = %target,
                state = %ApplyState::Applied,
                retry_count,
                "Applied"
            );
            let (artifact, log) = split(saved);
            return Ok(ApplyResult {
                state: ApplyState::Applied,
                changed: true,
                rc: output.rc,
                stdout: output.stdout,
                stderr: output.stderr,
                retry_count,
                retry_time: if retry_count > 0 { elapsed } else { Duration::ZERO },
                artifact,
                log,
            });
        }

        let saved = match target {
            ApplyTarget::File(file) => Some(self.artifacts.record_failure(file, &stamp, &log)?),
            ApplyTarget::Kustomization(_) => None,
        };
        let (artifact, log) = split(saved);
        let report = FailureReport {
            command,
            rc: output.rc,
            stdout: output.stdout,
            stderr: output.stderr,
            attempts: retry_count + 1,
            elapsed,
            artifact,
            log,
        };
        tracing::error!(
            resource = %target,
            state = %ApplyState::Failed,
            attempts = report.attempts,
            rc = report.rc,
            "Apply failed"
        );

        Err(match terminal {
            Terminal::Cancelled => PipelineError::Cancelled(format!("applying {target} ({report})")),
            Terminal::Exhausted => PipelineError::TransientCluster(Box::new(report)),
            Terminal::Fatal if output.timed_out => PipelineError::Timeout {
                what: format!("Apply of {target}"),
                duration: request.timeout,
                report: Some(Box::new(report)),
            },
            Terminal::Fatal | Terminal::Applied => PipelineError::FatalCluster(Box::new(report)),
        })
    }

    fn command_for(&self, target: &ApplyTarget) -> CommandSpec {
        match target {
            ApplyTarget::File(file) => self.cli.apply_file(file),
            ApplyTarget::Kustomization(source) => self.cli.apply_kustomization(source),
        }
    }
}

fn command_log<'a>(command: &'a str, output: &'a CommandOutput, timeout: Duration) -> CommandLog<'a> {
    CommandLog {
        command,
        rc: output.rc,
        timeout,
        stdout: &output.stdout,
        stderr: &output.stderr,
    }
}

fn split(saved: Option<Artifacts>) -> (Option<PathBuf>, Option<PathBuf>) {
    match saved {
        Some(Artifacts { manifest, log }) => (manifest, Some(log)),
        None => (None, None),
    }
}
