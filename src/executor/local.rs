//! Sequential stage execution
//!
//! For each stage, in order: delegated `command`, delegated `shell`, the
//! manifest (patched, then applied), then every wait condition. The first
//! failing stage stops the run.

use super::apply::{ApplyRequest, ApplyResult, ApplyTarget, ManifestApplier};
use super::traits::{CommandSpec, ExecutionContext};
use super::wait::{CommandWait, WaitEngine, WaitOutcome};
use crate::infrastructure::{ClusterCli, Config, MetricsCollector, RetryMetrics};
use crate::patch::{PatchResult, YamlPatcher};
use crate::pipeline::{PipelineError, PipelineResult, Stage, StageAction, ValidationError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executes the `command` and `shell` steps of a stage
#[allow(clippy::missing_errors_doc)]
pub trait StepDelegate: Send + Sync {
    /// Runs a command line without a shell
    fn run_command(&self, stage: &str, command: &str) -> PipelineResult<()>;

    /// Runs a script through a shell
    fn run_shell(&self, stage: &str, script: &str) -> PipelineResult<()>;
}

/// Runs delegated steps as local processes
#[derive(Debug, Clone)]
pub struct LocalDelegate {
    context: ExecutionContext,
    shell: String,
    cwd: Option<PathBuf>,
}

impl LocalDelegate {
    /// Creates a delegate using `sh`
    #[must_use]
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            shell: "sh".to_string(),
            cwd: None,
        }
    }

    /// Sets the shell used for scripts
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Sets the working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn execute(&self, stage: &str, mut spec: CommandSpec) -> PipelineResult<()> {
        if let Some(cwd) = &self.cwd {
            spec = spec.with_cwd(cwd);
        }
        tracing::debug!(stage = %stage, command = %spec, "Running delegated step");

        let output = self.context.run(&spec)?;
        if output.cancelled {
            return Err(PipelineError::Cancelled(format!("running `{spec}`")));
        }
        if !output.stdout.is_empty() {
            tracing::info!(stage = %stage, "{}", output.stdout.trim_end());
        }
        if output.rc != 0 {
            return Err(PipelineError::CommandFailed {
                code: output.rc,
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

impl StepDelegate for LocalDelegate {
    fn run_command(&self, stage: &str, command: &str) -> PipelineResult<()> {
        self.execute(stage, CommandSpec::parse(command)?)
    }

    fn run_shell(&self, stage: &str, script: &str) -> PipelineResult<()> {
        self.execute(stage, CommandSpec::new(&self.shell).args(["-c", script]))
    }
}

/// Configuration for stage execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Directory holding the rendered manifests
    pub manifests_dir: PathBuf,
    /// Template suffix stripped from manifest names
    pub template_extension: String,
    /// Per-attempt apply timeout
    pub apply_timeout: Duration,
    /// Retries for each wait condition
    pub wait_retries: u32,
    /// Pause between wait attempts
    pub wait_delay: Duration,
    /// Per-attempt wait timeout
    pub wait_timeout: Option<Duration>,
}

impl From<&Config> for ExecutorConfig {
    fn from(config: &Config) -> Self {
        Self {
            manifests_dir: config.manifests_dir.clone(),
            template_extension: config.template_extension.clone(),
            apply_timeout: config.apply_timeout(),
            wait_retries: config.wait.retries,
            wait_delay: Duration::from_secs(config.wait.delay_secs),
            wait_timeout: config.wait.command_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// What happened while executing one stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// Stage name
    pub stage: String,
    /// Work performed, in order
    pub actions: Vec<StageAction>,
    /// Whether anything was changed
    pub changed: bool,
    /// Patch outcomes
    pub patches: Vec<PatchResult>,
    /// Apply outcome
    pub apply: Option<ApplyResult>,
    /// Wait outcomes
    pub waits: Vec<WaitOutcome>,
}

impl StageReport {
    fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            actions: Vec::new(),
            changed: false,
            patches: Vec::new(),
            apply: None,
            waits: Vec::new(),
        }
    }
}

/// Executor that runs loaded stages one after another
pub struct StageExecutor {
    config: ExecutorConfig,
    patcher: YamlPatcher,
    applier: ManifestApplier,
    waits: WaitEngine,
    delegate: Arc<dyn StepDelegate>,
    metrics: MetricsCollector,
}

impl StageExecutor {
    /// Creates an executor from its parts
    #[must_use]
    pub fn new(
        config: ExecutorConfig,
        applier: ManifestApplier,
        waits: WaitEngine,
        delegate: Arc<dyn StepDelegate>,
    ) -> Self {
        Self {
            config,
            patcher: YamlPatcher::new(),
            applier,
            waits,
            delegate,
            metrics: MetricsCollector::new(),
        }
    }

    /// Wires an executor from application configuration
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for a bad extra pattern.
    pub fn from_config(
        config: &Config,
        context: ExecutionContext,
        delegate: Arc<dyn StepDelegate>,
    ) -> Result<Self, ValidationError> {
        let classifier = Arc::new(config.classifier()?);
        let cli = ClusterCli::new(&config.cli);
        let applier = ManifestApplier::new(
            context.clone(),
            cli.clone(),
            Arc::clone(&classifier),
            config.apply_policy(),
        );
        let waits = WaitEngine::new(context, cli, classifier);
        Ok(Self::new(ExecutorConfig::from(config), applier, waits, delegate))
    }

    /// Shares a metrics collector with the caller
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Collected retry metrics
    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Executes stages in order, stopping at the first failure
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StageFailed`] naming the failing stage.
    pub fn execute(&self, stages: &[Stage]) -> PipelineResult<Vec<StageReport>> {
        tracing::info!(
            run_id = %self.metrics.run_id(),
            stages_count = stages.len(),
            "Starting pipeline execution"
        );

        let mut reports = Vec::with_capacity(stages.len());
        for stage in stages {
            match self.execute_stage(stage) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(stage = %stage.name, error = %e, "Stage failed, stopping pipeline");
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }

    /// Executes one stage
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StageFailed`] wrapping the first failing step.
    pub fn execute_stage(&self, stage: &Stage) -> PipelineResult<StageReport> {
        self.run_stage(stage).map_err(|e| e.in_stage(&stage.name))
    }

    /// Resolves a stage's `manifest` to what will be applied
    ///
    /// The template suffix is stripped and the result is looked up under the
    /// manifests directory; a directory there is applied as a kustomization.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidKustomization`] for a directory
    /// without a kustomization file.
    pub fn resolve_manifest(&self, manifest: &str) -> Result<(ApplyTarget, StageAction), ValidationError> {
        let extension = self.config.template_extension.as_str();
        let (relative, action) = match manifest.strip_suffix(extension) {
            Some(stripped) if !extension.is_empty() => (stripped, StageAction::TemplateManifest),
            _ => (manifest, StageAction::StaticManifest),
        };

        let dest = self.config.manifests_dir.join(relative);
        if dest.is_dir() {
            let source = dest.to_string_lossy().into_owned();
            return Ok((ApplyTarget::kustomization(source)?, StageAction::Kustomization));
        }
        Ok((ApplyTarget::File(dest), action))
    }

    fn run_stage(&self, stage: &Stage) -> PipelineResult<StageReport> {
        let start = Instant::now();
        let mut report = StageReport::new(&stage.name);
        tracing::info!(stage = %stage.name, "Executing stage");

        if let Some(command) = &stage.command {
            self.delegate.run_command(&stage.name, command)?;
            report.actions.push(StageAction::Command);
            report.changed = true;
        }

        if let Some(script) = &stage.shell {
            self.delegate.run_shell(&stage.name, script)?;
            report.actions.push(StageAction::Shell);
            report.changed = true;
        }

        if let Some(manifest) = &stage.manifest {
            self.process_manifest(stage, manifest, &mut report)?;
        } else if !stage.patches.is_empty() {
            tracing::warn!(stage = %stage.name, "Stage has patches but no manifest; ignoring them");
        }

        for condition in &stage.wait_conditions {
            let wait = CommandWait::new(condition)
                .with_retries(self.config.wait_retries)
                .with_delay(self.config.wait_delay)
                .with_timeout(self.config.wait_timeout);
            report.waits.push(self.waits.wait_command(&wait)?);
        }
        if !report.waits.is_empty() {
            report.actions.push(StageAction::Wait);
        }

        if report.actions.is_empty() {
            report.actions.push(StageAction::NoAction);
        }

        tracing::info!(
            stage = %stage.name,
            changed = report.changed,
            duration_ms = start.elapsed().as_millis(),
            "Stage completed"
        );
        Ok(report)
    }

    fn process_manifest(&self, stage: &Stage, manifest: &str, report: &mut StageReport) -> PipelineResult<()> {
        let (target, action) = self.resolve_manifest(manifest)?;

        match &target {
            ApplyTarget::File(file) => {
                report.patches = self.patcher.apply_patches(file, &stage.patches)?;
            }
            ApplyTarget::Kustomization(_) if !stage.patches.is_empty() => {
                return Err(ValidationError::InvalidStage {
                    stage: stage.name.clone(),
                    reason: "patches cannot be applied to a kustomization directory".to_string(),
                }
                .into());
            }
            ApplyTarget::Kustomization(_) => {}
        }

        let result = self
            .applier
            .apply(&ApplyRequest::new(target.clone(), self.config.apply_timeout))?;

        if result.retry_count > 0 {
            let resource = match &target {
                ApplyTarget::File(file) => file.display().to_string(),
                ApplyTarget::Kustomization(source) => source.clone(),
            };
            self.metrics.record(RetryMetrics {
                stage: stage.name.clone(),
                resource,
                retry_count: result.retry_count,
                retry_time: result.retry_time,
            });
        }

        report.changed |= result.changed;
        report.actions.push(action);
        report.apply = Some(result);
        Ok(())
    }
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("config", &self.config)
            .field("run_id", &self.metrics.run_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::apply::{ApplyPolicy, ApplyState};
    use crate::executor::classify::ErrorClassifier;
    use crate::executor::testing::{FakeClock, REFUSED, ScriptedRunner, failed, ok};
    use crate::executor::traits::CommandOutput;
    use crate::pipeline::Patch;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingDelegate {
        steps: Mutex<Vec<String>>,
        fail: bool,
    }

    impl StepDelegate for RecordingDelegate {
        fn run_command(&self, stage: &str, command: &str) -> PipelineResult<()> {
            self.steps.lock().push(format!("{stage}: command {command}"));
            if self.fail {
                return Err(PipelineError::CommandFailed {
                    code: 2,
                    stderr: "boom".to_string(),
                });
            }
            Ok(())
        }

        fn run_shell(&self, stage: &str, script: &str) -> PipelineResult<()> {
            self.steps.lock().push(format!("{stage}: shell {script}"));
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        runner: Arc<ScriptedRunner>,
        delegate: Arc<RecordingDelegate>,
        executor: StageExecutor,
    }

    fn harness(outputs: Vec<CommandOutput>, delegate: RecordingDelegate) -> Harness {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(outputs));
        let context = ExecutionContext::new(runner.clone(), Arc::new(FakeClock::new()));
        let classifier = Arc::new(ErrorClassifier::new());
        let applier = ManifestApplier::new(
            context.clone(),
            ClusterCli::default(),
            Arc::clone(&classifier),
            ApplyPolicy::default(),
        );
        let waits = WaitEngine::new(context, ClusterCli::default(), classifier);
        let config = ExecutorConfig {
            manifests_dir: dir.path().to_path_buf(),
            wait_retries: 2,
            ..ExecutorConfig::default()
        };
        let delegate = Arc::new(delegate);
        let executor = StageExecutor::new(config, applier, waits, delegate.clone());
        Harness {
            dir,
            runner,
            delegate,
            executor,
        }
    }

    #[test]
    fn test_delegated_steps_run_in_order() {
        let h = harness(vec![], RecordingDelegate::default());
        let stage = Stage::new("prepare")
            .with_command("make crds")
            .with_shell("echo ready");

        let report = h.executor.execute_stage(&stage).unwrap();

        assert_eq!(report.actions, vec![StageAction::Command, StageAction::Shell]);
        assert_eq!(
            *h.delegate.steps.lock(),
            vec!["prepare: command make crds", "prepare: shell echo ready"]
        );
    }

    #[test]
    fn test_template_manifest_is_patched_then_applied() {
        let h = harness(vec![ok("deployment.apps/x configured")], RecordingDelegate::default());
        std::fs::create_dir(h.dir.path().join("app")).unwrap();
        let dest = h.dir.path().join("app/deploy.yaml");
        std::fs::write(&dest, "spec:\n  replicas: 1\n").unwrap();

        let stage = Stage::new("deploy")
            .with_manifest("app/deploy.yaml.j2")
            .with_patch(Patch::new("spec.replicas", 3));
        let report = h.executor.execute_stage(&stage).unwrap();

        assert_eq!(report.actions, vec![StageAction::TemplateManifest]);
        assert!(report.changed);
        assert!(report.patches[0].changed);
        assert_eq!(report.apply.as_ref().unwrap().state, ApplyState::Applied);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "spec:\n  replicas: 3\n");
        assert_eq!(h.runner.calls()[0].args[2], dest.to_string_lossy());
    }

    #[test]
    fn test_directory_manifest_is_a_kustomization() {
        let h = harness(vec![ok("")], RecordingDelegate::default());
        let overlay = h.dir.path().join("overlay");
        std::fs::create_dir(&overlay).unwrap();
        std::fs::write(overlay.join("kustomization.yaml"), "resources: []\n").unwrap();

        let report = h
            .executor
            .execute_stage(&Stage::new("overlay").with_manifest("overlay"))
            .unwrap();

        assert_eq!(report.actions, vec![StageAction::Kustomization]);
        assert_eq!(h.runner.calls()[0].args[1], "-k");

        let err = h
            .executor
            .execute_stage(&Stage::new("bad").with_manifest("overlay").with_patch(Patch::new("a", 1)))
            .unwrap_err();
        assert!(err.to_string().contains("kustomization directory"));
    }

    #[test]
    fn test_retries_are_recorded_as_metrics() {
        let h = harness(vec![failed(1, REFUSED), ok("")], RecordingDelegate::default());
        std::fs::write(h.dir.path().join("cm.yaml"), "kind: ConfigMap\n").unwrap();

        h.executor
            .execute_stage(&Stage::new("config").with_manifest("cm.yaml"))
            .unwrap();

        let records = h.executor.metrics().for_stage("config");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].retry_count, 1);
        assert!(records[0].resource.ends_with("cm.yaml"));
    }

    #[test]
    fn test_wait_conditions_use_configured_retries() {
        let h = harness(
            vec![failed(1, "error: no matching resources found"); 3],
            RecordingDelegate::default(),
        );
        let stage = Stage::new("wait").with_wait_condition("oc wait --for=condition=Ready pod -l app=x");

        let err = h.executor.execute_stage(&stage).unwrap_err();

        assert_eq!(h.runner.call_count(), 3);
        assert!(matches!(
            &err,
            PipelineError::StageFailed { stage, error } if stage == "wait"
                && matches!(**error, PipelineError::TransientCluster(_))
        ));
    }

    #[test]
    fn test_wait_action_reported() {
        let h = harness(vec![ok("condition met")], RecordingDelegate::default());
        let report = h
            .executor
            .execute_stage(&Stage::new("wait").with_wait_condition("oc wait pod/x --for=condition=Ready"))
            .unwrap();
        assert_eq!(report.actions, vec![StageAction::Wait]);
        assert_eq!(report.waits.len(), 1);
    }

    #[test]
    fn test_stage_without_work_is_no_action() {
        let h = harness(vec![], RecordingDelegate::default());
        let report = h.executor.execute_stage(&Stage::new("docs only")).unwrap();
        assert_eq!(report.actions, vec![StageAction::NoAction]);
        assert!(!report.changed);
    }

    #[test]
    fn test_first_failure_stops_the_run() {
        let delegate = RecordingDelegate {
            fail: true,
            ..RecordingDelegate::default()
        };
        let h = harness(vec![], delegate);
        let stages = vec![
            Stage::new("first").with_command("false"),
            Stage::new("second").with_shell("echo never"),
        ];

        let err = h.executor.execute(&stages).unwrap_err();

        assert!(err.to_string().starts_with("Stage 'first' failed"));
        assert_eq!(h.delegate.steps.lock().len(), 1);
    }

    #[test]
    fn test_resolve_static_manifest() {
        let h = harness(vec![], RecordingDelegate::default());
        let (target, action) = h.executor.resolve_manifest("crds/foo.yaml").unwrap();
        assert_eq!(action, StageAction::StaticManifest);
        assert_eq!(target, ApplyTarget::File(h.dir.path().join("crds/foo.yaml")));
    }

    #[cfg(unix)]
    #[test]
    fn test_local_delegate_reports_failures() {
        let delegate = LocalDelegate::new(ExecutionContext::system());
        assert!(delegate.run_shell("s", "exit 0").is_ok());

        let err = delegate.run_shell("s", "echo bad >&2; exit 4").unwrap_err();
        assert_eq!(
            err,
            PipelineError::CommandFailed {
                code: 4,
                stderr: "bad\n".to_string()
            }
        );

        assert!(delegate.run_command("s", "true").is_ok());
    }
}
