//! Wait/poll engine
//!
//! Two modes:
//!
//! - **command**: run a command (typically `oc wait ...`) until it exits 0,
//!   retrying only on transient errors
//! - **resource phase**: poll the single pod matched by a label selector
//!   until it reaches `Succeeded` or `Failed`

use super::classify::{ErrorClassifier, ErrorContext};
use super::traits::{CommandOutput, CommandSpec, ExecutionContext};
use crate::infrastructure::{ClusterCli, LabelSelector, PodPhase, parse_pod_list};
use crate::pipeline::{FailureReport, PipelineError, PipelineResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A command to retry until it succeeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandWait {
    /// Command line, split into words without a shell
    pub command: String,
    /// Retries after the first attempt
    pub retries: u32,
    /// Pause between attempts
    pub delay: Duration,
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
}

impl CommandWait {
    /// Creates a wait with 50 retries 5 seconds apart
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            retries: 50,
            delay: Duration::from_secs(5),
            timeout: None,
        }
    }

    /// Sets the retry count
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the pause between attempts
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A pod to poll until it reaches a terminal phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseWait {
    /// Namespace to search
    pub namespace: String,
    /// Selector that must match exactly one pod
    pub selector: LabelSelector,
    /// Overall budget
    pub timeout: Duration,
    /// Pause between polls
    pub poll_interval: Duration,
}

impl PhaseWait {
    /// Creates a wait with a one hour budget polled every 10 seconds
    #[must_use]
    pub fn new(namespace: impl Into<String>, selector: LabelSelector) -> Self {
        Self {
            namespace: namespace.into(),
            selector,
            timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// How a wait ended successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStatus {
    /// The wait command exited 0
    ConditionMet,
    /// The pod reached `Succeeded`
    Succeeded,
}

/// Result of a successful wait
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitOutcome {
    /// How the wait ended
    pub status: WaitStatus,
    /// Commands or polls made
    pub attempts: u32,
    /// Time spent
    pub elapsed: Duration,
    /// Pod name, for resource-phase waits
    pub resource: Option<String>,
}

/// Runs waits against the cluster CLI
#[derive(Debug, Clone)]
pub struct WaitEngine {
    context: ExecutionContext,
    cli: ClusterCli,
    classifier: Arc<ErrorClassifier>,
}

impl WaitEngine {
    /// Creates an engine
    #[must_use]
    pub fn new(context: ExecutionContext, cli: ClusterCli, classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            context,
            cli,
            classifier,
        }
    }

    /// Retries `wait.command` until it succeeds
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Validation`] if the command line cannot be split
    /// - [`PipelineError::FatalCluster`] on the first non-retryable failure
    /// - [`PipelineError::Timeout`] if an attempt was killed by its timeout
    /// - [`PipelineError::TransientCluster`] once retries are exhausted
    /// - [`PipelineError::Cancelled`] if cancellation was requested
    pub fn wait_command(&self, wait: &CommandWait) -> PipelineResult<WaitOutcome> {
        let mut spec = CommandSpec::parse(&wait.command)?;
        spec.timeout = wait.timeout;
        let max_attempts = wait.retries.saturating_add(1);
        let start = self.context.now();

        tracing::info!(command = %wait.command, retries = wait.retries, "Waiting for condition");

        let mut attempt = 0;
        loop {
            attempt += 1;
            let output = self.context.run(&spec)?;
            if output.cancelled {
                return Err(PipelineError::Cancelled(format!("waiting on `{}`", wait.command)));
            }

            let elapsed = self.elapsed_since(start);
            if output.is_success() {
                tracing::info!(command = %wait.command, attempts = attempt, "Wait condition met");
                return Ok(WaitOutcome {
                    status: WaitStatus::ConditionMet,
                    attempts: attempt,
                    elapsed,
                    resource: None,
                });
            }

            let timed_out = output.timed_out;
            let retryable = self.classifier.is_retryable(ErrorContext::Wait, &output.stderr);
            let report = failure_report(&spec, output, attempt, elapsed);

            if !retryable {
                if timed_out {
                    return Err(PipelineError::Timeout {
                        what: format!("Wait command `{}`", wait.command),
                        duration: wait.timeout.unwrap_or_default(),
                        report: Some(Box::new(report)),
                    });
                }
                return Err(PipelineError::FatalCluster(Box::new(report)));
            }
            if attempt >= max_attempts {
                tracing::error!(command = %wait.command, attempts = attempt, "Wait retries exhausted");
                return Err(PipelineError::TransientCluster(Box::new(report)));
            }

            tracing::warn!(
                command = %wait.command,
                attempt,
                delay_secs = wait.delay.as_secs(),
                "Wait condition not met yet, retrying"
            );
            self.pause(wait.delay, &wait.command)?;
        }
    }

    /// Polls the pod matched by `wait.selector` until it succeeds or fails
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Timeout`] once `wait.timeout` has elapsed, or when a
    ///   query is killed for outliving it
    /// - [`PipelineError::AmbiguousSelector`] if several pods match
    /// - [`PipelineError::ResourceFailed`] if the pod reaches `Failed`
    /// - [`PipelineError::FatalCluster`] if the query fails non-transiently
    /// - [`PipelineError::Json`] if the query output is not a pod list
    /// - [`PipelineError::Cancelled`] if cancellation was requested
    pub fn wait_resource_phase(&self, wait: &PhaseWait) -> PipelineResult<WaitOutcome> {
        let spec = self.cli.get_pods(&wait.namespace, &wait.selector);
        let what = format!("waiting on pod {} in {}", wait.selector, wait.namespace);
        let start = self.context.now();

        tracing::info!(
            namespace = %wait.namespace,
            selector = %wait.selector,
            timeout_secs = wait.timeout.as_secs(),
            "Waiting for pod completion"
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let elapsed = self.elapsed_since(start);
            let Some(remaining) = wait.timeout.checked_sub(elapsed).filter(|r| !r.is_zero()) else {
                return Err(PipelineError::Timeout {
                    what: format!("Pod completion for {}", wait.selector),
                    duration: wait.timeout,
                    report: None,
                });
            };

            // The query may not outlive the overall budget.
            let query = spec.clone().with_timeout(remaining);
            let output = self.context.run(&query)?;
            if output.cancelled {
                return Err(PipelineError::Cancelled(what));
            }

            if output.timed_out {
                let report = failure_report(&query, output, attempt, self.elapsed_since(start));
                return Err(PipelineError::Timeout {
                    what: format!("Pod completion for {}", wait.selector),
                    duration: wait.timeout,
                    report: Some(Box::new(report)),
                });
            }

            if !output.is_success() {
                if !self.classifier.is_retryable(ErrorContext::Wait, &output.stderr) {
                    let report = failure_report(&query, output, attempt, elapsed);
                    return Err(PipelineError::FatalCluster(Box::new(report)));
                }
                tracing::warn!(
                    selector = %wait.selector,
                    attempt,
                    rc = output.rc,
                    "Pod query failed transiently"
                );
                self.pause(wait.poll_interval, &what)?;
                continue;
            }

            let pods = parse_pod_list(&output.stdout)?;
            match pods.as_slice() {
                [] => {
                    tracing::debug!(selector = %wait.selector, attempt, "No pods found yet");
                }
                [pod] => match pod.phase {
                    PodPhase::Succeeded => {
                        tracing::info!(pod = %pod.name, attempts = attempt, "Pod completed successfully");
                        return Ok(WaitOutcome {
                            status: WaitStatus::Succeeded,
                            attempts: attempt,
                            elapsed: self.elapsed_since(start),
                            resource: Some(pod.name.clone()),
                        });
                    }
                    PodPhase::Failed => {
                        return Err(PipelineError::ResourceFailed {
                            resource: pod.name.clone(),
                            attempts: attempt,
                        });
                    }
                    phase => {
                        tracing::debug!(pod = %pod.name, phase = %phase, attempt, "Pod not finished");
                    }
                },
                many => {
                    return Err(PipelineError::AmbiguousSelector {
                        selector: wait.selector.to_string(),
                        pods: many.iter().map(|pod| pod.name.clone()).collect(),
                    });
                }
            }

            self.pause(wait.poll_interval, &what)?;
        }
    }

    fn elapsed_since(&self, start: Instant) -> Duration {
        self.context.now().saturating_duration_since(start)
    }

    fn pause(&self, delay: Duration, what: &str) -> PipelineResult<()> {
        self.context.sleep(delay);
        if self.context.is_cancelled() {
            return Err(PipelineError::Cancelled(what.to_string()));
        }
        Ok(())
    }
}

fn failure_report(
    spec: &CommandSpec,
    output: CommandOutput,
    attempts: u32,
    elapsed: Duration,
) -> FailureReport {
    FailureReport {
        command: spec.to_string(),
        rc: output.rc,
        stdout: output.stdout,
        stderr: output.stderr,
        attempts,
        elapsed,
        artifact: None,
        log: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{FakeClock, REFUSED, ScriptedRunner, failed, ok, secs, timed_out};
    use crate::executor::traits::Clock;
    use pretty_assertions::assert_eq;

    fn setup(outputs: Vec<CommandOutput>) -> (WaitEngine, Arc<ScriptedRunner>, Arc<FakeClock>) {
        let runner = Arc::new(ScriptedRunner::new(outputs));
        let clock = Arc::new(FakeClock::new());
        let context = ExecutionContext::new(runner.clone(), clock.clone());
        let engine = WaitEngine::new(context, ClusterCli::default(), Arc::new(ErrorClassifier::new()));
        (engine, runner, clock)
    }

    fn pods(entries: &[(&str, &str)]) -> CommandOutput {
        let items: Vec<serde_json::Value> = entries
            .iter()
            .map(|(name, phase)| {
                serde_json::json!({
                    "metadata": {"name": name},
                    "status": {"phase": phase}
                })
            })
            .collect();
        ok(&serde_json::json!({ "items": items }).to_string())
    }

    fn phase_wait() -> PhaseWait {
        let selector = LabelSelector::new([("service", "tempest")]).unwrap();
        PhaseWait::new("openstack", selector)
    }

    const NO_MATCH: &str = "error: no matching resources found";

    #[test]
    fn test_command_succeeds_first_time() {
        let (engine, runner, clock) = setup(vec![ok("condition met")]);

        let outcome = engine
            .wait_command(&CommandWait::new("oc wait --for=condition=Ready pod -l app=x"))
            .unwrap();

        assert_eq!(outcome.status, WaitStatus::ConditionMet);
        assert_eq!(outcome.attempts, 1);
        assert!(clock.sleeps().is_empty());
        assert_eq!(runner.calls()[0].args[0], "wait");
    }

    #[test]
    fn test_command_retries_transient_errors() {
        let (engine, _, clock) = setup(vec![failed(1, NO_MATCH), failed(1, REFUSED), ok("")]);

        let outcome = engine.wait_command(&CommandWait::new("oc wait pod/x")).unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.elapsed, Duration::from_secs(10));
        assert_eq!(clock.sleeps(), secs(&[5, 5]));
    }

    #[test]
    fn test_command_retries_exhausted() {
        let (engine, runner, _) = setup(vec![failed(1, NO_MATCH); 3]);

        let err = engine
            .wait_command(&CommandWait::new("oc wait pod/x").with_retries(2))
            .unwrap_err();

        let PipelineError::TransientCluster(report) = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(report.attempts, 3);
        assert_eq!(report.elapsed, Duration::from_secs(10));
        assert_eq!(runner.call_count(), 3);
    }

    #[test]
    fn test_command_non_retryable_fails_immediately() {
        let (engine, runner, clock) = setup(vec![failed(1, "error: unknown flag: --fro")]);

        let err = engine.wait_command(&CommandWait::new("oc wait --fro x")).unwrap_err();

        assert!(matches!(err, PipelineError::FatalCluster(_)));
        assert_eq!(runner.call_count(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_command_must_split() {
        let (engine, runner, _) = setup(vec![]);
        let err = engine.wait_command(&CommandWait::new("oc wait 'unterminated")).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn test_phase_pending_running_succeeded() {
        let (engine, runner, clock) = setup(vec![
            pods(&[("tempest-0", "Pending")]),
            pods(&[("tempest-0", "Running")]),
            pods(&[("tempest-0", "Succeeded")]),
        ]);

        let outcome = engine.wait_resource_phase(&phase_wait()).unwrap();

        assert_eq!(outcome.status, WaitStatus::Succeeded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.resource.as_deref(), Some("tempest-0"));
        assert_eq!(clock.sleeps(), secs(&[10, 10]));
        assert_eq!(
            runner.calls()[0].args,
            ["get", "pods", "-n", "openstack", "-l", "service=tempest", "-o", "json"]
        );
    }

    #[test]
    fn test_phase_failed() {
        let (engine, _, _) = setup(vec![
            pods(&[("tempest-0", "Pending")]),
            pods(&[("tempest-0", "Failed")]),
        ]);

        let err = engine.wait_resource_phase(&phase_wait()).unwrap_err();

        assert_eq!(
            err,
            PipelineError::ResourceFailed {
                resource: "tempest-0".to_string(),
                attempts: 2
            }
        );
    }

    #[test]
    fn test_ambiguous_selector_names_both_pods() {
        let (engine, runner, clock) = setup(vec![pods(&[("a-0", "Running"), ("b-0", "Pending")])]);

        let err = engine.wait_resource_phase(&phase_wait()).unwrap_err();

        let PipelineError::AmbiguousSelector { pods, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(pods, &["a-0", "b-0"]);
        assert!(err.to_string().contains("a-0, b-0"));
        assert_eq!(runner.call_count(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_no_pods_keeps_polling() {
        let (engine, _, _) = setup(vec![pods(&[]), pods(&[("job-x", "Succeeded")])]);
        let outcome = engine.wait_resource_phase(&phase_wait()).unwrap();
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn test_phase_timeout() {
        let (engine, runner, _) = setup(vec![pods(&[("tempest-0", "Running")]); 3]);
        let mut wait = phase_wait();
        wait.timeout = Duration::from_secs(30);

        let err = engine.wait_resource_phase(&wait).unwrap_err();

        assert!(matches!(err, PipelineError::Timeout { report: None, .. }));
        assert_eq!(runner.call_count(), 3);
        let budgets: Vec<_> = runner.calls().iter().map(|call| call.timeout).collect();
        assert_eq!(
            budgets,
            [30, 20, 10].map(|s| Some(Duration::from_secs(s)))
        );
    }

    #[test]
    fn test_hung_pod_query_is_bounded_by_the_budget() {
        let clock = Arc::new(FakeClock::new());
        let runner = Arc::new(
            ScriptedRunner::new([timed_out("")]).advancing(clock.clone(), Duration::from_secs(30)),
        );
        let context = ExecutionContext::new(runner.clone(), clock.clone());
        let engine = WaitEngine::new(context, ClusterCli::default(), Arc::new(ErrorClassifier::new()));
        let mut wait = phase_wait();
        wait.timeout = Duration::from_secs(30);
        let start = clock.now();

        let err = engine.wait_resource_phase(&wait).unwrap_err();

        assert_eq!(runner.calls()[0].timeout, Some(Duration::from_secs(30)));
        assert!(clock.now() - start <= wait.timeout);
        let PipelineError::Timeout { report: Some(report), .. } = err else {
            panic!("expected a timeout with a report, got {err:?}");
        };
        assert_eq!(report.attempts, 1);
        assert!(report.command.contains("get pods"));
    }

    #[test]
    fn test_query_failures_are_classified() {
        let (engine, _, clock) = setup(vec![
            failed(1, REFUSED),
            pods(&[("tempest-0", "Succeeded")]),
        ]);
        assert!(engine.wait_resource_phase(&phase_wait()).is_ok());
        assert_eq!(clock.sleeps(), secs(&[10]));

        let (engine, _, _) = setup(vec![failed(1, "error: You must be logged in to the server (Unauthorized)")]);
        let err = engine.wait_resource_phase(&phase_wait()).unwrap_err();
        assert!(matches!(err, PipelineError::FatalCluster(_)));
    }

    #[test]
    fn test_invalid_pod_json() {
        let (engine, _, _) = setup(vec![ok("not json")]);
        let err = engine.wait_resource_phase(&phase_wait()).unwrap_err();
        assert!(matches!(err, PipelineError::Json(_)));
    }

    #[test]
    fn test_cancelled_wait() {
        let (engine, runner, _) = setup(vec![]);
        engine.context.cancel.cancel();
        let err = engine.wait_resource_phase(&phase_wait()).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(_)));
        assert_eq!(runner.call_count(), 0);
    }
}
