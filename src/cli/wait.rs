//! `hotloop wait` and `hotloop wait-pod`
//!
//! ## Usage
//!
//! ```bash
//! hotloop wait "oc wait --for=condition=Available deploy/api" --retries 20
//! hotloop wait-pod -n openshift-storage -l job=ocs-setup --timeout 1800
//! ```

use anyhow::{Context, Result};
use hotloop::executor::{CommandWait, ExecutionContext, PhaseWait, WaitEngine, WaitOutcome, WaitStatus};
use hotloop::infrastructure::{ClusterCli, Config, LabelSelector};
use std::sync::Arc;
use std::time::Duration;

fn engine(config: &Config, context: ExecutionContext) -> Result<WaitEngine> {
    let classifier = Arc::new(config.classifier()?);
    Ok(WaitEngine::new(context, ClusterCli::new(&config.cli), classifier))
}

/// Retries `command` with the configured wait settings
pub fn wait_command(config: &Config, context: ExecutionContext, command: &str) -> Result<WaitOutcome> {
    let wait = CommandWait::new(command)
        .with_retries(config.wait.retries)
        .with_delay(Duration::from_secs(config.wait.delay_secs))
        .with_timeout(config.wait.command_timeout_secs.map(Duration::from_secs));

    let outcome = engine(config, context)?
        .wait_command(&wait)
        .with_context(|| format!("Wait for `{command}` failed"))?;

    println!("{}", summarize(&outcome));
    Ok(outcome)
}

/// Polls the pod matching `selector` in `namespace` until it succeeds
pub fn wait_pod(config: &Config, context: ExecutionContext, namespace: &str, selector: &str) -> Result<WaitOutcome> {
    let selector = LabelSelector::parse(selector).context("Invalid label selector")?;
    let mut wait = PhaseWait::new(namespace, selector);
    wait.timeout = Duration::from_secs(config.pod_wait.timeout_secs);
    wait.poll_interval = Duration::from_secs(config.pod_wait.poll_interval_secs);

    let outcome = engine(config, context)?
        .wait_resource_phase(&wait)
        .with_context(|| format!("Wait for pod in namespace {namespace} failed"))?;

    println!("{}", summarize(&outcome));
    Ok(outcome)
}

fn summarize(outcome: &WaitOutcome) -> String {
    let what = match (&outcome.status, &outcome.resource) {
        (WaitStatus::Succeeded, Some(pod)) => format!("pod {pod} succeeded"),
        (WaitStatus::Succeeded, None) => "succeeded".to_string(),
        (WaitStatus::ConditionMet, _) => "condition met".to_string(),
    };
    format!(
        "{what} after {} attempts ({:.1}s)",
        outcome.attempts,
        outcome.elapsed.as_secs_f64()
    )
}
