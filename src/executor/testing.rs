//! Fakes for driving the engines in tests

use super::traits::{CancellationToken, Clock, CommandOutput, CommandRunner, CommandSpec};
use crate::pipeline::PipelineResult;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Returns canned outputs in order and records every command it was given
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outputs: Mutex<VecDeque<CommandOutput>>,
    calls: Mutex<Vec<CommandSpec>>,
    clock: Option<Arc<FakeClock>>,
    cost: Duration,
}

impl ScriptedRunner {
    pub fn new(outputs: impl IntoIterator<Item = CommandOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every run advances `clock` by `cost`
    pub fn advancing(mut self, clock: Arc<FakeClock>, cost: Duration) -> Self {
        self.clock = Some(clock);
        self.cost = cost;
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> PipelineResult<CommandOutput> {
        if cancel.is_cancelled() {
            return Ok(CommandOutput::cancelled());
        }
        self.calls.lock().push(spec.clone());
        if let Some(clock) = &self.clock {
            clock.advance(self.cost);
        }
        let output = self
            .outputs
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected command: {spec}"));
        Ok(output)
    }
}

/// Virtual time: sleeping only advances the clock and is recorded
#[derive(Debug)]
pub struct FakeClock {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn sleep(&self, duration: Duration, _cancel: &CancellationToken) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        ..CommandOutput::default()
    }
}

pub fn failed(rc: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        rc,
        stderr: stderr.to_string(),
        ..CommandOutput::default()
    }
}

pub fn timed_out(stdout: &str) -> CommandOutput {
    CommandOutput {
        rc: -1,
        stdout: stdout.to_string(),
        stderr: "\ncommand timed out after 60s".to_string(),
        timed_out: true,
        ..CommandOutput::default()
    }
}

pub fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}

pub const REFUSED: &str = "The connection to the server api.ocp:6443 was refused - did you specify the right host or port?";
