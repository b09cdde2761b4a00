//! Execution seams
//!
//! Subprocesses, time and cancellation are reached through the types in
//! this module so the apply and wait engines can be driven without a
//! cluster or a wall clock.

use crate::pipeline::{PipelineResult, ValidationError};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,

    /// Arguments, passed verbatim
    pub args: Vec<String>,

    /// Kill the child after this long (None = no timeout)
    pub timeout: Option<Duration>,

    /// Working directory
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Creates a command with no arguments
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
            cwd: None,
        }
    }

    /// Splits a command line into program and arguments using shell words
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCommand`] for unbalanced quotes or
    /// an empty command line.
    pub fn parse(command_line: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidCommand {
            command: command_line.to_string(),
            reason: reason.to_string(),
        };

        let mut words = shell_words::split(command_line).map_err(|e| invalid(&e.to_string()))?;
        if words.is_empty() {
            return Err(invalid("command is empty"));
        }
        let program = words.remove(0);
        Ok(Self::new(program).args(words))
    }

    /// Appends an argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        f.write_str(&shell_words::join(words))
    }
}

/// Captured result of a finished, killed or cancelled command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when the process ended without one
    pub rc: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// The timeout fired and the child was killed
    pub timed_out: bool,

    /// Cancellation was requested and the child was killed (or never started)
    pub cancelled: bool,

    /// Wall time spent
    pub duration: Duration,
}

impl CommandOutput {
    /// Returns true if the command exited with code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.rc == 0 && !self.timed_out && !self.cancelled
    }

    /// Output for a command that was never started because of cancellation
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            rc: -1,
            cancelled: true,
            ..Self::default()
        }
    }
}

/// Runs subprocesses
#[allow(clippy::missing_errors_doc)]
pub trait CommandRunner: Send + Sync {
    /// Runs `spec` to completion, timeout or cancellation
    ///
    /// A non-zero exit is not an error; only failing to start the program is.
    fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> PipelineResult<CommandOutput>;
}

/// Source of time for poll loops and backoff
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Sleeps for `duration`, returning early if `cancel` fires
    fn sleep(&self, duration: Duration, cancel: &CancellationToken);
}

/// The real clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    const SLICE: Duration = Duration::from_millis(100);
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancellationToken) {
        let deadline = Instant::now() + duration;
        while !cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(Self::SLICE.min(deadline - now));
        }
    }
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation for every clone of this token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything the engines need from the outside world
#[derive(Clone)]
pub struct ExecutionContext {
    /// Subprocess runner
    pub runner: Arc<dyn CommandRunner>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    /// Cancellation flag checked at subprocess boundaries
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    /// Creates a context from explicit seams
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Real processes and the wall clock
    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(super::process::SystemRunner::new()), Arc::new(SystemClock))
    }

    /// Replaces the cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs a command through the runner with this context's token
    ///
    /// # Errors
    ///
    /// Returns the runner's error when the program cannot be started.
    pub fn run(&self, spec: &CommandSpec) -> PipelineResult<CommandOutput> {
        self.runner.run(spec, &self.cancel)
    }

    /// Sleeps through the clock, waking early on cancellation
    pub fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration, &self.cancel);
    }

    /// Current instant of the clock
    #[must_use]
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Returns true once cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let spec = CommandSpec::parse("oc wait --for 'condition=Ready' pod -l app=x").unwrap();
        assert_eq!(spec.program, "oc");
        assert_eq!(spec.args, ["wait", "--for", "condition=Ready", "pod", "-l", "app=x"]);
    }

    #[test]
    fn test_parse_rejects_bad_command_lines() {
        assert!(CommandSpec::parse("").is_err());
        assert!(CommandSpec::parse("   ").is_err());
        assert!(CommandSpec::parse("oc get 'pods").is_err());
    }

    #[test]
    fn test_display_quotes_arguments() {
        let spec = CommandSpec::new("oc").args(["apply", "-f", "my file.yaml"]);
        assert_eq!(spec.to_string(), "oc apply -f 'my file.yaml'");
    }

    #[test]
    fn test_output_success() {
        assert!(CommandOutput::default().is_success());
        assert!(!CommandOutput::cancelled().is_success());
        let timed_out = CommandOutput {
            timed_out: true,
            ..CommandOutput::default()
        };
        assert!(!timed_out.is_success());
    }

    #[test]
    fn test_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_system_clock_sleep_returns_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let clock = SystemClock;
        let start = Instant::now();
        clock.sleep(Duration::from_secs(30), &token);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
