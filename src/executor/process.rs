//! Subprocess execution with timeout and cancellation

use super::traits::{CancellationToken, CommandOutput, CommandRunner, CommandSpec};
use crate::pipeline::{PipelineError, PipelineResult};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Runs commands as real child processes
///
/// Output is drained on reader threads so a chatty child never blocks on a
/// full pipe while the parent polls for exit.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    poll_interval: Duration,
}

impl SystemRunner {
    /// Creates a runner polling child status every 50ms
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

enum Exit {
    Code(i32),
    TimedOut,
    Cancelled,
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> PipelineResult<CommandOutput> {
        if cancel.is_cancelled() {
            return Ok(CommandOutput::cancelled());
        }

        let start = Instant::now();
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a kill also reaches grandchildren holding the pipes.
            command.process_group(0);
        }

        tracing::debug!(command = %spec, "Executing command");

        let mut child = command
            .spawn()
            .map_err(|e| PipelineError::Io(format!("failed to start `{spec}`: {e}")))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = spec.timeout.map(|timeout| start + timeout);
        let exit = loop {
            if let Some(status) = child.try_wait()? {
                break Exit::Code(status.code().unwrap_or(-1));
            }
            if cancel.is_cancelled() {
                kill(&mut child);
                break Exit::Cancelled;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                kill(&mut child);
                break Exit::TimedOut;
            }
            thread::sleep(self.poll_interval);
        };

        let stdout = collect(stdout);
        let mut stderr = collect(stderr);
        let duration = start.elapsed();

        let output = match exit {
            Exit::Code(rc) => CommandOutput {
                rc,
                stdout,
                stderr,
                duration,
                ..CommandOutput::default()
            },
            Exit::TimedOut => {
                let secs = spec.timeout.unwrap_or_default().as_secs();
                tracing::warn!(command = %spec, timeout_secs = secs, "Command timed out");
                stderr.push_str(&format!("\ncommand timed out after {secs}s"));
                CommandOutput {
                    rc: -1,
                    stdout,
                    stderr,
                    timed_out: true,
                    duration,
                    ..CommandOutput::default()
                }
            }
            Exit::Cancelled => {
                tracing::warn!(command = %spec, "Command cancelled");
                CommandOutput {
                    rc: -1,
                    stdout,
                    stderr,
                    cancelled: true,
                    duration,
                    ..CommandOutput::default()
                }
            }
        };

        Ok(output)
    }
}

fn kill(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
        // addresses the group created at spawn.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    handle
        .join()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[test]
    fn test_captures_output_and_exit_code() {
        let output = SystemRunner::new()
            .run(&sh("echo out; echo err >&2; exit 3"), &CancellationToken::new())
            .unwrap();

        assert_eq!(output.rc, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.timed_out);
        assert!(!output.is_success());
    }

    #[test]
    fn test_large_output_does_not_block() {
        let output = SystemRunner::new()
            .run(
                &sh("i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done")
                    .with_timeout(Duration::from_secs(30)),
                &CancellationToken::new(),
            )
            .unwrap();

        assert!(output.is_success());
        assert_eq!(output.stdout.lines().count(), 20000);
    }

    #[test]
    fn test_timeout_kills_and_keeps_partial_output() {
        let output = SystemRunner::new()
            .run(
                &sh("echo started; exec sleep 10").with_timeout(Duration::from_millis(300)),
                &CancellationToken::new(),
            )
            .unwrap();

        assert!(output.timed_out);
        assert_eq!(output.rc, -1);
        assert_eq!(output.stdout, "started\n");
        assert!(output.stderr.contains("command timed out"));
        assert!(output.duration < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_kills_grandchildren_holding_the_pipes() {
        let output = SystemRunner::new()
            .run(
                &sh("echo started; sleep 30; echo never").with_timeout(Duration::from_millis(300)),
                &CancellationToken::new(),
            )
            .unwrap();

        assert!(output.timed_out);
        assert_eq!(output.stdout, "started\n");
        assert!(output.duration < Duration::from_secs(5));
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let output = SystemRunner::new().run(&sh("echo never"), &token).unwrap();
        assert!(output.cancelled);
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn test_cancel_while_running() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let output = SystemRunner::new()
            .run(&sh("exec sleep 10"), &token)
            .unwrap();
        canceller.join().unwrap();

        assert!(output.cancelled);
        assert!(output.duration < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let err = SystemRunner::new()
            .run(&CommandSpec::new("definitely-not-a-real-binary-xyz"), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
