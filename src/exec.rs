// LocalAgent Gate - Process Execution
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Runs a validated command through `sh -c` with a wall-clock bound.
// stdout and stderr are captured separately. A timeout kills the child
// and is reported as its own outcome, distinct from any exit code.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Process exited. `code` is None when it was killed by a signal.
    Exited { code: Option<i32>, stdout: String, stderr: String },
    TimedOut,
}

/// Execution primitive behind run_shell.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str, timeout: Duration) -> std::io::Result<ExecOutcome>;
}

/// Real runner: `sh -c <command>`, bounded by a blocking wait with deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &str, timeout: Duration) -> std::io::Result<ExecOutcome> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Pipes drain on their own threads so a chatty child cannot block on a full buffer
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child.wait_timeout(timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                // Readers are left detached: grandchildren may still hold the pipes.
                log::warn!("Command timed out after {:?}: {}", timeout, command);
                return Ok(ExecOutcome::TimedOut);
            }
        };

        let join = |h: Option<JoinHandle<String>>| h.and_then(|h| h.join().ok()).unwrap_or_default();
        Ok(ExecOutcome::Exited {
            code: status.code(),
            stdout: join(stdout),
            stderr: join(stderr),
        })
    }
}

/// Test double: records every command and replays a canned outcome.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct RecordingRunner {
    pub calls: std::sync::Mutex<Vec<String>>,
    pub outcome: ExecOutcome,
}

#[cfg(test)]
impl RecordingRunner {
    pub fn new(outcome: ExecOutcome) -> Self {
        Self { calls: std::sync::Mutex::new(Vec::new()), outcome }
    }

    pub fn ok(stdout: &str) -> Self {
        Self::new(ExecOutcome::Exited { code: Some(0), stdout: stdout.to_string(), stderr: String::new() })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl CommandRunner for RecordingRunner {
    fn run(&self, command: &str, _timeout: Duration) -> std::io::Result<ExecOutcome> {
        self.calls.lock().unwrap().push(command.to_string());
        Ok(self.outcome.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_stderr_separately() {
        let out = SystemRunner.run("echo out; echo err 1>&2", Duration::from_secs(5)).unwrap();
        assert_eq!(
            out,
            ExecOutcome::Exited { code: Some(0), stdout: "out\n".into(), stderr: "err\n".into() }
        );
    }

    #[test]
    fn nonzero_exit_is_reported() {
        match SystemRunner.run("exit 3", Duration::from_secs(5)).unwrap() {
            ExecOutcome::Exited { code, .. } => assert_eq!(code, Some(3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn timeout_is_distinct() {
        let started = std::time::Instant::now();
        let out = SystemRunner.run("exec sleep 5", Duration::from_millis(200)).unwrap();
        assert_eq!(out, ExecOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn fast_command_returns_before_deadline() {
        let started = std::time::Instant::now();
        let out = SystemRunner.run("echo quick", Duration::from_secs(30)).unwrap();
        assert!(matches!(out, ExecOutcome::Exited { code: Some(0), .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
