// LocalAgent Gate - Error Taxonomy
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Every tool failure is recovered locally and rendered as text.
// Display output of ToolError IS the response body the caller sees.

use std::path::PathBuf;
use thiserror::Error;

/// Soft failures raised inside the tool registry.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("ERROR: not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("ERROR: {} is a {found}, expected a {expected}", .path.display())]
    PathIsWrongType {
        path: PathBuf,
        expected: &'static str,
        found: &'static str,
    },

    #[error("BLOCKED: dangerous command ({pattern}): {command}")]
    CommandRejectedDangerous { command: String, pattern: String },

    #[error("BLOCKED: not a valid shell command ({reason}): {command}")]
    CommandRejectedInvalid { command: String, reason: String },

    #[error("TIMEOUT: command exceeded {secs}s: {command}")]
    CommandTimedOut { command: String, secs: u64 },

    #[error("ERROR: command exited with code {code}: {command}{output}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("BLOCKED: shell commands are disabled in sandbox mode (set \"sandbox\": false to enable)")]
    ShellDisabled,

    #[error("BLOCKED: shell commands are disabled by configuration (set \"shell_execution.enabled\": true to enable)")]
    ShellExecutionOff,

    #[error("BLOCKED: domain not allowed: {host} (allowed: {allowed})")]
    DomainRejected { host: String, allowed: String },

    #[error("TIMEOUT: fetch exceeded {secs}s: {url}")]
    FetchTimedOut { url: String, secs: u64 },

    #[error("ERROR: fetch failed for {url}: {reason}")]
    FetchTransportError { url: String, reason: String },

    #[error("ERROR: empty {0}")]
    EmptyInput(&'static str),

    #[error("ERROR: {op} failed for {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ToolError::Io { op, path: path.into(), source }
    }

    /// Short machine label, used for metrics and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::PathNotFound(_) => "path_not_found",
            ToolError::PathIsWrongType { .. } => "path_wrong_type",
            ToolError::CommandRejectedDangerous { .. } => "blocked_dangerous",
            ToolError::CommandRejectedInvalid { .. } => "blocked_invalid",
            ToolError::CommandTimedOut { .. } => "timeout",
            ToolError::CommandFailed { .. } => "failed",
            ToolError::ShellDisabled => "blocked_sandbox",
            ToolError::ShellExecutionOff => "blocked_config",
            ToolError::DomainRejected { .. } => "domain_rejected",
            ToolError::FetchTimedOut { .. } => "fetch_timeout",
            ToolError::FetchTransportError { .. } => "fetch_error",
            ToolError::EmptyInput(_) => "empty_input",
            ToolError::Io { .. } => "io_error",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_outcome_prefix() {
        let e = ToolError::PathNotFound(PathBuf::from("/sb/a.txt"));
        assert!(e.to_string().starts_with("ERROR:"));

        let e = ToolError::CommandRejectedDangerous {
            command: "rm -rf /".into(),
            pattern: "rm -rf".into(),
        };
        assert!(e.to_string().starts_with("BLOCKED:"));
        assert_eq!(e.kind(), "blocked_dangerous");

        let e = ToolError::CommandTimedOut { command: "sleep 99".into(), secs: 30 };
        assert!(e.to_string().starts_with("TIMEOUT:"));

        let e = ToolError::ShellExecutionOff;
        assert!(e.to_string().starts_with("BLOCKED: shell commands are disabled"));
        assert!(e.to_string().contains("shell_execution.enabled"));
        assert!(!ToolError::ShellDisabled.to_string().contains("shell_execution"));
    }

    #[test]
    fn failed_and_timed_out_are_distinct() {
        let failed = ToolError::CommandFailed { command: "false".into(), code: 1, output: String::new() };
        let timed = ToolError::CommandTimedOut { command: "false".into(), secs: 30 };
        assert_ne!(failed.kind(), timed.kind());
        assert!(failed.to_string().contains("code 1"));
    }
}
