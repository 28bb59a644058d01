// LocalAgent Gate - Command Validator
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Validates shell command strings before execution:
// - Bare paths and bare filenames are data, not commands
// - Recognized utilities, pipes, redirects and chains are commands
// - Dangerous command detection (case-insensitive, whitespace-normalized)
// - Pipe-to-shell detection
//
// Safety rejection always wins over validity acceptance.

use crate::error::ToolError;
use once_cell::sync::Lazy;
use regex::Regex;

// ============================================================================
// DENYLIST — COMPILED RUST, NOT CONFIGURABLE
// ============================================================================

const DANGEROUS_SUBSTRINGS: &[&str] = &[
    // recursive force-delete
    "rm -rf",
    "rm -fr",
    "rm -r -f",
    // privilege escalation
    "sudo",
    "su -",
    "doas ",
    // raw disk write
    "dd if=",
    "> /dev/sd",
    "> /dev/nvme",
    // filesystem format
    "mkfs",
    "format",
    // permission-escalating chmod
    "chmod +x",
    "chmod 777",
    "chmod 0777",
    "chmod a+rwx",
    "chmod -r 777",
];

const SHELL_INTERPRETERS: &[&str] = &["sh", "bash", "zsh", "dash"];

const VALID_COMMAND_SOURCES: &[&str] = &[
    r"^(ls|pwd|cat|echo|grep|find|date|whoami|df|du|free|top|ps)\s",
    r"^(ls|pwd|date|whoami)$",
    r"\|",
    r">",
    r"&&",
];

static VALID_COMMAND_PATTERNS: Lazy<Vec<Regex>> =
    Lazy::new(|| VALID_COMMAND_SOURCES.iter().map(|p| Regex::new(p).expect("static regex")).collect());

/// Validity patterns + dangerous denylist.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    dangerous_substrings: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            dangerous_substrings: DANGEROUS_SUBSTRINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CommandPolicy {
    /// First denylisted pattern found, if any.
    pub fn find_dangerous(&self, command: &str) -> Option<String> {
        // Check BOTH raw and whitespace-normalized, lowercased
        let lowered = command.to_lowercase();
        let normalized: String = lowered.split_whitespace().collect::<Vec<_>>().join(" ");

        for pattern in &self.dangerous_substrings {
            if lowered.contains(pattern.as_str()) || normalized.contains(pattern.as_str()) {
                return Some(pattern.clone());
            }
        }

        // ====================================================================
        // PIPE-TO-SHELL DETECTION
        // "anything piped to a shell interpreter", any path prefix
        // ====================================================================
        let segments: Vec<&str> = normalized.split('|').collect();
        for segment in segments.iter().skip(1) {
            let receiver = segment.split_whitespace().next().unwrap_or("");
            let base = receiver.rsplit('/').next().unwrap_or(receiver);
            if SHELL_INTERPRETERS.contains(&base) {
                return Some(format!("| {}", base));
            }
        }

        None
    }

    /// Why this string is not a command, if it is not one.
    pub fn invalid_reason(&self, command: &str) -> Option<&'static str> {
        let command = command.trim();
        if command.is_empty() {
            return Some("empty");
        }
        if command.starts_with('/') && !command.contains(' ') {
            return Some("bare path");
        }
        let has_operator = command.contains(['|', '>', '<', '&']);
        if command.contains('.') && !command.contains(' ') && !has_operator {
            return Some("bare filename");
        }
        if VALID_COMMAND_PATTERNS.iter().any(|re| re.is_match(command)) {
            None
        } else {
            Some("unrecognized command")
        }
    }

    pub fn is_valid_command(&self, command: &str) -> bool {
        self.invalid_reason(command).is_none()
    }

    /// Gate for execution: safe first, then valid.
    pub fn check(&self, command: &str) -> Result<(), ToolError> {
        if let Some(pattern) = self.find_dangerous(command) {
            log::warn!("Dangerous command blocked ({}): {}", pattern, command);
            return Err(ToolError::CommandRejectedDangerous {
                command: command.to_string(),
                pattern,
            });
        }
        if let Some(reason) = self.invalid_reason(command) {
            log::warn!("Invalid command blocked ({}): {}", reason, command);
            return Err(ToolError::CommandRejectedInvalid {
                command: command.to_string(),
                reason: reason.to_string(),
            });
        }
        log::debug!("Command validated: {}", command);
        Ok(())
    }

    pub fn is_executable(&self, command: &str) -> bool {
        self.check(command).is_ok()
    }
}

// ============================================================================
// TESTS
// ============================================================================
