// LocalAgent Gate - Tool Registry
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// The six privileged operations. Each is callable on its own, each runs
// its own guards (sandbox, domain policy, command policy), and each
// returns a human-readable status string. Nothing here raises to the
// caller: every ToolError is rendered as text.

use crate::config::SHELL_TIMEOUT;
use crate::domains::DomainAccess;
use crate::error::ToolError;
use crate::exec::{CommandRunner, ExecOutcome, SystemRunner};
use crate::metrics::Metrics;
use crate::paths::Sandbox;
use crate::validate::CommandPolicy;
use crate::web::{normalize_url, HttpFetcher, PageFetcher};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Closed set of tool kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ReadFile,
    WriteFile,
    DeleteFile,
    ListFiles,
    RunShell,
    Fetch,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::DeleteFile => "delete_file",
            ToolName::ListFiles => "list_files",
            ToolName::RunShell => "run_shell",
            ToolName::Fetch => "fetch",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tool invocation with its typed arguments. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    DeleteFile { path: String },
    ListFiles { path: String },
    RunShell { command: String },
    Fetch { url: String },
}

impl ToolCall {
    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::ReadFile { .. } => ToolName::ReadFile,
            ToolCall::WriteFile { .. } => ToolName::WriteFile,
            ToolCall::DeleteFile { .. } => ToolName::DeleteFile,
            ToolCall::ListFiles { .. } => ToolName::ListFiles,
            ToolCall::RunShell { .. } => ToolName::RunShell,
            ToolCall::Fetch { .. } => ToolName::Fetch,
        }
    }
}

/// Labelled output of one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub tool: ToolName,
    pub text: String,
}

/// Guards + primitives shared by all six operations.
pub struct ToolRegistry {
    sandbox: Sandbox,
    domains: Arc<DomainAccess>,
    commands: CommandPolicy,
    runner: Arc<dyn CommandRunner>,
    fetcher: Arc<dyn PageFetcher>,
    metrics: Arc<Metrics>,
}

impl ToolRegistry {
    /// Registry backed by the real process runner and HTTP client.
    pub fn new(sandbox: Sandbox, domains: Arc<DomainAccess>, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new().map_err(anyhow::Error::msg)?;
        Ok(Self::with_primitives(sandbox, domains, metrics, Arc::new(SystemRunner), Arc::new(fetcher)))
    }

    pub fn with_primitives(
        sandbox: Sandbox,
        domains: Arc<DomainAccess>,
        metrics: Arc<Metrics>,
        runner: Arc<dyn CommandRunner>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self { sandbox, domains, commands: CommandPolicy::default(), runner, fetcher, metrics }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn domains(&self) -> &DomainAccess {
        &self.domains
    }

    pub fn commands(&self) -> &CommandPolicy {
        &self.commands
    }

    /// Exhaustive dispatch over the closed tool set.
    pub fn invoke(&self, call: &ToolCall) -> ToolOutput {
        let text = match call {
            ToolCall::ReadFile { path } => self.read_file(path),
            ToolCall::WriteFile { path, content } => self.write_file(path, content),
            ToolCall::DeleteFile { path } => self.delete_file(path),
            ToolCall::ListFiles { path } => self.list_files(path),
            ToolCall::RunShell { command } => self.run_shell(command),
            ToolCall::Fetch { url } => self.fetch(url),
        };
        ToolOutput { tool: call.name(), text }
    }

    fn finish(&self, tool: ToolName, result: Result<String, ToolError>) -> String {
        match result {
            Ok(text) => {
                self.metrics.record_tool(tool.as_str(), "success");
                text
            }
            Err(e) => {
                self.metrics.record_tool(tool.as_str(), e.kind());
                e.to_string()
            }
        }
    }

    // ========================================================================
    // FILESYSTEM
    // ========================================================================

    pub fn read_file(&self, path: &str) -> String {
        log::info!("Tool read_file: path={}", path);
        self.finish(ToolName::ReadFile, self.try_read_file(path))
    }

    fn try_read_file(&self, path: &str) -> Result<String, ToolError> {
        let rpath = self.sandbox.resolve(path);
        if !rpath.exists() {
            log::warn!("File not found: {:?}", rpath);
            return Err(ToolError::PathNotFound(rpath));
        }
        if rpath.is_dir() {
            return Err(ToolError::PathIsWrongType { path: rpath, expected: "file", found: "directory" });
        }
        let bytes = std::fs::read(&rpath).map_err(|e| ToolError::io("read", &rpath, e))?;
        log::info!("File read: {:?} ({} bytes)", rpath, bytes.len());
        Ok(format!(
            "OK: read {} ({} bytes)\n\n{}",
            rpath.display(),
            bytes.len(),
            String::from_utf8_lossy(&bytes)
        ))
    }

    pub fn write_file(&self, path: &str, content: &str) -> String {
        log::info!("Tool write_file: path={}, content_length={}", path, content.len());
        self.finish(ToolName::WriteFile, self.try_write_file(path, content))
    }

    fn try_write_file(&self, path: &str, content: &str) -> Result<String, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::EmptyInput("path"));
        }
        let rpath = self.sandbox.resolve(path);
        if rpath.is_dir() {
            return Err(ToolError::PathIsWrongType { path: rpath, expected: "file", found: "directory" });
        }
        if let Some(parent) = rpath.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ToolError::io("create parent", parent, e))?;
        }
        // Never write through a link that appeared after resolution
        if self.sandbox.enabled() && is_symlink(&rpath) {
            log::warn!("Refusing to write through symlink: {:?}", rpath);
            return Err(ToolError::PathIsWrongType { path: rpath, expected: "file", found: "symlink" });
        }
        std::fs::write(&rpath, content.as_bytes()).map_err(|e| ToolError::io("write", &rpath, e))?;
        log::info!("File written: {:?} ({} bytes)", rpath, content.len());
        Ok(format!("OK: wrote {} ({} bytes)", rpath.display(), content.len()))
    }

    pub fn delete_file(&self, path: &str) -> String {
        log::info!("Tool delete_file: path={}", path);
        self.finish(ToolName::DeleteFile, self.try_delete_file(path))
    }

    fn try_delete_file(&self, path: &str) -> Result<String, ToolError> {
        let rpath = self.sandbox.resolve(path);
        if !rpath.exists() {
            log::warn!("File not found: {:?}", rpath);
            return Err(ToolError::PathNotFound(rpath));
        }
        if rpath.is_dir() {
            log::warn!("Refusing to delete directory: {:?}", rpath);
            return Err(ToolError::PathIsWrongType { path: rpath, expected: "file", found: "directory" });
        }
        std::fs::remove_file(&rpath).map_err(|e| ToolError::io("delete", &rpath, e))?;
        log::info!("File deleted: {:?}", rpath);
        Ok(format!("OK: deleted {}", rpath.display()))
    }

    pub fn list_files(&self, path: &str) -> String {
        log::info!("Tool list_files: path={}", path);
        self.finish(ToolName::ListFiles, self.try_list_files(path))
    }

    fn try_list_files(&self, path: &str) -> Result<String, ToolError> {
        let path = if path.trim().is_empty() { "." } else { path };
        let rpath = self.sandbox.resolve(path);
        if !rpath.exists() {
            return Err(ToolError::PathNotFound(rpath));
        }
        if !rpath.is_dir() {
            return Err(ToolError::PathIsWrongType { path: rpath, expected: "directory", found: "file" });
        }

        let mut names: Vec<(String, std::path::PathBuf)> = std::fs::read_dir(&rpath)
            .map_err(|e| ToolError::io("list", &rpath, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect();
        names.sort();

        let mut lines = Vec::with_capacity(names.len());
        let (mut files, mut dirs, mut total) = (0usize, 0usize, 0u64);
        for (name, full) in &names {
            if full.is_dir() {
                lines.push(format!("DIR  {}/", name));
                dirs += 1;
            } else {
                let size = std::fs::metadata(full).map(|m| m.len()).unwrap_or(0);
                lines.push(format!("FILE {} ({} bytes)", name, size));
                files += 1;
                total += size;
            }
        }
        log::info!("Listed {:?}: {} files, {} dirs, {} bytes", rpath, files, dirs, total);

        if lines.is_empty() {
            return Ok(format!("Directory {}: (empty)", rpath.display()));
        }
        Ok(format!("Directory {}:\n{}", rpath.display(), lines.join("\n")))
    }

    // ========================================================================
    // SHELL
    // ========================================================================

    pub fn run_shell(&self, command: &str) -> String {
        log::info!("Tool run_shell: cmd={}", command);
        self.finish(ToolName::RunShell, self.try_run_shell(command))
    }

    fn try_run_shell(&self, command: &str) -> Result<String, ToolError> {
        if self.sandbox.enabled() {
            log::warn!("Shell command blocked (sandbox mode active)");
            return Err(ToolError::ShellDisabled);
        }
        let command = command.trim();
        if command.is_empty() {
            return Err(ToolError::EmptyInput("command"));
        }
        self.commands.check(command)?;

        let outcome = self
            .runner
            .run(command, SHELL_TIMEOUT)
            .map_err(|e| ToolError::io("spawn", "sh", e))?;

        match outcome {
            ExecOutcome::TimedOut => Err(ToolError::CommandTimedOut {
                command: command.to_string(),
                secs: SHELL_TIMEOUT.as_secs(),
            }),
            ExecOutcome::Exited { code, stdout, stderr } => {
                log::info!(
                    "Shell command finished: exit_code={:?}, stdout_length={}, stderr_length={}",
                    code, stdout.len(), stderr.len()
                );
                let mut streams = String::new();
                if !stdout.is_empty() {
                    streams.push_str(&format!("\n\nSTDOUT:\n{}", stdout));
                }
                if !stderr.is_empty() {
                    streams.push_str(&format!("\n\nSTDERR:\n{}", stderr));
                }
                match code {
                    Some(0) => Ok(format!("OK: $ {} (exit 0){}", command, streams)),
                    other => Err(ToolError::CommandFailed {
                        command: command.to_string(),
                        code: other.unwrap_or(-1),
                        output: streams,
                    }),
                }
            }
        }
    }

    // ========================================================================
    // WEB
    // ========================================================================

    pub fn fetch(&self, url: &str) -> String {
        log::info!("Tool fetch: url={}", url);
        self.finish(ToolName::Fetch, self.try_fetch(url))
    }

    fn try_fetch(&self, url: &str) -> Result<String, ToolError> {
        if url.trim().is_empty() {
            return Err(ToolError::EmptyInput("url"));
        }
        let url = normalize_url(url)?;
        self.domains.authorize(&url)?;
        let page = self.fetcher.get(&url)?;
        Ok(format!("OK: fetched {} (status {})\n\n{}", page.url, page.status, page.body))
    }
}

fn is_symlink(path: &std::path::Path) -> bool {
    std::fs::symlink_metadata(path).map(|m| m.file_type().is_symlink()).unwrap_or(false)
}

// ============================================================================
// TESTS
// ============================================================================
