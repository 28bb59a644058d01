// LocalAgent Gate - Tool Dispatcher
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Turns a free-text prompt into zero or more tool calls. No language
// understanding: a fixed, priority-ordered scan of trigger phrases and
// extraction patterns (German + English vocabulary).
//
// Scan order:
//   1. <<<CONTENT ... <<<END marker block -> exact write, short-circuits
//   2. read (suppressed by write/delete triggers), write, delete
//   3. list (only when no read/write/delete trigger)
//   4. shell (explicit trigger + shell enabled, command validated first)
//   5. fetch (explicit trigger, loopback hosts never fetched)

use crate::domains::{host_of, is_loopback_host};
use crate::error::ToolError;
use crate::tools::{ToolCall, ToolName, ToolOutput, ToolRegistry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

// ============================================================================
// RULE TABLE
// ============================================================================

/// Substring trigger set, matched against the lowercased prompt.
pub struct Triggers(&'static [&'static str]);

impl Triggers {
    pub fn matches(&self, lowered: &str) -> bool {
        self.0.iter().any(|t| lowered.contains(t))
    }
}

/// Ordered extraction patterns; the first one that matches wins (capture 1).
pub struct Extractor(Vec<Regex>);

impl Extractor {
    fn new(patterns: &[&str]) -> Self {
        Self(patterns.iter().map(|p| Regex::new(p).expect("static regex")).collect())
    }

    pub fn first(&self, text: &str) -> Option<String> {
        self.0
            .iter()
            .find_map(|re| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
    }
}

pub static WRITE_TRIGGERS: Triggers = Triggers(&[
    "schreiben", "schreib", "write", "erstellen", "erstelle", "create", "speichern", "speichere", "save",
]);

pub static DELETE_TRIGGERS: Triggers =
    Triggers(&["löschen", "lösche", "lösch", "delete", "remove", "entfernen", "entferne"]);

pub static READ_TRIGGERS: Triggers = Triggers(&[
    "lesen", "lies", "read", "zeigen", "zeige", "show", "inhalt", "anzeigen", "öffne", "open", "cat",
]);

pub static LIST_TRIGGERS: Triggers = Triggers(&[
    "liste", "list", "auflisten", "aufliste", "verzeichnis", "directory", "ordner", "folder", "dateien",
    "files", "zeige dateien", "show files", "ls",
]);

pub static SHELL_TRIGGERS: Triggers =
    Triggers(&["führe aus", "execute", "run command", "kommando ausführen", "shell"]);

pub static FETCH_TRIGGERS: Triggers = Triggers(&[
    "hole", "hol", "fetch", "lade", "laden", "abrufen", "download", "webseite", "website",
]);

const MARKER_START: &str = "<<<CONTENT";

static MARKER_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<<<CONTENT[ \t]*\r?\n(.*?)\r?\n<<<END").expect("static regex"));

static MARKER_FILENAME: Lazy<Extractor> = Lazy::new(|| {
    Extractor::new(&[
        r"(?i)(?:erstelle?|create|schreibe?)\s+(?:datei\s+|file\s+)?([a-zA-Z0-9_.\-/]+\.\w+)",
        r"(?i)\b([a-zA-Z0-9_.\-/]+\.(?:txt|py|md|json|yaml|yml|sh|conf|cfg))\b",
    ])
});

static READ_FILENAME: Lazy<Extractor> = Lazy::new(|| {
    Extractor::new(&[
        r"(?i)\b([a-zA-Z0-9_.\-/]+\.(?:txt|py|md|json|yaml|yml|log|sh|conf|cfg))\b",
        r"(?i)\b(?:datei|file)[\s:]+([a-zA-Z0-9_.\-/]+)",
        r"(?i)\b(?:von|of|from)[\s:]+([a-zA-Z0-9_.\-/]+\.\w+)",
        r"(?i)\b(?:lies|lesen|zeige?|show|read|open|cat)[\s:]+([a-zA-Z0-9_.\-/]+)",
    ])
});

static WRITE_FILENAME: Lazy<Extractor> = Lazy::new(|| {
    Extractor::new(&[
        r"(?i)(?:erstelle?|create|schreibe?|speichere?|write|save)\s+(?:eine?\s+|a\s+)?(?:datei\s+|file\s+)?([a-zA-Z0-9_.\-/]+\.\w+)",
        r"(?i)\b([a-zA-Z0-9_.\-/]+\.(?:txt|py|md|json|yaml|yml|sh|conf|cfg))\b",
        r"(?i)\b(?:datei|file)[\s:]+([a-zA-Z0-9_.\-/]+)",
    ])
});

static WRITE_CONTENT: Lazy<Extractor> = Lazy::new(|| {
    Extractor::new(&[
        // JSON-wrapped prompts: ... mit CODE"}
        r#"(?i)\b(?:mit|with)\s+(.+?)"\s*\}"#,
        r#"(?i)(?:inhalt|content|text)[\s:]*(.+?)"\s*\}"#,
        r#"(?i):\s*(.+?)"\s*\}"#,
        // quoted text after with/mit
        r#"(?i)\b(?:mit|with)\s+"((?:[^"\\]|\\.)*)""#,
        r#"(?i)\b(?:mit|with)\s+'((?:[^'\\]|\\.)*)'"#,
        // <file.ext>: <content>
        r"(?i)[a-zA-Z0-9_\-/]+\.\w+:\s*(.+?)\s*$",
        // free text after with/mit
        r"(?i)\b(?:mit|with)\s+(.+?)\s*$",
    ])
});

static DELETE_FILENAME: Lazy<Extractor> = Lazy::new(|| {
    Extractor::new(&[
        r"(?i)\b([a-zA-Z0-9_.\-/]+\.(?:txt|py|md|json|yaml|yml|sh|conf|cfg|log))\b",
        r"(?i)\b(?:datei|file)\s+([a-zA-Z0-9_.\-/]+)",
        r"(?i)(?:lösche?|delete|remove|entferne?)\s+(?:datei\s+|file\s+)?([a-zA-Z0-9_.\-/]+\.\w+)",
    ])
});

static LIST_PATH: Lazy<Extractor> = Lazy::new(|| {
    Extractor::new(&[
        r"(?i)\b(?:verzeichnis|directory|ordner|folder|in)\s+([a-zA-Z0-9_.\-/]+)",
        r"(?i)\b(?:von|of|at)\s+([a-zA-Z0-9_.\-/]+)",
    ])
});

/// "Führe Kommando 'x' aus": trigger split around the command.
static SHELL_SPLIT_TRIGGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bführe\b.*\baus\b").expect("static regex"));

/// "shell: <cmd>" / "run: <cmd>" / "execute: <cmd>" on its own line.
static SHELL_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*(?:shell|run|execute):\s*(.+?)\s*$").expect("static regex"));

static SHELL_QUOTED: Lazy<Extractor> = Lazy::new(|| {
    Extractor::new(&[
        r#"(?i)(?:führe|execute|run)\s+(?:kommando\s+|command\s+)?["']([^"']+)["']"#,
        r#"(?i)kommando[\s:]*["']([^"']+)["']"#,
    ])
});

static SHELL_BACKTICK: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").expect("static regex"));

static FETCH_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)https?://[^\s]+").expect("static regex"));
static FETCH_WWW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bwww\.[^\s]+").expect("static regex"));
static FETCH_BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:hole|fetch|lade)\s+([a-zA-Z0-9.-]+\.(?:com|org|net|de|edu|gov|io|co))\b")
        .expect("static regex")
});

/// Strip JSON/quote debris a chat client may leave on an extracted name.
fn clean_name(raw: &str) -> String {
    raw.trim().trim_end_matches(['"', '}', '\'', ']']).to_string()
}

/// Trim, drop surrounding quotes, unescape \" and \'.
fn clean_content(raw: &str) -> String {
    raw.trim()
        .trim_matches(['"', '\''])
        .replace("\\\"", "\"")
        .replace("\\'", "'")
}

fn clean_url(raw: &str) -> String {
    raw.trim_end_matches(['"', '\'', '}', ')', ']', ',']).to_string()
}

// ============================================================================
// PLAN
// ============================================================================

/// One planned step: a tool call, or a notice the dispatcher emits instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Invoke(ToolCall),
    Notice { tool: ToolName, text: String },
}

/// Shell switches resolved from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ShellPolicy {
    pub enabled: bool,
    pub require_trigger: bool,
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "outputs", rename_all = "snake_case")]
pub enum DispatchResult {
    Executed(Vec<ToolOutput>),
    NoToolRecognized,
}

pub const NO_TOOL_HELP: &str = "No tool recognized.

Available tools, with examples:
- read:   \"Lies Datei config.yaml\", \"Show the content of notes.txt\"
- write:  \"Erstelle Datei hello.txt mit Hallo Welt\", \"Create file demo.py with 'print(1)'\"
- exact:  \"Create app.py\" followed by <<<CONTENT on its own line, the raw content, then <<<END
- delete: \"Lösche Datei old.txt\"
- list:   \"Liste alle Dateien auf\", \"List directory docs\"
- shell:  \"Führe Kommando 'ls -la' aus\", \"shell: pwd\" (only with sandbox off)
- fetch:  \"Hole github.com\", \"Fetch https://example.com\"";

impl DispatchResult {
    pub fn recognized(&self) -> bool {
        matches!(self, DispatchResult::Executed(_))
    }

    /// `[tool]` label line + output per block, blocks joined by a blank line.
    pub fn render(&self) -> String {
        match self {
            DispatchResult::Executed(outputs) => outputs
                .iter()
                .map(|o| format!("[{}]\n{}", o.tool, o.text))
                .collect::<Vec<_>>()
                .join("\n\n"),
            DispatchResult::NoToolRecognized => NO_TOOL_HELP.to_string(),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    shell: ShellPolicy,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, shell: ShellPolicy) -> Self {
        Self { registry, shell }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn shell_policy(&self) -> ShellPolicy {
        self.shell
    }

    /// Scan the prompt and run every step it yields, in scan order.
    pub fn dispatch(&self, prompt: &str) -> DispatchResult {
        let steps = self.plan(prompt);
        if steps.is_empty() {
            log::debug!("No tool recognized");
            return DispatchResult::NoToolRecognized;
        }
        let outputs = steps
            .into_iter()
            .map(|step| match step {
                Step::Invoke(call) => self.registry.invoke(&call),
                Step::Notice { tool, text } => ToolOutput { tool, text },
            })
            .collect();
        DispatchResult::Executed(outputs)
    }

    /// Pure scan: which steps would this prompt produce?
    pub fn plan(&self, prompt: &str) -> Vec<Step> {
        if let Some(step) = plan_marker(prompt) {
            return vec![step];
        }

        let lowered = prompt.to_lowercase();
        let has_write = WRITE_TRIGGERS.matches(&lowered);
        let has_delete = DELETE_TRIGGERS.matches(&lowered);
        let has_read = READ_TRIGGERS.matches(&lowered);
        let mut steps = Vec::new();

        if has_read && !has_write && !has_delete {
            if let Some(name) = READ_FILENAME.first(prompt) {
                steps.push(Step::Invoke(ToolCall::ReadFile { path: clean_name(&name) }));
            }
        }

        if has_write {
            let name = WRITE_FILENAME.first(prompt);
            let content = WRITE_CONTENT.first(prompt);
            log::debug!(
                "Write extraction: file={:?} content_length={:?}",
                name,
                content.as_ref().map(|c| c.len())
            );
            if let (Some(name), Some(content)) = (name, content) {
                steps.push(Step::Invoke(ToolCall::WriteFile {
                    path: clean_name(&name),
                    content: clean_content(&content),
                }));
            }
        }

        if has_delete {
            if let Some(name) = DELETE_FILENAME.first(prompt) {
                steps.push(Step::Invoke(ToolCall::DeleteFile { path: clean_name(&name) }));
            }
        }

        if LIST_TRIGGERS.matches(&lowered) && !(has_delete || has_write || has_read) {
            let path = LIST_PATH.first(prompt).map(|p| clean_name(&p)).unwrap_or_else(|| ".".to_string());
            steps.push(Step::Invoke(ToolCall::ListFiles { path }));
        }

        if let Some(step) = self.plan_shell(prompt, &lowered) {
            steps.push(step);
        }

        if let Some(step) = plan_fetch(prompt, &lowered) {
            steps.push(step);
        }

        steps
    }

    fn plan_shell(&self, prompt: &str, lowered: &str) -> Option<Step> {
        let line_form = SHELL_LINE.captures(prompt).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());
        let has_trigger =
            SHELL_TRIGGERS.matches(lowered) || SHELL_SPLIT_TRIGGER.is_match(prompt) || line_form.is_some();

        if !self.shell.enabled {
            if has_trigger {
                log::info!("Shell command requested, but shell execution is disabled");
                let reason = if self.registry.sandbox().enabled() {
                    ToolError::ShellDisabled
                } else {
                    ToolError::ShellExecutionOff
                };
                return Some(Step::Notice { tool: ToolName::RunShell, text: reason.to_string() });
            }
            return None;
        }
        if !has_trigger && self.shell.require_trigger {
            return None;
        }

        let command = SHELL_QUOTED
            .first(prompt)
            .or(line_form)
            .or_else(|| {
                if has_trigger {
                    SHELL_BACKTICK.captures(prompt).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
                } else {
                    None
                }
            })?;

        match self.registry.commands().check(&command) {
            Ok(()) => Some(Step::Invoke(ToolCall::RunShell { command })),
            Err(e) => Some(Step::Notice { tool: ToolName::RunShell, text: e.to_string() }),
        }
    }
}

/// Marker mode: exact content between <<<CONTENT and <<<END, filename from the text before.
fn plan_marker(prompt: &str) -> Option<Step> {
    let caps = MARKER_BLOCK.captures(prompt)?;
    let block = caps.get(0)?;
    let content = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    let before = &prompt[..block.start()];

    match MARKER_FILENAME.first(before) {
        Some(name) if !content.is_empty() => {
            log::debug!("Marker write: file={} ({} bytes)", name, content.len());
            Some(Step::Invoke(ToolCall::WriteFile { path: clean_name(&name), content: content.to_string() }))
        }
        _ => {
            log::warn!("Marker block found but filename missing or content empty");
            Some(Step::Notice {
                tool: ToolName::WriteFile,
                text: format!("ERROR: {} block found, but the filename is missing or the content is empty", MARKER_START),
            })
        }
    }
}

fn plan_fetch(prompt: &str, lowered: &str) -> Option<Step> {
    if !FETCH_TRIGGERS.matches(lowered) {
        return None;
    }

    let not_loopback = |url: &str| {
        let lowered = url.to_lowercase();
        if lowered.contains("127.0.0.1") || lowered.contains("localhost") {
            return false;
        }
        host_of(url).map(|h| !is_loopback_host(&h)).unwrap_or(false)
    };

    let url = FETCH_URL
        .find_iter(prompt)
        .map(|m| clean_url(m.as_str()))
        .find(|u| not_loopback(u))
        .or_else(|| {
            FETCH_WWW
                .find_iter(prompt)
                .map(|m| clean_url(m.as_str()))
                .find(|u| not_loopback(u))
        })
        .or_else(|| {
            FETCH_BARE
                .captures(prompt)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|u| not_loopback(u))
        })?;

    Some(Step::Invoke(ToolCall::Fetch { url }))
}

// ============================================================================
// TESTS
// ============================================================================
