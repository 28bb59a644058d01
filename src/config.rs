// LocalAgent Gate - Configuration
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Loads sandbox mode, domain policy, shell switches, generation backend
// and server binding from config/config.json. Missing keys take defaults.
// Hard bounds (timeouts, size caps, loop window) are compiled constants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// COMPILED BOUNDS — NOT CONFIGURABLE
// ============================================================================

/// Wall-clock limit for one shell command.
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// Request timeout for one outbound fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetched bodies are cut to this many bytes.
pub const FETCH_BODY_LIMIT: usize = 10_000;

/// Identical prompts inside this window count as repeats.
pub const LOOP_WINDOW: Duration = Duration::from_secs(2);

/// Repeats tolerated inside the window before blocking.
pub const MAX_REPEATS: u32 = 1;

/// Fingerprints idle longer than this are evicted.
pub const FINGERPRINT_RETENTION: Duration = Duration::from_secs(60);

/// Master configuration loaded from config/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub sandbox: bool,
    pub sandbox_path: String,
    pub allowed_domains: Vec<String>,
    pub auto_whitelist_enabled: bool,
    pub auto_whitelist_file: String,
    pub shell_execution: ShellConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// None = enabled iff sandbox is off
    pub enabled: Option<bool>,
    pub require_explicit_trigger: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sandbox: true,
            sandbox_path: "~/localagent_sandbox".to_string(),
            allowed_domains: vec![
                "example.com".to_string(),
                "github.com".to_string(),
                "ubuntu.com".to_string(),
                "wikipedia.org".to_string(),
            ],
            auto_whitelist_enabled: false,
            auto_whitelist_file: "config/domain_whitelist.json".to_string(),
            shell_execution: ShellConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self { enabled: None, require_explicit_trigger: true }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1:8b-instruct-q4_K_M".to_string(),
            timeout_secs: 60,
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8001, workers: 4 }
    }
}

impl AgentConfig {
    /// Load config from JSON file, falling back to defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            log::warn!("Config not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save config to JSON file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sandbox root with a leading `~` expanded.
    pub fn sandbox_root(&self) -> PathBuf {
        crate::paths::expand_home(&self.sandbox_path)
    }

    /// Learned-domain document location. Relative paths hang off the project root.
    pub fn whitelist_path(&self) -> PathBuf {
        let p = crate::paths::expand_home(&self.auto_whitelist_file);
        if p.is_absolute() {
            p
        } else {
            crate::paths::project_root().join(p)
        }
    }

    /// A `"*"` entry in allowed_domains switches the domain policy to wildcard mode.
    pub fn wildcard_domains(&self) -> bool {
        self.allowed_domains.iter().any(|d| d.trim() == "*")
    }

    /// Static allow-list without the wildcard marker, lowercased.
    pub fn static_domains(&self) -> Vec<String> {
        self.allowed_domains
            .iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty() && d != "*")
            .collect()
    }

    pub fn shell_enabled(&self) -> bool {
        self.shell_execution.enabled.unwrap_or(!self.sandbox)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_locked_down() {
        let config = AgentConfig::default();
        assert!(config.sandbox);
        assert!(!config.shell_enabled(), "shell follows sandbox when unset");
        assert!(!config.wildcard_domains());
        assert!(config.shell_execution.require_explicit_trigger);
        assert_eq!(config.server.port, 8001);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"sandbox": false, "llm": {"model": "tiny"}}"#).unwrap();
        assert!(!config.sandbox);
        assert!(config.shell_enabled());
        assert_eq!(config.llm.model, "tiny");
        assert_eq!(config.llm.timeout_secs, 60);
        assert_eq!(config.allowed_domains.len(), 4);
    }

    #[test]
    fn explicit_shell_flag_overrides_sandbox_default() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"sandbox": false, "shell_execution": {"enabled": false}}"#).unwrap();
        assert!(!config.shell_enabled());
    }

    #[test]
    fn wildcard_entry_is_split_from_static_list() {
        let config = AgentConfig {
            allowed_domains: vec!["*".into(), "GitHub.com".into()],
            ..AgentConfig::default()
        };
        assert!(config.wildcard_domains());
        assert_eq!(config.static_domains(), vec!["github.com".to_string()]);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/config.json");
        let mut config = AgentConfig::default();
        config.server.workers = 9;
        config.save(&path).unwrap();
        let loaded = AgentConfig::load(&path).unwrap();
        assert_eq!(loaded.server.workers, 9);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AgentConfig::load(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.sandbox);
    }
}
