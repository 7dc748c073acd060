//! Runtime configuration — schema and loader.
//!
//! JSON on disk uses camelCase keys; Rust uses snake_case. A missing config
//! file yields defaults so the runtime can start with nothing but an API
//! key in the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::utils;

// ─────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────

/// Root configuration, loaded from `~/.kestrel/config.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    pub tools: ToolsConfig,
    /// Sender ids allowed to run admin commands.
    pub admins: Vec<String>,
}

/// Agent loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Primary model.
    pub model: String,
    /// Ordered fallback chain tried after the primary.
    pub fallback_models: Vec<String>,
    /// Hard cap on LLM ↔ tool iterations per turn.
    pub max_iterations: usize,
    /// Context window assumed for budgeting.
    pub max_context: usize,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Workspace root for file-oriented tools.
    pub workspace: Option<PathBuf>,
    /// Display name used in the system prompt.
    pub name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            fallback_models: Vec::new(),
            max_iterations: 20,
            max_context: 128_000,
            max_tokens: 4096,
            temperature: 0.7,
            workspace: None,
            name: "Kestrel".to_string(),
        }
    }
}

/// Provider endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// OpenAI-compatible API base URL.
    pub api_base: Option<String>,
    /// Key pool for rotation; the first key is primary.
    pub api_keys: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_keys: Vec::new(),
        }
    }
}

/// Tool execution settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub exec: ExecConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            exec: ExecConfig::default(),
        }
    }
}

/// Shell tool settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecConfig {
    /// Skip the approval flow entirely.
    pub auto_approve: bool,
    /// Command prefixes that never need approval.
    pub whitelist: Vec<String>,
    /// Subprocess timeout in seconds.
    pub timeout_secs: u64,
    /// Block commands referencing paths outside the workspace.
    pub restrict_to_workspace: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            auto_approve: false,
            whitelist: vec![
                "ls".to_string(),
                "cat".to_string(),
                "pwd".to_string(),
                "echo".to_string(),
                "git status".to_string(),
                "git log".to_string(),
            ],
            timeout_secs: 60,
            restrict_to_workspace: true,
        }
    }
}

// ─────────────────────────────────────────────
// Loader
// ─────────────────────────────────────────────

/// Default config path: `~/.kestrel/config.json`.
pub fn config_path() -> PathBuf {
    utils::data_path().join("config.json")
}

/// Load configuration from `path` (or the default location).
///
/// Missing file → defaults. A malformed file is an error: silently ignoring
/// a typo'd config is worse than refusing to start.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);

    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return Ok(RuntimeConfig::default());
    }

    let raw = std::fs::read_to_string(&path)?;
    let config: RuntimeConfig = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;
    info!(path = %path.display(), model = %config.agent.model, "config loaded");
    Ok(config)
}

/// Persist configuration to `path` (or the default location).
pub fn save_config(config: &RuntimeConfig, path: Option<&Path>) -> anyhow::Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(error = %e, "failed to create config directory");
        }
    }
    std::fs::write(&path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
