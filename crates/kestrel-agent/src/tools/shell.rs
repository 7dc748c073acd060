//! Shell tool — subprocess execution with a safety guard and an approval
//! flow.
//!
//! Dangerous patterns are always blocked. Everything else either matches the
//! whitelist (runs immediately), carries user approval, or is parked as a
//! `PendingApproval` the user resolves with `/approve <id>` or `/deny <id>`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use super::base::{optional_bool, optional_string, require_string, Tool, ToolParams};

/// Maximum output length before truncation (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Dangerous command patterns, always blocked regardless of approval.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

/// A command awaiting user approval.
#[derive(Clone, Debug)]
pub struct PendingApproval {
    pub id: String,
    pub session_key: String,
    pub command: String,
    pub working_dir: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────
// ExecTool
// ─────────────────────────────────────────────

/// Execute shell commands in a subprocess.
///
/// The three permission flags are interior-mutable: the loop rewrites them
/// per turn from the elevated directive and the configured baselines.
pub struct ExecTool {
    working_dir: PathBuf,
    timeout: Duration,
    restrict_to_workspace: AtomicBool,
    deny_regexes: Vec<Regex>,
    /// Skip the approval flow entirely.
    auto_approve: AtomicBool,
    /// Allow commands matching the dangerous-pattern list.
    allow_high_risk: AtomicBool,
    /// Command prefixes that never need approval.
    whitelist: Vec<String>,
    /// (session_key, id) → pending approval. At most one consumable record
    /// per pair; consumption removes it atomically.
    pending: Mutex<HashMap<(String, String), PendingApproval>>,
}

impl ExecTool {
    pub fn new(
        working_dir: PathBuf,
        timeout_secs: Option<u64>,
        restrict_to_workspace: bool,
        auto_approve: bool,
        whitelist: Vec<String>,
    ) -> Self {
        let deny_regexes: Vec<Regex> = DENY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        Self {
            working_dir,
            timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            restrict_to_workspace: AtomicBool::new(restrict_to_workspace),
            deny_regexes,
            auto_approve: AtomicBool::new(auto_approve),
            allow_high_risk: AtomicBool::new(false),
            whitelist,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Raise or lower auto-approval (elevated directive, config).
    pub fn set_auto_approve(&self, value: bool) {
        self.auto_approve.store(value, Ordering::SeqCst);
    }

    /// Toggle the workspace restriction (lifted under the elevated
    /// directive).
    pub fn set_restrict_to_workspace(&self, value: bool) {
        self.restrict_to_workspace.store(value, Ordering::SeqCst);
    }

    /// Toggle the dangerous-pattern guard (lifted under the elevated
    /// directive).
    pub fn set_allow_high_risk(&self, value: bool) {
        self.allow_high_risk.store(value, Ordering::SeqCst);
    }

    /// Consume a pending approval. First call returns the record; every
    /// later call for the same (session, id) returns `None`. Without an id,
    /// the most recent record for the session is consumed.
    pub fn consume_pending_approval(
        &self,
        session_key: &str,
        id: Option<&str>,
    ) -> Option<PendingApproval> {
        let mut pending = self.pending.lock().unwrap();
        match id {
            Some(id) => pending.remove(&(session_key.to_string(), id.to_string())),
            None => {
                let key = pending
                    .iter()
                    .filter(|((sk, _), _)| sk == session_key)
                    .max_by_key(|(_, record)| record.created_at)
                    .map(|(k, _)| k.clone())?;
                pending.remove(&key)
            }
        }
    }

    /// Drop a pending approval without running it. Returns whether a record
    /// existed.
    pub fn clear_pending_approval(&self, session_key: &str, id: Option<&str>) -> bool {
        self.consume_pending_approval(session_key, id).is_some()
    }

    fn is_whitelisted(&self, command: &str) -> bool {
        let trimmed = command.trim();
        self.whitelist.iter().any(|prefix| {
            trimmed == prefix
                || trimmed.starts_with(&format!("{prefix} "))
        })
    }

    /// Check whether a command is safe. Returns the block reason if not.
    fn guard_command(&self, command: &str, cwd: &str) -> Option<String> {
        let lower = command.to_lowercase();

        if !self.allow_high_risk.load(Ordering::SeqCst) {
            for re in &self.deny_regexes {
                if re.is_match(&lower) {
                    warn!(command = command, "command blocked by safety guard");
                    return Some(
                        "Error: Command blocked by safety guard (dangerous pattern detected)"
                            .into(),
                    );
                }
            }
        }

        if self.restrict_to_workspace.load(Ordering::SeqCst) {
            if command.contains("../") || command.contains("..\\") {
                return Some(
                    "Error: Command blocked — path traversal (../) not allowed in restricted mode"
                        .into(),
                );
            }

            let cwd_path = PathBuf::from(cwd);
            if let Ok(re) = Regex::new(r#"(?:/[^\s"']+|[A-Za-z]:\\[^\s"']+)"#) {
                for cap in re.find_iter(command) {
                    let p = PathBuf::from(cap.as_str());
                    let resolved = if p.exists() {
                        p.canonicalize().unwrap_or(p)
                    } else {
                        p
                    };
                    if !resolved.starts_with(&cwd_path) {
                        return Some(format!(
                            "Error: Command references path '{}' outside workspace",
                            cap.as_str()
                        ));
                    }
                }
            }
        }

        None
    }

    async fn run_command(&self, command: &str, cwd: &str) -> anyhow::Result<String> {
        info!(command = %command, cwd = %cwd, "executing shell command");

        let child = Command::new(if cfg!(target_os = "windows") { "cmd" } else { "sh" })
            .args(if cfg!(target_os = "windows") {
                vec!["/C", command]
            } else {
                vec!["-c", command]
            })
            .current_dir(cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn command: {e}"))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let code = output.status.code().unwrap_or(-1);

                let mut parts = Vec::new();
                if !stdout.is_empty() {
                    parts.push(stdout);
                }
                if !stderr.is_empty() {
                    parts.push(format!("STDERR:\n{stderr}"));
                }
                if code != 0 {
                    parts.push(format!("Exit code: {code}"));
                }

                let mut combined = if parts.is_empty() {
                    "(no output)".to_string()
                } else {
                    parts.join("\n")
                };
                if combined.len() > MAX_OUTPUT_LEN {
                    let dropped = combined.len() - MAX_OUTPUT_LEN;
                    combined.truncate(MAX_OUTPUT_LEN);
                    combined.push_str(&format!("\n... (truncated, {dropped} more chars)"));
                }
                Ok(combined)
            }
            Ok(Err(e)) => anyhow::bail!("Command failed: {e}"),
            Err(_) => Ok(format!(
                "Error: Command timed out after {} seconds",
                self.timeout.as_secs()
            )),
        }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. \
         Use this for running builds, tests, git, or any CLI tool."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory (defaults to workspace root)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: ToolParams) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;
        let working_dir = optional_string(&params, "working_dir");
        let cwd = working_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.to_string_lossy().to_string());

        // Implicit fields injected by the loop, stripped here.
        let session_key =
            optional_string(&params, "_session_key").unwrap_or_else(|| "cli:direct".into());
        let approved_by_user = optional_bool(&params, "_approved_by_user");

        // The deny list applies even to approved commands.
        if let Some(block) = self.guard_command(&command, &cwd) {
            return Ok(block);
        }

        let auto = self.auto_approve.load(Ordering::SeqCst);
        if !auto && !approved_by_user && !self.is_whitelisted(&command) {
            let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            let record = PendingApproval {
                id: id.clone(),
                session_key: session_key.clone(),
                command: command.clone(),
                working_dir,
                created_at: Utc::now(),
            };
            self.pending
                .lock()
                .unwrap()
                .insert((session_key, id.clone()), record);

            return Ok(format!(
                "Command requires approval:\n```\n{command}\n```\n\
                 Reply `/approve {id}` to run it or `/deny {id}` to cancel."
            ));
        }

        self.run_command(&command, &cwd).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
