//! Slash-command router — intercepts `/command arg1 arg2` messages before
//! they reach the LLM.
//!
//! Handlers are registered at startup; routing matches the first
//! whitespace-delimited token case-insensitively. An unknown command returns
//! `None` so the message falls through to the normal agent pipeline.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

/// Context passed to every command handler.
#[derive(Clone, Debug)]
pub struct CommandContext {
    /// Full original message.
    pub message: String,
    /// Arguments after the command name.
    pub args: Vec<String>,
    pub sender_id: String,
    pub channel: String,
    pub chat_id: String,
    pub session_key: String,
    /// Resolved by the loop from the configured admin list.
    pub is_admin: bool,
}

/// Async handler signature for a command.
pub type CommandHandler = Arc<
    dyn Fn(CommandContext) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>
        + Send
        + Sync,
>;

struct CommandEntry {
    handler: CommandHandler,
    description: String,
    admin_only: bool,
}

/// Routes slash commands to registered handlers.
pub struct CommandRouter {
    commands: HashMap<String, CommandEntry>,
    started_at: Instant,
}

impl CommandRouter {
    pub fn new() -> Self {
        CommandRouter {
            commands: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Register a command. The name is normalised to lowercase with a
    /// leading slash; re-registration replaces the previous handler.
    pub fn register(
        &mut self,
        name: &str,
        handler: CommandHandler,
        description: &str,
        admin_only: bool,
    ) {
        let normalized = if name.starts_with('/') {
            name.to_ascii_lowercase()
        } else {
            format!("/{}", name.to_ascii_lowercase())
        };
        self.commands.insert(
            normalized,
            CommandEntry {
                handler,
                description: description.to_string(),
                admin_only,
            },
        );
    }

    /// Whether `message` starts with a registered command.
    pub fn is_command(&self, message: &str) -> bool {
        let trimmed = message.trim();
        if !trimmed.starts_with('/') {
            return false;
        }
        let cmd = trimmed
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        self.commands.contains_key(&cmd)
    }

    /// Route a message to its command handler.
    ///
    /// Returns `None` when the message is not a registered command; the
    /// caller then proceeds to the LLM. Handler failures are reported to the
    /// user as the command's response, never propagated.
    pub async fn route(&self, message: &str, mut ctx: CommandContext) -> Option<String> {
        let trimmed = message.trim();
        if !trimmed.starts_with('/') {
            return None;
        }

        let mut parts = trimmed.split_whitespace();
        let cmd = parts.next()?.to_ascii_lowercase();
        let entry = self.commands.get(&cmd)?;

        if entry.admin_only && !ctx.is_admin {
            return Some(format!("Command `{cmd}` is restricted to admins."));
        }

        ctx.args = parts.map(String::from).collect();

        info!(command = %cmd, args = ?ctx.args, "executing slash command");
        match (entry.handler)(ctx).await {
            Ok(result) => Some(result),
            Err(e) => {
                error!(command = %cmd, error = %e, "command failed");
                Some(format!("Command `{cmd}` failed: {e}"))
            }
        }
    }

    /// Help text listing registered commands, sorted by name.
    pub fn help_text(&self) -> String {
        if self.commands.is_empty() {
            return "No commands registered.".to_string();
        }
        let mut names: Vec<&String> = self.commands.keys().collect();
        names.sort();

        let mut lines = vec!["Available commands:".to_string()];
        for name in names {
            let entry = &self.commands[name];
            let badge = if entry.admin_only { " (admin)" } else { "" };
            lines.push(format!("  {name} — {}{badge}", entry.description));
        }
        lines.join("\n")
    }

    /// Seconds since the router (i.e. the process) started.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(message: &str, is_admin: bool) -> CommandContext {
        CommandContext {
            message: message.to_string(),
            args: Vec::new(),
            sender_id: "u1".into(),
            channel: "cli".into(),
            chat_id: "direct".into(),
            session_key: "cli:direct".into(),
            is_admin,
        }
    }

    fn echo_handler() -> CommandHandler {
        Arc::new(|ctx| Box::pin(async move { Ok(format!("args: {}", ctx.args.join(","))) }))
    }

    #[test]
    fn test_is_command() {
        let mut router = CommandRouter::new();
        router.register("/status", echo_handler(), "Show status", false);
        assert!(router.is_command("/status"));
        assert!(router.is_command("  /STATUS now"));
        assert!(!router.is_command("/unknown"));
        assert!(!router.is_command("status"));
    }

    #[tokio::test]
    async fn test_route_with_args() {
        let mut router = CommandRouter::new();
        router.register("switch", echo_handler(), "Switch model", false);
        let result = router
            .route("/switch gpt-4o fast", ctx("/switch gpt-4o fast", false))
            .await;
        assert_eq!(result.as_deref(), Some("args: gpt-4o,fast"));
    }

    #[tokio::test]
    async fn test_route_unknown_returns_none() {
        let router = CommandRouter::new();
        assert!(router.route("/nope", ctx("/nope", false)).await.is_none());
        assert!(router.route("plain text", ctx("plain text", false)).await.is_none());
    }

    #[tokio::test]
    async fn test_case_insensitive_match() {
        let mut router = CommandRouter::new();
        router.register("/uptime", echo_handler(), "Uptime", false);
        assert!(router.route("/UPTIME", ctx("/UPTIME", false)).await.is_some());
    }

    #[tokio::test]
    async fn test_admin_gate() {
        let mut router = CommandRouter::new();
        router.register("/restart", echo_handler(), "Restart", true);

        let denied = router.route("/restart", ctx("/restart", false)).await.unwrap();
        assert!(denied.contains("restricted"));

        let allowed = router.route("/restart", ctx("/restart", true)).await.unwrap();
        assert!(allowed.starts_with("args:"));
    }

    #[tokio::test]
    async fn test_handler_error_reported_not_propagated() {
        let mut router = CommandRouter::new();
        let failing: CommandHandler =
            Arc::new(|_ctx| Box::pin(async { Err(anyhow::anyhow!("boom")) }));
        router.register("/doctor", failing, "Diagnose", false);

        let result = router.route("/doctor", ctx("/doctor", false)).await.unwrap();
        assert!(result.contains("failed"));
        assert!(result.contains("boom"));
    }

    #[test]
    fn test_help_text_sorted_with_admin_badge() {
        let mut router = CommandRouter::new();
        router.register("/update", echo_handler(), "Self-update", true);
        router.register("/help", echo_handler(), "This list", false);
        let help = router.help_text();
        let help_pos = help.find("/help").unwrap();
        let update_pos = help.find("/update").unwrap();
        assert!(help_pos < update_pos);
        assert!(help.contains("(admin)"));
    }

    #[test]
    fn test_uptime_counts() {
        let router = CommandRouter::new();
        assert!(router.uptime_seconds() < 5);
    }
}
