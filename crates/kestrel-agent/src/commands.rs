//! Built-in slash commands.
//!
//! Handlers capture Arc-shared components (resilience, sessions, the model
//! slot) — never the loop itself, so commands stay usable from any turn
//! without reference cycles.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::Mutex;

use kestrel_core::types::Message;
use kestrel_core::{CommandHandler, CommandRouter, SessionStore};
use kestrel_providers::{LlmProvider, LlmRequestConfig};

use crate::resilience::ResilienceLayer;
use crate::tools::base::Tool;
use crate::tools::SystemInfoTool;

/// Register the built-in command set.
pub fn register_builtins(
    router: &mut CommandRouter,
    provider: Arc<dyn LlmProvider>,
    resilience: Arc<Mutex<ResilienceLayer>>,
    sessions: Arc<SessionStore>,
    primary_model: Arc<RwLock<String>>,
    fallback_models: Vec<String>,
) {
    let started_at = Instant::now();

    // /help — static list; kept in sync with the registrations below.
    let help: CommandHandler = Arc::new(|_ctx| {
        Box::pin(async move {
            Ok("Available commands:\n\
                  /help — this list\n\
                  /status — models, keys, sessions\n\
                  /benchmark [models…] — time a ping per model\n\
                  /switch <model> — change the primary model\n\
                  /doctor [fix] — run health checks\n\
                  /update [check] — self-update (admin)\n\
                  /restart — restart the process (admin)\n\
                  /sysinfo — host hardware specs\n\
                  /uptime — time since start\n\
                  /clip <text> — save text to the clipboard file\n\
                  /approve <id>, /deny <id> — resolve a pending command"
                .to_string())
        })
    });
    router.register("/help", help, "Show available commands", false);

    // /status
    {
        let resilience = resilience.clone();
        let sessions = sessions.clone();
        let primary_model = primary_model.clone();
        let handler: CommandHandler = Arc::new(move |_ctx| {
            let resilience = resilience.clone();
            let sessions = sessions.clone();
            let primary_model = primary_model.clone();
            Box::pin(async move {
                let model = primary_model.read().unwrap().clone();
                let resilience_status = resilience.lock().await.status();
                let session_count = sessions.list_sessions().len();
                Ok(format!(
                    "Primary model: {model}\n{resilience_status}\nStored sessions: {session_count}"
                ))
            })
        });
        router.register("/status", handler, "Show runtime status", false);
    }

    // /benchmark [models…]
    {
        let provider = provider.clone();
        let primary_model = primary_model.clone();
        let chain = fallback_models.clone();
        let handler: CommandHandler = Arc::new(move |ctx| {
            let provider = provider.clone();
            let primary_model = primary_model.clone();
            let chain = chain.clone();
            Box::pin(async move {
                let mut models: Vec<String> = if ctx.args.is_empty() {
                    let mut all = vec![primary_model.read().unwrap().clone()];
                    all.extend(chain);
                    all
                } else {
                    ctx.args.clone()
                };
                models.dedup();

                let config = LlmRequestConfig {
                    max_tokens: 5,
                    temperature: 0.0,
                };
                let mut lines = vec!["Benchmark results:".to_string()];
                for model in models {
                    let start = Instant::now();
                    let outcome = provider
                        .chat(&[Message::user("ping")], None, &model, &config)
                        .await;
                    let elapsed = start.elapsed().as_millis();
                    match outcome {
                        Ok(_) => lines.push(format!("  {model}: ok ({elapsed} ms)")),
                        Err(e) => lines.push(format!("  {model}: failed ({e})")),
                    }
                }
                Ok(lines.join("\n"))
            })
        });
        router.register("/benchmark", handler, "Time a ping per model", false);
    }

    // /switch <model>
    {
        let primary_model = primary_model.clone();
        let handler: CommandHandler = Arc::new(move |ctx| {
            let primary_model = primary_model.clone();
            Box::pin(async move {
                let Some(model) = ctx.args.first() else {
                    return Ok("Usage: /switch <model>".to_string());
                };
                let previous = {
                    let mut slot = primary_model.write().unwrap();
                    std::mem::replace(&mut *slot, model.clone())
                };
                Ok(format!("Switched primary model: {previous} -> {model}"))
            })
        });
        router.register("/switch", handler, "Change the primary model", false);
    }

    // /doctor [fix]
    {
        let resilience = resilience.clone();
        let sessions = sessions.clone();
        let handler: CommandHandler = Arc::new(move |ctx| {
            let resilience = resilience.clone();
            let sessions = sessions.clone();
            Box::pin(async move {
                let fix = ctx.args.first().map(String::as_str) == Some("fix");
                let mut lines = vec!["Health check:".to_string()];

                let keys_available = resilience.lock().await.keys.available_count();
                lines.push(if keys_available > 0 {
                    format!("  [ok] API keys: {keys_available} available")
                } else {
                    "  [warn] API keys: none available".to_string()
                });

                // Session storage must be writable for durable history.
                let probe_key = "background:doctor-probe";
                let mut probe = sessions.get_or_create(probe_key);
                probe.messages.push(Message::user("probe"));
                sessions.save(&probe);
                sessions.delete(probe_key);
                lines.push("  [ok] session store responds".to_string());

                if fix {
                    lines.push("  fix: nothing to repair".to_string());
                }
                Ok(lines.join("\n"))
            })
        });
        router.register("/doctor", handler, "Run health checks", false);
    }

    // /update [check] (admin)
    {
        let handler: CommandHandler = Arc::new(|ctx| {
            Box::pin(async move {
                let check_only = ctx.args.first().map(String::as_str) == Some("check");
                let version = env!("CARGO_PKG_VERSION");
                if check_only {
                    Ok(format!("Current version: {version}. Update checks run via the supervisor."))
                } else {
                    Ok(format!(
                        "Running version {version}. Updates are applied by the supervisor; \
                         use /restart after deploying a new binary."
                    ))
                }
            })
        });
        router.register("/update", handler, "Self-update", true);
    }

    // /restart (admin)
    {
        let handler: CommandHandler = Arc::new(|_ctx| {
            Box::pin(async move {
                Ok("Restart requested. The supervisor will bring the process back up.".to_string())
            })
        });
        router.register("/restart", handler, "Restart the process", true);
    }

    // /sysinfo
    {
        let handler: CommandHandler = Arc::new(|_ctx| {
            Box::pin(async move {
                SystemInfoTool
                    .execute(crate::tools::base::ToolParams::new())
                    .await
            })
        });
        router.register("/sysinfo", handler, "Host hardware specs", false);
    }

    // /uptime
    {
        let handler: CommandHandler = Arc::new(move |_ctx| {
            Box::pin(async move {
                let secs = started_at.elapsed().as_secs();
                let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
                Ok(format!("Uptime: {h}h {m}m {s}s"))
            })
        });
        router.register("/uptime", handler, "Time since start", false);
    }

    // /clip <text>
    {
        let handler: CommandHandler = Arc::new(|ctx| {
            Box::pin(async move {
                if ctx.args.is_empty() {
                    return Ok("Usage: /clip <text>".to_string());
                }
                let text = ctx.args.join(" ");
                let path = kestrel_core::utils::data_path().join("clipboard.txt");
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, &text)?;
                Ok(format!("Saved {} chars to the clipboard file.", text.chars().count()))
            })
        });
        router.register("/clip", handler, "Save text to the clipboard file", false);
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
