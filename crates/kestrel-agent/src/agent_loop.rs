//! Agent loop — the orchestrator that turns inbound messages into replies.
//!
//! One logical worker consumes the bus one message at a time. Each turn:
//! slash-command and approval intercepts, session init and sentinel
//! marking, directive parsing, intent routing, context building, then
//! either a single-shot response or the full tool loop (see
//! [`crate::loop_core`]), and finally best-effort persistence and the
//! outbound reply.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use kestrel_core::bus::types::{InboundMessage, OutboundMessage, SystemEvent};
use kestrel_core::config::RuntimeConfig;
use kestrel_core::sentinel::format_recovery_message;
use kestrel_core::types::Session;
use kestrel_core::{
    CommandContext, CommandRouter, CrashSentinel, DirectiveParser, DirectiveSet, MessageBus,
    SessionStore,
};
use kestrel_providers::{LlmProvider, LlmRequestConfig};

use crate::commands;
use crate::context::ContextBuilder;
use crate::guard::ContextGuard;
use crate::lexicon;
use crate::resilience::ResilienceLayer;
use crate::router::{IntentRouter, Profile};
use crate::tools::cron::SchedulerPort;
use crate::tools::message::SendCallback;
use crate::tools::{
    CleanupTool, CronTool, ExecTool, MessageTool, ProcessMemoryTool, SystemInfoTool, ToolRegistry,
    WeatherTool,
};
use crate::truncator::ToolResultTruncator;

static APPROVAL_CMD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(approve|deny)(?:\s+(\w+))?$").unwrap());

/// How many history messages feed each turn.
pub(crate) const HISTORY_WINDOW: usize = 30;

/// Tool permissions derived from the elevated directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolPermissions {
    pub auto_approve: bool,
    pub restrict_to_workspace: bool,
    pub allow_high_risk: bool,
}

impl ToolPermissions {
    fn from_elevated(elevated: bool) -> Self {
        ToolPermissions {
            auto_approve: elevated,
            restrict_to_workspace: !elevated,
            allow_high_risk: elevated,
        }
    }
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The orchestrator. Owns the session for the duration of one turn.
pub struct AgentLoop {
    pub(crate) bus: Arc<MessageBus>,
    pub(crate) provider: Arc<dyn LlmProvider>,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) sentinel: CrashSentinel,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) context: ContextBuilder,
    pub(crate) guard: ContextGuard,
    pub(crate) truncator: ToolResultTruncator,
    pub(crate) intent: IntentRouter,
    pub(crate) resilience: Arc<Mutex<ResilienceLayer>>,
    pub(crate) commands: CommandRouter,
    pub(crate) directive_parser: DirectiveParser,
    pub(crate) scheduler: Option<Arc<dyn SchedulerPort>>,
    pub(crate) message_tool: Arc<MessageTool>,
    pub(crate) cron_tool: Option<Arc<CronTool>>,
    pub(crate) exec_tool: Arc<ExecTool>,
    /// Shared slot so `/switch` takes effect on the next turn.
    pub(crate) primary_model: Arc<std::sync::RwLock<String>>,
    pub(crate) fallback_models: Vec<String>,
    pub(crate) max_iterations: usize,
    pub(crate) request_config: LlmRequestConfig,
    pub(crate) admins: Vec<String>,
    /// Configured exec baselines; the elevated directive widens them per
    /// turn, never the other way around.
    pub(crate) exec_auto_approve: bool,
    pub(crate) exec_restrict_to_workspace: bool,
}

impl AgentLoop {
    /// Build the loop and its tool registry from configuration.
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        sessions: Arc<SessionStore>,
        sentinel: CrashSentinel,
        scheduler: Option<Arc<dyn SchedulerPort>>,
        config: RuntimeConfig,
    ) -> Self {
        let workspace = config
            .agent
            .workspace
            .clone()
            .unwrap_or_else(|| kestrel_core::utils::data_path().join("workspace"));

        let context = ContextBuilder::new(&workspace, &config.agent.name, config.agent.max_context);
        let guard = ContextGuard::new(config.agent.max_context, None);
        let truncator = ToolResultTruncator::new(config.agent.max_context, None);
        let intent = IntentRouter::new(provider.clone(), config.agent.model.clone());

        let resilience = Arc::new(Mutex::new(ResilienceLayer::new(
            config.provider.api_keys.clone(),
            config.agent.model.clone(),
            config.agent.fallback_models.clone(),
        )));

        // Tools. The message tool publishes through the bus; per-session
        // tools are rebound at turn start.
        let mut tools = ToolRegistry::new();
        tools.attach_bus(bus.clone());

        let bus_for_send = bus.clone();
        let send_callback: SendCallback = Arc::new(move |msg| {
            let bus = bus_for_send.clone();
            Box::pin(async move {
                bus.publish_outbound(msg)
                    .await
                    .map_err(|e| anyhow::anyhow!("bus closed: {e}"))
            })
        });
        let message_tool = Arc::new(MessageTool::new(Some(send_callback)));
        tools.register(message_tool.clone());

        let exec_tool = Arc::new(ExecTool::new(
            workspace,
            Some(config.tools.exec.timeout_secs),
            config.tools.exec.restrict_to_workspace,
            config.tools.exec.auto_approve,
            config.tools.exec.whitelist.clone(),
        ));
        tools.register(exec_tool.clone());

        tools.register(Arc::new(WeatherTool::new()));
        tools.register(Arc::new(SystemInfoTool));
        tools.register(Arc::new(CleanupTool));
        tools.register(Arc::new(ProcessMemoryTool));

        let cron_tool = scheduler.as_ref().map(|s| Arc::new(CronTool::new(s.clone())));
        if let Some(ref cron) = cron_tool {
            tools.register(cron.clone());
        }

        let primary_model = Arc::new(std::sync::RwLock::new(config.agent.model.clone()));
        let mut command_router = CommandRouter::new();
        commands::register_builtins(
            &mut command_router,
            provider.clone(),
            resilience.clone(),
            sessions.clone(),
            primary_model.clone(),
            config.agent.fallback_models.clone(),
        );

        info!(
            model = %config.agent.model,
            tools = tools.len(),
            max_iterations = config.agent.max_iterations,
            "agent loop initialized"
        );

        Self {
            bus,
            provider,
            sessions,
            sentinel,
            tools: Arc::new(tools),
            context,
            guard,
            truncator,
            intent,
            resilience,
            commands: command_router,
            directive_parser: DirectiveParser::new(),
            scheduler,
            message_tool,
            cron_tool,
            exec_tool,
            primary_model,
            fallback_models: config.agent.fallback_models,
            max_iterations: config.agent.max_iterations,
            request_config: LlmRequestConfig {
                max_tokens: config.agent.max_tokens,
                temperature: config.agent.temperature,
            },
            admins: config.admins,
            exec_auto_approve: config.tools.exec.auto_approve,
            exec_restrict_to_workspace: config.tools.exec.restrict_to_workspace,
        }
    }

    // ────────────── Event loop ──────────────

    /// Consume inbound messages until the bus closes.
    pub async fn run(&self) {
        let run_id = "agent-loop";
        let seq = self.bus.next_seq(run_id);
        self.bus
            .emit_system_event(SystemEvent::lifecycle(run_id, seq, "start"));

        self.announce_crash_recovery().await;

        info!("agent loop started, waiting for messages");
        loop {
            match self.bus.consume_inbound().await {
                Some(msg) => {
                    let session_key = msg.session_key();
                    debug!(session_key = %session_key, "received message");

                    match self.process(&msg).await {
                        Ok(response) => {
                            if !response.content.is_empty() {
                                if let Err(e) = self.bus.publish_outbound(response).await {
                                    error!(error = %e, "failed to publish outbound message");
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, session_key = %session_key, "message processing error");
                            let err_msg = OutboundMessage::new(
                                &msg.channel,
                                &msg.chat_id,
                                format!("I encountered an error: {e}"),
                            );
                            let _ = self.bus.publish_outbound(err_msg).await;
                        }
                    }
                }
                None => {
                    info!("inbound channel closed, agent loop exiting");
                    break;
                }
            }
        }

        let seq = self.bus.next_seq(run_id);
        self.bus
            .emit_system_event(SystemEvent::lifecycle(run_id, seq, "stop"));
        // Clean exit: no turn in flight.
        self.sentinel.clear();
    }

    /// On startup, turn a leftover sentinel into a recovery notice for the
    /// affected session.
    pub(crate) async fn announce_crash_recovery(&self) {
        let Some(record) = self.sentinel.check_for_crash() else {
            return;
        };

        let run_id = "agent-loop";
        let seq = self.bus.next_seq(run_id);
        self.bus
            .emit_system_event(SystemEvent::lifecycle(run_id, seq, "crash_recovery"));

        let (channel, chat_id) = match record.session_id.split_once(':') {
            Some((channel, chat_id)) => (channel.to_string(), chat_id.to_string()),
            None => ("cli".to_string(), record.session_id.clone()),
        };
        let notice = OutboundMessage::new(channel, chat_id, format_recovery_message(&record));
        if let Err(e) = self.bus.publish_outbound(notice).await {
            warn!(error = %e, "failed to publish crash recovery notice");
        }
    }

    // ────────────── Turn pipeline ──────────────

    /// Process one inbound message into an outbound reply.
    pub async fn process(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        // 1. Synthetic system messages (cron callbacks, alerts).
        if msg.channel == "system" {
            return self.process_system_message(msg).await;
        }

        // 2. Exec approval commands, handled before any model involvement.
        if let Some((action, approval_id)) = Self::parse_approval_command(&msg.content) {
            return self.process_exec_approval(msg, action, approval_id).await;
        }

        // 3. Registered slash commands.
        if self.commands.is_command(&msg.content) {
            let ctx = CommandContext {
                message: msg.content.clone(),
                args: Vec::new(),
                sender_id: msg.sender_id.clone(),
                channel: msg.channel.clone(),
                chat_id: msg.chat_id.clone(),
                session_key: msg.session_key(),
                is_admin: self.admins.contains(&msg.sender_id),
            };
            if let Some(result) = self.commands.route(&msg.content, ctx).await {
                return Ok(OutboundMessage::new(&msg.channel, &msg.chat_id, result));
            }
        }

        // 4. Session init, sentinel, tool context.
        let mut session = self.init_session(msg).await;

        // 5. Directives.
        let (clean_body, directives) = self.directive_parser.parse(&msg.content);
        let effective_content = if clean_body.is_empty() {
            msg.content.clone()
        } else {
            clean_body
        };
        if directives.has_any() {
            info!(directives = %directives.summary(), "directives active");
            // Only the sticky flags persist; model/temp overrides apply to
            // this turn alone.
            session.metadata.insert(
                "directives".to_string(),
                json!({
                    "think": directives.think,
                    "verbose": directives.verbose,
                    "elevated": directives.elevated,
                }),
            );
            self.sessions.save(&session);
        }

        // 6. History.
        let history = self.sessions.get_history(&msg.session_key(), HISTORY_WINDOW);

        // 7. Route + required tool.
        let mut decision = self.intent.route(&effective_content).await;
        let required_tool =
            crate::loop_core::enforcement::required_tool_for_query(&effective_content, &self.tools);

        // 8. Short-confirmation elevation: "ya" after an offer runs the loop.
        if !decision.is_complex && required_tool.is_none() {
            let bare = effective_content.trim().to_lowercase();
            if lexicon::SHORT_CONFIRMATIONS.contains(&bare.as_str()) {
                let last_assistant = history
                    .iter()
                    .rev()
                    .find(|m| m.is_assistant())
                    .map(|m| m.text_content().to_lowercase())
                    .unwrap_or_default();
                if lexicon::contains_any(&last_assistant, lexicon::OFFER_KEYWORDS) {
                    info!("elevating short confirmation to complex route");
                    decision.is_complex = true;
                }
            }
        }

        // 9. Context.
        let mut messages = self.context.build_messages(&crate::context::TurnInputs {
            profile: decision.profile,
            history: &history,
            user_text: &effective_content,
            media: &msg.media,
            channel: &msg.channel,
            chat_id: &msg.chat_id,
        });

        // 10. Execute.
        let final_content = if decision.is_complex || required_tool.is_some() {
            if required_tool.is_some() && !decision.is_complex {
                info!(tool = ?required_tool, "route override: simple -> complex (required tool)");
            }
            self.run_agent_loop(
                msg,
                &mut messages,
                &session,
                &directives,
                required_tool,
                &effective_content,
            )
            .await
        } else {
            self.run_simple_response(&directives, messages).await
        };

        // 11. Finalise.
        Ok(self.finalize_session(msg, &mut session, final_content))
    }

    /// Synthetic message path: `chat_id` encodes the origin as
    /// `channel:chat_id`; the reply routes back there.
    async fn process_system_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        info!(sender = %msg.sender_id, chat_id = %msg.chat_id, "processing system message");

        let (origin_channel, origin_chat) = match msg.chat_id.split_once(':') {
            Some((channel, chat)) => (channel.to_string(), chat.to_string()),
            None => ("cli".to_string(), msg.chat_id.clone()),
        };
        let session_key = format!("{origin_channel}:{origin_chat}");

        self.bind_tool_context(&origin_channel, &origin_chat).await;
        self.tools
            .set_run_id(&format!("msg-{session_key}-{}", msg.timestamp.timestamp_millis()));

        let session = self.sessions.get_or_create(&session_key);
        let history = self.sessions.get_history(&session_key, HISTORY_WINDOW);

        let mut messages = self.context.build_messages(&crate::context::TurnInputs {
            profile: Profile::General,
            history: &history,
            user_text: &msg.content,
            media: &[],
            channel: &origin_channel,
            chat_id: &origin_chat,
        });

        let final_content = self
            .run_agent_loop(
                msg,
                &mut messages,
                &session,
                &DirectiveSet::default(),
                None,
                &msg.content,
            )
            .await;

        let mut session = self.sessions.get_or_create(&session_key);
        session.messages.push(kestrel_core::types::Message::user(format!(
            "[System: {}] {}",
            msg.sender_id, msg.content
        )));
        if !final_content.is_empty() {
            session
                .messages
                .push(kestrel_core::types::Message::assistant(&final_content));
        }
        self.sessions.save(&session);

        Ok(OutboundMessage::new(origin_channel, origin_chat, final_content))
    }

    /// Process a message in a fully isolated session (scheduled jobs that
    /// must not touch user history).
    pub async fn process_isolated(&self, content: &str, job_id: &str) -> String {
        let session_key = if job_id.is_empty() {
            format!("isolated:{}", chrono::Utc::now().timestamp())
        } else {
            format!("isolated:cron:{job_id}")
        };
        let msg = InboundMessage::new("cli", "system", "direct", content)
            .with_session_key(session_key.clone());

        self.bind_tool_context("cli", "direct").await;
        let session = self.sessions.get_or_create(&session_key);

        let mut messages = self.context.build_messages(&crate::context::TurnInputs {
            profile: Profile::General,
            history: &[],
            user_text: content,
            media: &[],
            channel: "cli",
            chat_id: "direct",
        });

        self.run_agent_loop(
            &msg,
            &mut messages,
            &session,
            &DirectiveSet::default(),
            None,
            content,
        )
        .await
    }

    // ────────────── Approvals ──────────────

    pub(crate) fn parse_approval_command(content: &str) -> Option<(&'static str, Option<String>)> {
        let caps = APPROVAL_CMD_RE.captures(content.trim())?;
        let action = if caps.get(1).unwrap().as_str() == "approve" {
            "approve"
        } else {
            "deny"
        };
        let id = caps.get(2).map(|m| m.as_str().to_string());
        Some((action, id))
    }

    async fn process_exec_approval(
        &self,
        msg: &InboundMessage,
        action: &str,
        approval_id: Option<String>,
    ) -> Result<OutboundMessage> {
        let mut session = self.init_session(msg).await;
        let session_key = msg.session_key();
        let id = approval_id.as_deref();

        let reply = if action == "deny" {
            if self.exec_tool.clear_pending_approval(&session_key, id) {
                "Pending command approval denied.".to_string()
            } else {
                "No matching pending command approval found.".to_string()
            }
        } else {
            match self.exec_tool.consume_pending_approval(&session_key, id) {
                None => "No matching pending command approval found.".to_string(),
                Some(pending) => {
                    let mut params = HashMap::new();
                    params.insert("command".to_string(), json!(pending.command));
                    if let Some(dir) = pending.working_dir {
                        params.insert("working_dir".to_string(), json!(dir));
                    }
                    params.insert("_session_key".to_string(), json!(session_key));
                    params.insert("_approved_by_user".to_string(), json!(true));
                    self.tools.execute("exec", params).await
                }
            }
        };

        Ok(self.finalize_session(msg, &mut session, reply))
    }

    // ────────────── Session lifecycle ──────────────

    /// Prepare session and tool context before processing.
    pub(crate) async fn init_session(&self, msg: &InboundMessage) -> Session {
        let session_key = msg.session_key();
        let preview: String = msg.content.chars().take(80).collect();
        info!(from = %format!("{}:{}", msg.channel, msg.sender_id), preview = %preview, "processing message");

        let run_id = format!("msg-{session_key}-{}", msg.timestamp.timestamp_millis());
        self.tools.set_run_id(&run_id);

        let message_id = format!("{}:{}:{}", msg.channel, msg.chat_id, msg.sender_id);
        self.sentinel
            .mark_active(&session_key, &message_id, &msg.content);

        self.bind_tool_context(&msg.channel, &msg.chat_id).await;
        self.sessions.get_or_create(&session_key)
    }

    async fn bind_tool_context(&self, channel: &str, chat_id: &str) {
        self.message_tool.set_context(channel, chat_id).await;
        if let Some(ref cron) = self.cron_tool {
            cron.set_context(channel, chat_id).await;
        }
    }

    /// Persist final state and build the outbound reply. A failed save
    /// never blocks the reply; the sentinel is cleared on completion.
    pub(crate) fn finalize_session(
        &self,
        msg: &InboundMessage,
        session: &mut Session,
        final_content: String,
    ) -> OutboundMessage {
        let session_key = msg.session_key();

        if !session_key.starts_with("background:") {
            session
                .messages
                .push(kestrel_core::types::Message::user(&msg.content));
            if !final_content.is_empty() {
                session
                    .messages
                    .push(kestrel_core::types::Message::assistant(&final_content));
            }
            self.sessions.save(session);
        }

        self.sentinel.clear();
        OutboundMessage::new(&msg.channel, &msg.chat_id, final_content)
    }

    // ────────────── Directive helpers ──────────────

    /// Active directives for a session (persisted in its metadata).
    pub(crate) fn session_directives(&self, session: &Session) -> DirectiveSet {
        session
            .metadata
            .get("directives")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub(crate) fn tool_permissions(&self, session: &Session) -> ToolPermissions {
        ToolPermissions::from_elevated(self.session_directives(session).elevated)
    }

    /// Model chain for this turn: directive override (or primary), then the
    /// configured fallbacks.
    pub(crate) fn models_for_turn(&self, directives: &DirectiveSet) -> Vec<String> {
        let turn_model = directives
            .model
            .clone()
            .unwrap_or_else(|| self.primary_model.read().unwrap().clone());
        let mut models = vec![turn_model];
        for fallback in &self.fallback_models {
            if !models.contains(fallback) {
                models.push(fallback.clone());
            }
        }
        models
    }

    /// One-line progress note published before a tool runs.
    pub(crate) fn tool_status_message(
        tool_name: &str,
        args: &HashMap<String, serde_json::Value>,
    ) -> Option<String> {
        let arg = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or("?");
        match tool_name {
            "exec" => Some(format!("Running: `{}`", arg("command"))),
            "weather" => Some(format!("Checking weather in {}", arg("location"))),
            "cron" => Some("Scheduling task".to_string()),
            "get_system_info" => Some("Reading system specs".to_string()),
            "cleanup_system" => Some("Cleaning up disk space".to_string()),
            "get_process_memory" => Some("Checking process memory".to_string()),
            _ => None,
        }
    }

    /// Debug block appended to tool results in verbose mode.
    pub(crate) fn format_verbose_output(tool_name: &str, result: &str, tokens: usize) -> String {
        format!("\n\n[DEBUG] Tool: {tool_name}\n[DEBUG] Tokens: {tokens}\n[DEBUG] Result:\n{result}\n")
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
