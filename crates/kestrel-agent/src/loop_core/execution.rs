//! The execution runtime: simple responses, the bounded tool loop, model
//! fallback calls, and tool-call processing.
//!
//! Order inside the loop is load-bearing: required-tool enforcement runs
//! first, then refusal self-eval, then the critic. A draft that skipped a
//! required tool must never reach quality control.

use serde_json::json;
use tracing::{info, warn};

use kestrel_core::bus::types::{InboundMessage, OutboundMessage};
use kestrel_core::types::{LlmResponse, Message, Session, ToolDefinition};
use kestrel_core::DirectiveSet;

use crate::agent_loop::AgentLoop;
use crate::context::ContextBuilder;
use crate::guard::{Compactor, KEEP_RECENT};
use crate::loop_core::{enforcement, quality};
use crate::resilience::{KeyGuard, RecoveryAction};
use crate::tokens;

/// Reply when the iteration budget runs out without a final answer.
const BUDGET_EXHAUSTED_REPLY: &str = "I've completed processing but have no response to give.";

/// Injected at index 0 when think mode is active; once per turn.
const REASONING_PROMPT: &str =
    "Think step-by-step. Show your reasoning process explicitly before taking action. \
     Consider edge cases, alternative approaches, and potential issues. \
     When analyzing code, read related files to understand full context.";

impl AgentLoop {
    // ────────────── Simple path ──────────────

    /// One provider call, no tools, no critic. Used for chat-grade turns.
    pub(crate) async fn run_simple_response(
        &self,
        directives: &DirectiveSet,
        mut messages: Vec<Message>,
    ) -> String {
        let model = directives
            .model
            .clone()
            .unwrap_or_else(|| self.primary_model.read().unwrap().clone());

        if self.guard.check_overflow(&messages) {
            warn!("context overflow in simple response, compacting history");
            messages = Compactor::compact(messages, &self.provider, &model, KEEP_RECENT).await;
            if self.guard.check_overflow(&messages) {
                warn!("context still over limit after compaction");
            }
        }

        match self
            .provider
            .chat(&messages, None, &model, &self.request_config)
            .await
        {
            Ok(response) => response.content.unwrap_or_default(),
            Err(e) => format!("Sorry, an error occurred: {e}"),
        }
    }

    // ────────────── Agent loop ──────────────

    /// The bounded planner → executor → critic loop.
    pub(crate) async fn run_agent_loop(
        &self,
        msg: &InboundMessage,
        messages: &mut Vec<Message>,
        session: &Session,
        directives: &DirectiveSet,
        mut required_tool: Option<&'static str>,
        question: &str,
    ) -> String {
        let mut models = self.models_for_turn(directives);
        let model = models[0].clone();

        let session_directives = self.session_directives(session);
        let is_weak = quality::is_weak_model(&model);
        let max_critic_retries = if is_weak {
            quality::CRITIC_RETRIES_WEAK
        } else {
            quality::CRITIC_RETRIES
        };
        let critic_threshold = if is_weak {
            quality::CRITIC_THRESHOLD_WEAK
        } else {
            quality::CRITIC_THRESHOLD
        };

        let mut self_eval_retried = false;
        let mut critic_retried: u32 = 0;
        let mut tool_enforce_retried = false;
        let mut tools_executed = false;
        let mut first_score: Option<i32> = None;

        // Optional pre-execution plan, skipped for immediate-action turns.
        if let Some(plan) = quality::plan_task(&self.provider, &model, question).await {
            messages.push(Message::user(format!(
                "[SYSTEM PLAN]\n{plan}\n\nNow execute this plan step by step."
            )));
        }

        // Think mode: one reasoning prompt at index 0 for the whole turn,
        // never re-injected between iterations.
        if directives.think || session_directives.think {
            messages.insert(0, Message::system(REASONING_PROMPT));
        }

        let no_tools = directives.notools || session_directives.notools;

        let mut iteration = 0usize;
        while iteration < self.max_iterations {
            iteration += 1;

            if self.guard.check_overflow(messages) {
                warn!("context overflow detected, compacting history");
                let compacted =
                    Compactor::compact(std::mem::take(messages), &self.provider, &model, KEEP_RECENT)
                        .await;
                *messages = compacted;
                if self.guard.check_overflow(messages) {
                    warn!("context still over limit after compaction");
                }
            }

            let tool_defs = if no_tools {
                None
            } else {
                Some(self.tools.get_definitions())
            };
            let response = match self
                .call_llm_with_fallback(messages, &mut models, tool_defs.as_deref())
                .await
            {
                Ok(response) => response,
                Err(last_error) => {
                    return format!("Sorry, all available models failed. Last error: {last_error}");
                }
            };

            // ── Required-tool enforcement (before self-eval and critic) ──

            if let Some(req) = required_tool {
                if response.has_tool_calls() {
                    if response.tool_calls.iter().any(|tc| tc.name() == req) {
                        required_tool = None;
                        tool_enforce_retried = false;
                    } else {
                        let wrong: Vec<&str> =
                            response.tool_calls.iter().map(|tc| tc.name()).collect();
                        let wrong = wrong.join(", ");
                        if !tool_enforce_retried {
                            tool_enforce_retried = true;
                            warn!(
                                expected = req,
                                got = %wrong,
                                iteration = iteration,
                                "tool enforcement: wrong tools called"
                            );
                            if let Some(ref content) = response.content {
                                if !content.is_empty() {
                                    messages.push(Message::assistant(content));
                                }
                            }
                            messages.push(Message::user(format!(
                                "SYSTEM: This request REQUIRES the '{req}' tool. \
                                 You called [{wrong}] which is incorrect for this task. \
                                 Call the required tool now."
                            )));
                            continue;
                        }
                        if let Some(result) = enforcement::execute_required_tool_fallback(
                            &self.tools,
                            self.scheduler.as_ref(),
                            req,
                            &msg.content,
                        )
                        .await
                        {
                            warn!(tool = req, "deterministic fallback executed after wrong tool calls");
                            return result;
                        }
                    }
                }
            }

            if response.has_tool_calls() {
                tools_executed = true;
            }

            if let Some(req) = required_tool {
                if !response.has_tool_calls() {
                    if !tool_enforce_retried {
                        tool_enforce_retried = true;
                        warn!(
                            expected = req,
                            iteration = iteration,
                            "tool enforcement: text-only response"
                        );
                        if let Some(ref content) = response.content {
                            if !content.is_empty() {
                                messages.push(Message::assistant(content));
                            }
                        }
                        messages.push(Message::user(format!(
                            "SYSTEM: For this request, you MUST call the '{req}' tool now. \
                             Do not answer from memory or estimation. Return a tool call."
                        )));
                        continue;
                    }
                    if let Some(result) = enforcement::execute_required_tool_fallback(
                        &self.tools,
                        self.scheduler.as_ref(),
                        req,
                        &msg.content,
                    )
                    .await
                    {
                        warn!(tool = req, "deterministic fallback executed");
                        return result;
                    }
                }
            }

            // ── Quality control ──

            if let Some(content) = response.content.clone().filter(|c| !c.is_empty()) {
                if !response.has_tool_calls() && !self_eval_retried {
                    let (passed, nudge) =
                        quality::self_evaluate(&content, &self.tools.tool_names());
                    if !passed {
                        self_eval_retried = true;
                        warn!(iteration = iteration, "self-eval: refusal detected, retrying");
                        messages.push(Message::assistant(&content));
                        messages.push(Message::user(nudge.unwrap_or_default()));
                        continue;
                    }
                }

                if !response.has_tool_calls()
                    && critic_retried < max_critic_retries
                    && !is_weak
                    && !tools_executed
                {
                    let (score, feedback) =
                        quality::critic_evaluate(&self.provider, &model, question, &content).await;
                    if first_score.is_none() {
                        first_score = Some(score);
                    }
                    if score < critic_threshold {
                        critic_retried += 1;
                        warn!(
                            score = score,
                            threshold = critic_threshold,
                            retry = critic_retried,
                            "critic: below threshold, retrying"
                        );
                        messages.push(Message::assistant(&content));
                        messages.push(Message::user(format!(
                            "[CRITIC FEEDBACK - Score: {score}/10]\n{feedback}\n\n\
                             Please improve your response based on this feedback."
                        )));
                        continue;
                    }
                    if critic_retried > 0 {
                        info!(
                            first_score = first_score.unwrap_or(0),
                            final_score = score,
                            "critic retries improved the draft"
                        );
                    }
                }

                // Intermediate content: published non-final exactly when tool
                // calls remain; the terminal reply goes out via finalise.
                if response.has_tool_calls() {
                    let _ = self
                        .bus
                        .publish_outbound(OutboundMessage::new(&msg.channel, &msg.chat_id, &content))
                        .await;
                }
            }

            if response.has_tool_calls() {
                ContextBuilder::add_assistant_message(
                    messages,
                    response.content.clone(),
                    response.tool_calls.clone(),
                );
                self.process_tool_calls(msg, messages, &response, session).await;
            } else {
                return response.content.unwrap_or_default();
            }
        }

        BUDGET_EXHAUSTED_REPLY.to_string()
    }

    // ────────────── Provider calls ──────────────

    /// Call the provider through the resilience layer.
    ///
    /// Auth/rate errors rotate the key and retry the same model (while
    /// rotation actually yields a different key); retryable errors advance
    /// along the fused model chain. The provider's API key is swapped in a
    /// capture-and-restore bracket around every call.
    pub(crate) async fn call_llm_with_fallback(
        &self,
        messages: &[Message],
        models: &mut Vec<String>,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, String> {
        let mut last_error: Option<String> = None;
        let mut idx = 0usize;

        while idx < models.len() {
            let model = models[idx].clone();
            let active_key = { self.resilience.lock().await.keys.current_key() };

            let result = {
                let _bracket = active_key
                    .as_deref()
                    .map(|key| KeyGuard::swap(self.provider.as_ref(), key));
                self.provider
                    .chat(messages, tools, &model, &self.request_config)
                    .await
            };

            match result {
                Ok(response) => {
                    self.resilience.lock().await.on_success();
                    return Ok(response);
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "model call failed");
                    let action = { self.resilience.lock().await.handle_error(&e) };
                    last_error = Some(e.to_string());

                    match action {
                        RecoveryAction::RotatedKey(new_key) => {
                            // Retry the same model only when the pool really
                            // produced a different key.
                            if Some(&new_key) == active_key.as_ref() {
                                idx += 1;
                            }
                        }
                        RecoveryAction::ModelFallback(next_model) => {
                            if !models.contains(&next_model) {
                                models.push(next_model);
                            }
                            idx += 1;
                        }
                        RecoveryAction::Exhausted => {
                            idx += 1;
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| "no models available".to_string()))
    }

    // ────────────── Tool execution ──────────────

    /// Execute every tool call of one assistant turn: status update, implicit
    /// argument injection, dispatch, truncation, verbose debug block, and the
    /// paired tool-result message.
    pub(crate) async fn process_tool_calls(
        &self,
        msg: &InboundMessage,
        messages: &mut Vec<Message>,
        response: &LlmResponse,
        session: &Session,
    ) {
        // Apply the full permission map: elevated widens the configured
        // baselines for this turn only.
        let permissions = self.tool_permissions(session);
        self.exec_tool
            .set_auto_approve(self.exec_auto_approve || permissions.auto_approve);
        self.exec_tool.set_restrict_to_workspace(
            self.exec_restrict_to_workspace && permissions.restrict_to_workspace,
        );
        self.exec_tool.set_allow_high_risk(permissions.allow_high_risk);
        let verbose = self.session_directives(session).verbose;

        for tc in &response.tool_calls {
            let mut params = tc.parsed_arguments();

            if let Some(status) = Self::tool_status_message(tc.name(), &params) {
                let _ = self
                    .bus
                    .publish_outbound(OutboundMessage::status_update(
                        &msg.channel,
                        &msg.chat_id,
                        format!("_{status}_"),
                    ))
                    .await;
            }

            match tc.name() {
                "weather" | "cron" => {
                    params
                        .entry("context_text".to_string())
                        .or_insert_with(|| json!(msg.content));
                }
                "exec" => {
                    params.insert("_session_key".to_string(), json!(msg.session_key()));
                    params.insert("_channel".to_string(), json!(msg.channel));
                    params.insert("_chat_id".to_string(), json!(msg.chat_id));
                    params.insert(
                        "_agent_id".to_string(),
                        json!(msg.account_id.clone().unwrap_or_else(|| "default".into())),
                    );
                    params.insert(
                        "_thread_id".to_string(),
                        json!(msg.thread_id.clone().unwrap_or_default()),
                    );
                    params.insert(
                        "_peer_id".to_string(),
                        json!(msg.peer_id.clone().unwrap_or_default()),
                    );
                }
                _ => {}
            }

            info!(tool = tc.name(), "executing tool call");
            let result = self.tools.execute(tc.name(), params).await;

            let mut for_model = self.truncator.truncate(&result, tc.name());
            if verbose {
                let token_count = tokens::count_tokens(&result);
                for_model.push_str(&Self::format_verbose_output(tc.name(), &result, token_count));
            }

            ContextBuilder::add_tool_result(messages, &tc.id, tc.name(), &for_model);
        }
    }
}
