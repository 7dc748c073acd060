//! Context builder — assembles the message list for one LLM call under a
//! token budget.
//!
//! The budget reserves 80% of the model context and splits it into shares:
//! system 30%, memory 15%, skills 15%, history 30%, current 10%. Components
//! over budget are truncated with a marker carrying the dropped token count;
//! history is trimmed from the oldest end. The system message always lands
//! at index 0 and the current user turn is always last.

use std::path::PathBuf;

use base64::Engine;
use chrono::Utc;
use tracing::{debug, warn};

use kestrel_core::types::{ContentPart, ImageUrl, MediaAttachment, Message, ToolCall};

use crate::router::Profile;
use crate::tokens;

// ─────────────────────────────────────────────
// Token budget
// ─────────────────────────────────────────────

/// Budgeted context component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    System,
    Memory,
    Skills,
    History,
    Current,
}

impl Component {
    fn share(&self) -> f64 {
        match self {
            Component::System => 0.30,
            Component::Memory => 0.15,
            Component::Skills => 0.15,
            Component::History => 0.30,
            Component::Current => 0.10,
        }
    }
}

/// Splits the usable context window into per-component token budgets.
pub struct TokenBudget {
    pub max_context: usize,
    /// 80% of `max_context`; the rest is response + safety margin.
    pub available: usize,
}

impl TokenBudget {
    pub fn new(max_context: usize) -> Self {
        TokenBudget {
            max_context,
            available: (max_context as f64 * 0.8) as usize,
        }
    }

    pub fn budget_for(&self, component: Component) -> usize {
        (self.available as f64 * component.share()) as usize
    }

    /// Truncate `text` to its component budget. The marker counts the
    /// dropped tokens so the model knows content is missing.
    pub fn truncate_to_budget(&self, text: &str, component: Component) -> (String, bool) {
        let budget = self.budget_for(component);
        let total = tokens::count_tokens(text);
        if total <= budget {
            return (text.to_string(), false);
        }

        // Reserve room for the marker itself.
        let keep = budget.saturating_sub(10);
        let kept = tokens::truncate_to_tokens(text, keep);
        let dropped = total - tokens::count_tokens(&kept);
        (
            format!("{kept}\n\n[... truncated {dropped} tokens to fit budget ...]"),
            true,
        )
    }

    /// Trim `history` from the oldest end until it fits `budget` tokens.
    pub fn truncate_history(&self, history: &[Message], budget: usize) -> Vec<Message> {
        let mut kept: Vec<Message> = Vec::new();
        let mut used = 0usize;

        for msg in history.iter().rev() {
            let cost = tokens::count_tokens(msg.text_content());
            if used + cost > budget {
                break;
            }
            kept.push(msg.clone());
            used += cost;
        }
        kept.reverse();
        kept
    }
}

// ─────────────────────────────────────────────
// Profiles
// ─────────────────────────────────────────────

fn profile_block(profile: Profile) -> &'static str {
    match profile {
        Profile::Coding => {
            "# Role: Senior Software Engineer\n\
             You are an expert software engineer. Focus on code quality, correctness, and best practices.\n\
             - When writing code, ensure it is production-ready and documented.\n\
             - Prefer editing existing files over creating new ones.\n\
             - Read code with the `read_file` tool before modifying it."
        }
        Profile::Chat => {
            "# Role: Friendly Assistant\n\
             You are a warm, engaging AI assistant. Focus on conversation and personality.\n\
             - Be concise but friendly.\n\
             - Skip technical depth unless asked."
        }
        Profile::Research => {
            "# Role: Research Analyst\n\
             You are a thorough researcher. Focus on accuracy, citations, and comprehensive answers.\n\
             - Verify facts with the web tools when available.\n\
             - Cite specific sources where possible.\n\
             - Synthesize information from multiple results."
        }
        Profile::General => {
            "# Role: Capable Assistant\n\
             Handle the request directly. Use tools when they answer the question better than recall."
        }
    }
}

// ─────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────

/// Per-turn inputs to message construction.
pub struct TurnInputs<'a> {
    pub profile: Profile,
    pub history: &'a [Message],
    pub user_text: &'a str,
    pub media: &'a [MediaAttachment],
    pub channel: &'a str,
    pub chat_id: &'a str,
}

// ─────────────────────────────────────────────
// ContextBuilder
// ─────────────────────────────────────────────

/// Builds system prompts and bounded message lists.
pub struct ContextBuilder {
    workspace: PathBuf,
    agent_name: String,
    max_context: usize,
    /// Digest produced by the memory store, refreshed by the owner.
    memory_digest: Option<String>,
    /// Skill catalogue summary; full bodies are read on demand by the model.
    skills_summary: Option<String>,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>, agent_name: impl Into<String>, max_context: usize) -> Self {
        ContextBuilder {
            workspace: workspace.into(),
            agent_name: agent_name.into(),
            max_context,
            memory_digest: None,
            skills_summary: None,
        }
    }

    pub fn set_memory_digest(&mut self, digest: Option<String>) {
        self.memory_digest = digest;
    }

    pub fn set_skills_summary(&mut self, summary: Option<String>) {
        self.skills_summary = summary;
    }

    // ────────────── System prompt ──────────────

    fn identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        format!(
            "# Identity\n\n\
             You are **{name}**, an AI assistant reachable over chat channels.\n\n\
             - Date/time: {now}\n\
             - Runtime: Rust on {os}/{arch}\n\
             - Workspace: `{workspace}`\n\n\
             You have access to tools. Prefer using tools over guessing; answer \
             concisely once you have what you need.",
            name = self.agent_name,
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            workspace = self.workspace.display(),
        )
    }

    /// Assemble the system prompt under the per-component budgets.
    pub fn build_system_prompt(&self, profile: Profile, channel: &str, chat_id: &str) -> String {
        let budget = TokenBudget::new(self.max_context);
        let mut parts: Vec<String> = Vec::new();

        let core = format!("{}\n\n{}", self.identity(), profile_block(profile));
        let (core, truncated) = budget.truncate_to_budget(&core, Component::System);
        if truncated {
            warn!("system prompt truncated to fit budget");
        }
        parts.push(core);

        if let Some(ref digest) = self.memory_digest {
            let block = format!("# Long-term Memory\n\n{digest}");
            let (block, truncated) = budget.truncate_to_budget(&block, Component::Memory);
            if truncated {
                warn!("memory digest truncated to fit budget");
            }
            parts.push(block);
        }

        if let Some(ref summary) = self.skills_summary {
            let block = format!(
                "# Skills\n\n\
                 The following skills extend your capabilities. To use one, read its \
                 file with the `read_file` tool.\n\n{summary}"
            );
            let (block, truncated) = budget.truncate_to_budget(&block, Component::Skills);
            if truncated {
                warn!("skills summary truncated to fit budget");
            }
            parts.push(block);
        }

        parts.push(format!(
            "## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
        ));

        parts.join("\n\n---\n\n")
    }

    // ────────────── Message building ──────────────

    /// Build the full message list: system prompt, budgeted history, then
    /// the current user turn.
    pub fn build_messages(&self, inputs: &TurnInputs<'_>) -> Vec<Message> {
        let budget = TokenBudget::new(self.max_context);
        let mut messages = Vec::new();

        messages.push(Message::system(self.build_system_prompt(
            inputs.profile,
            inputs.channel,
            inputs.chat_id,
        )));

        let history_budget = budget.budget_for(Component::History);
        let kept = budget.truncate_history(inputs.history, history_budget);
        let dropped = inputs.history.len() - kept.len();
        if dropped > 0 {
            debug!(dropped = dropped, "dropped oldest history messages to fit budget");
        }
        messages.extend(kept);

        let (user_text, _) = budget.truncate_to_budget(inputs.user_text, Component::Current);
        let image_parts = encode_image_media(inputs.media);
        if image_parts.is_empty() {
            messages.push(Message::user(user_text));
        } else {
            let mut parts = image_parts;
            parts.push(ContentPart::Text { text: user_text });
            messages.push(Message::user_parts(parts));
        }

        messages
    }

    /// Append an assistant turn, keeping the tool-call pairing intact.
    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) {
        if tool_calls.is_empty() {
            if let Some(text) = content {
                messages.push(Message::assistant(text));
            }
        } else {
            messages.push(Message::assistant_with_tools(content, tool_calls));
        }
    }

    /// Append a tool result answering `tool_call_id`.
    pub fn add_tool_result(
        messages: &mut Vec<Message>,
        tool_call_id: &str,
        tool_name: &str,
        result: &str,
    ) {
        messages.push(Message::tool_result(tool_call_id, tool_name, result));
    }
}

// ─────────────────────────────────────────────
// Media encoding
// ─────────────────────────────────────────────

/// Encode image attachments as inline base64 parts. Only attachments whose
/// MIME type starts with `image/` and whose file exists are included.
fn encode_image_media(media: &[MediaAttachment]) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    for attachment in media {
        if !attachment.mime_type.starts_with("image/") {
            continue;
        }
        let Ok(data) = std::fs::read(&attachment.path) else {
            debug!(path = %attachment.path, "media file missing, skipping");
            continue;
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", attachment.mime_type, encoded),
                detail: None,
            },
        });
    }
    parts
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
