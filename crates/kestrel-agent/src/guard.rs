//! Context guard and compactor — overflow detection and history summarization.
//!
//! The guard flags message lists approaching the context window; the
//! compactor replaces everything but the newest messages with a single
//! summary produced by the provider. Compaction is fail-open: if the
//! summarization call fails, the old tail is discarded and only recent
//! messages survive.

use std::sync::Arc;

use tracing::{debug, error, info};

use kestrel_core::types::Message;
use kestrel_providers::{LlmProvider, LlmRequestConfig};

use crate::tokens;

/// Default safety buffer below the hard context limit.
const DEFAULT_BUFFER_TOKENS: usize = 4_000;

/// Messages kept verbatim through compaction.
pub const KEEP_RECENT: usize = 10;

// ─────────────────────────────────────────────
// Guard
// ─────────────────────────────────────────────

/// Detects context-window overflow.
pub struct ContextGuard {
    max_tokens: usize,
    threshold: usize,
}

impl ContextGuard {
    pub fn new(max_tokens: usize, buffer_tokens: Option<usize>) -> Self {
        let buffer = buffer_tokens.unwrap_or(DEFAULT_BUFFER_TOKENS);
        ContextGuard {
            max_tokens,
            threshold: max_tokens.saturating_sub(buffer),
        }
    }

    /// Whether `messages` exceed the threshold and need compaction.
    pub fn check_overflow(&self, messages: &[Message]) -> bool {
        // Small per-message overhead for role markers and formatting.
        let total: usize = messages
            .iter()
            .map(|m| tokens::count_tokens(m.text_content()) + 4)
            .sum();
        debug!(tokens = total, max = self.max_tokens, "context size check");
        total > self.threshold
    }
}

// ─────────────────────────────────────────────
// Compactor
// ─────────────────────────────────────────────

/// Summarizes old history into one system message.
pub struct Compactor;

impl Compactor {
    /// Compact `messages`, keeping the newest `keep_recent` verbatim.
    ///
    /// The older prefix becomes a `[Conversation History Summary]` system
    /// message written by the provider at low temperature. On provider
    /// failure the prefix is dropped entirely.
    pub async fn compact(
        messages: Vec<Message>,
        provider: &Arc<dyn LlmProvider>,
        model: &str,
        keep_recent: usize,
    ) -> Vec<Message> {
        if messages.len() <= keep_recent {
            debug!("no compaction needed");
            return messages;
        }

        let split = messages.len() - keep_recent;
        let old = &messages[..split];
        let recent = messages[split..].to_vec();
        info!(old = old.len(), recent = recent.len(), "compacting history");

        let transcript = format_for_summary(old);
        let prompt = format!(
            "Summarize this conversation history concisely (max 200 words):\n\n\
             {transcript}\n\n\
             Focus on key topics, decisions, and context needed to continue the conversation."
        );

        let config = LlmRequestConfig {
            max_tokens: 500,
            temperature: 0.3,
        };
        match provider
            .chat(&[Message::user(prompt)], None, model, &config)
            .await
        {
            Ok(response) => {
                let summary = response
                    .content
                    .unwrap_or_else(|| "Previous conversation summary unavailable.".to_string());
                let mut out =
                    vec![Message::system(format!("[Conversation History Summary]\n{summary}"))];
                out.extend(recent);
                out
            }
            Err(e) => {
                error!(error = %e, "compaction failed, keeping recent messages only");
                recent
            }
        }
    }
}

/// Render old messages as a plain transcript for the summarizer.
fn format_for_summary(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for msg in messages {
        let role = match msg {
            Message::System { .. } => "SYSTEM",
            Message::User { .. } => "USER",
            Message::Assistant { .. } => "ASSISTANT",
            Message::Tool { .. } => "TOOL",
        };
        let text = msg.text_content();
        if !text.is_empty() {
            let preview: String = text.chars().take(500).collect();
            lines.push(format!("{role}: {preview}"));
        }
    }
    lines.join("\n\n")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
