//! Intent router — classifies each message to pick a prompt profile and
//! decide between the simple one-shot path and the full tool loop.
//!
//! Classification asks a fast model for a single category token at zero
//! temperature; any provider hiccup falls back to keyword heuristics.
//! Immediate-action messages (reminders, weather, quick lookups) are always
//! marked complex so the tool loop runs regardless of what the model said.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use kestrel_core::types::Message;
use kestrel_providers::{LlmProvider, LlmRequestConfig};

use crate::lexicon;

static CATEGORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(CODING|CHAT|RESEARCH|GENERAL)\b").unwrap());

/// System prompt profile selected per message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    Coding,
    Chat,
    Research,
    General,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Coding => "CODING",
            Profile::Chat => "CHAT",
            Profile::Research => "RESEARCH",
            Profile::General => "GENERAL",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "CODING" => Some(Profile::Coding),
            "CHAT" => Some(Profile::Chat),
            "RESEARCH" => Some(Profile::Research),
            "GENERAL" => Some(Profile::General),
            _ => None,
        }
    }
}

/// Routing outcome for one message.
#[derive(Clone, Copy, Debug)]
pub struct RouteDecision {
    pub profile: Profile,
    pub is_complex: bool,
}

/// Classifies messages with a cheap LLM call plus keyword overrides.
pub struct IntentRouter {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl IntentRouter {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        IntentRouter {
            provider,
            model: model.into(),
        }
    }

    /// Classify `content` and decide the execution route.
    pub async fn route(&self, content: &str) -> RouteDecision {
        let trimmed = content.trim();
        if trimmed.chars().count() < 5 {
            return RouteDecision {
                profile: Profile::General,
                is_complex: false,
            };
        }

        let lowered = trimmed.to_lowercase();
        let immediate = lexicon::is_immediate_action(&lowered);

        let profile = self.classify(trimmed).await;
        let is_complex = immediate || self.heuristic_complex(&lowered, profile);

        info!(
            profile = profile.as_str(),
            is_complex = is_complex,
            immediate = immediate,
            "route decision"
        );
        RouteDecision {
            profile,
            is_complex,
        }
    }

    async fn classify(&self, content: &str) -> Profile {
        let preview: String = content.chars().take(1000).collect();
        let prompt = format!(
            "Classify the following user message into exactly one of these categories:\n\
             - CODING: Requests to write, debug, explain, or modify code.\n\
             - CHAT: Casual conversation, greetings, personality-based interaction.\n\
             - RESEARCH: Requests to search the web, summarize news, or find facts.\n\
             - GENERAL: Tasks that don't fit the above (e.g. \"remind me\", \"what time is it\").\n\n\
             User message:\n\"{preview}\"\n\n\
             Reply with ONLY the category name (e.g. CODING). Do not add punctuation or explanation."
        );

        let config = LlmRequestConfig {
            max_tokens: 10,
            temperature: 0.0,
        };
        match self
            .provider
            .chat(&[Message::user(prompt)], None, &self.model, &config)
            .await
        {
            Ok(response) => {
                let answer = response.content_str().trim().to_uppercase();
                CATEGORY_RE
                    .captures(&answer)
                    .and_then(|c| Profile::from_token(c.get(1).unwrap().as_str()))
                    .unwrap_or(Profile::General)
            }
            Err(e) => {
                warn!(error = %e, "intent classification failed, using keyword fallback");
                self.keyword_profile(&content.to_lowercase())
            }
        }
    }

    /// Keyword fallback when the classifier model is unavailable.
    fn keyword_profile(&self, lowered: &str) -> Profile {
        const CODING_HINTS: &[&str] = &[
            "code", "function", "bug", "compile", "error", "rust", "python", "refactor", "debug",
        ];
        const RESEARCH_HINTS: &[&str] =
            &["search", "find out", "news", "latest", "summarize", "cari"];
        if lexicon::contains_any(lowered, CODING_HINTS) {
            Profile::Coding
        } else if lexicon::contains_any(lowered, RESEARCH_HINTS) {
            Profile::Research
        } else {
            Profile::General
        }
    }

    /// Heuristic complexity: coding and research tasks get the tool loop.
    fn heuristic_complex(&self, lowered: &str, profile: Profile) -> bool {
        match profile {
            Profile::Coding | Profile::Research => true,
            Profile::Chat => false,
            Profile::General => {
                const MULTI_STEP_HINTS: &[&str] =
                    &["then", "after that", "lalu", "kemudian", "setelah itu", "and also"];
                lexicon::contains_any(lowered, MULTI_STEP_HINTS)
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
