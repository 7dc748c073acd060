//! Kestrel agent — the core runtime turning inbound messages into replies.
//!
//! This crate contains:
//! - **agent_loop** + **loop_core**: the orchestrator and its execution,
//!   enforcement, and quality machinery
//! - **tools**: the tool trait, registry, and built-in tool families
//! - **context** / **guard** / **truncator**: token-budgeted context
//!   assembly and overflow handling
//! - **router**: intent classification (profile + simple/complex)
//! - **nlp** + **lexicon**: deterministic multilingual parsing for the
//!   required-tool fallback
//! - **resilience**: API key rotation and model fallback
//! - **commands**: built-in slash commands

pub mod agent_loop;
pub mod commands;
pub mod context;
pub mod guard;
pub mod lexicon;
pub mod loop_core;
pub mod nlp;
pub mod resilience;
pub mod router;
pub mod tokens;
pub mod tools;
pub mod truncator;

#[cfg(test)]
pub(crate) mod testing;

pub use agent_loop::AgentLoop;
pub use context::ContextBuilder;
pub use guard::{Compactor, ContextGuard};
pub use resilience::ResilienceLayer;
pub use router::{IntentRouter, Profile, RouteDecision};
pub use tools::{Tool, ToolRegistry};
pub use truncator::ToolResultTruncator;
