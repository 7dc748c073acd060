//! Kestrel core — shared types and runtime services.
//!
//! This crate holds everything the agent loop and the channel adapters
//! both depend on:
//! - **types**: chat messages, tool calls, and the session record
//! - **bus**: typed inbound/outbound queues + system-event fan-out
//! - **session**: per-conversation history with JSONL persistence
//! - **sentinel**: crash detection via an on-disk in-flight marker
//! - **directives**: inline `/think`-style per-turn behaviour switches
//! - **commands**: slash-command registry intercepting messages pre-LLM
//! - **heartbeat**: injection of cron results and lifecycle events
//! - **config**: runtime configuration schema and loader

pub mod bus;
pub mod commands;
pub mod config;
pub mod directives;
pub mod heartbeat;
pub mod sentinel;
pub mod session;
pub mod types;
pub mod utils;

pub use bus::queue::MessageBus;
pub use commands::{CommandContext, CommandHandler, CommandRouter};
pub use config::RuntimeConfig;
pub use directives::{DirectiveParser, DirectiveSet};
pub use heartbeat::HeartbeatInjector;
pub use sentinel::{CrashSentinel, SentinelRecord};
pub use session::SessionStore;
