//! LLM provider layer for Kestrel.
//!
//! - [`traits::LlmProvider`] — the contract the agent loop calls through
//! - [`traits::ProviderError`] — typed failures the resilience layer
//!   dispatches on (rotate vs fallback vs surface)
//! - [`http_provider::HttpProvider`] — generic OpenAI-compatible HTTP client

pub mod http_provider;
pub mod traits;

pub use http_provider::HttpProvider;
pub use traits::{LlmProvider, LlmRequestConfig, ProviderError};
