//! Provider contract — what the agent loop needs from an LLM backend.
//!
//! Failures are typed because the resilience layer recovers differently per
//! shape: auth/rate errors rotate the API key, server errors and timeouts
//! fall back to the next model, and everything else surfaces.

use async_trait::async_trait;
use kestrel_core::types::{LlmResponse, Message, ToolDefinition};

/// Per-call request parameters.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Typed provider failure.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Non-2xx HTTP response.
    #[error("provider returned {code}: {body}")]
    Status { code: u16, body: String },

    /// The call exceeded its deadline.
    #[error("provider call timed out")]
    Timeout,

    /// Could not reach the endpoint at all.
    #[error("provider connection failed: {0}")]
    Connect(String),

    /// 2xx with a body we could not parse.
    #[error("provider returned an unparseable response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 401/403/429 — recoverable by rotating the API key.
    pub fn is_auth_or_rate(&self) -> bool {
        matches!(
            self,
            ProviderError::Status {
                code: 401 | 403 | 429,
                ..
            }
        )
    }

    /// 5xx, timeout, or connect failure — recoverable by model fallback.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { code, .. } => (500..600).contains(code),
            ProviderError::Timeout | ProviderError::Connect(_) => true,
            ProviderError::InvalidResponse(_) => false,
        }
    }
}

/// The contract every LLM backend implements.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    ///
    /// `tools` is the schema list the model may call; `model` is the
    /// provider-side model identifier.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError>;

    /// Default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;

    /// Current API key, when this provider authenticates with one.
    ///
    /// The resilience layer brackets key rotation around each call:
    /// capture → set rotated → call → restore. Providers without key auth
    /// return `None` and ignore `set_api_key`.
    fn api_key(&self) -> Option<String> {
        None
    }

    /// Swap the API key for subsequent calls.
    fn set_api_key(&self, _key: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_or_rate_codes() {
        for code in [401u16, 403, 429] {
            let err = ProviderError::Status {
                code,
                body: String::new(),
            };
            assert!(err.is_auth_or_rate(), "{code} should rotate");
            assert!(!err.is_retryable(), "{code} should not fall back");
        }
    }

    #[test]
    fn test_retryable_shapes() {
        let server = ProviderError::Status {
            code: 503,
            body: "overloaded".into(),
        };
        assert!(server.is_retryable());
        assert!(!server.is_auth_or_rate());

        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::Connect("refused".into()).is_retryable());
    }

    #[test]
    fn test_permanent_4xx_neither() {
        let err = ProviderError::Status {
            code: 400,
            body: "bad request".into(),
        };
        assert!(!err.is_auth_or_rate());
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), Some(400));
    }

    #[test]
    fn test_invalid_response_not_retryable() {
        let err = ProviderError::InvalidResponse("trailing garbage".into());
        assert!(!err.is_retryable());
        assert!(err.status_code().is_none());
    }
}
