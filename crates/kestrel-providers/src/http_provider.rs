//! Generic HTTP client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! One implementation covers OpenAI, DeepSeek, Groq, OpenRouter, vLLM, and
//! anything else speaking the same wire format. The API key lives in an
//! interior-mutable slot so the resilience layer can swap it per call
//! without rebuilding the client.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use kestrel_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition,
};

use crate::traits::{LlmProvider, LlmRequestConfig, ProviderError};

/// Overall deadline per provider call; expiry is treated as retryable.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible HTTP provider.
pub struct HttpProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: RwLock<String>,
    default_model: String,
    display_name: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl HttpProvider {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        HttpProvider {
            client,
            api_base: api_base.into(),
            api_key: RwLock::new(api_key.into()),
            default_model: default_model.into(),
            display_name: "openai-compatible".to_string(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        debug!(
            provider = %self.display_name,
            model = model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "calling LLM"
        );

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let key = self.api_key.read().unwrap().clone();
        let result = self
            .client
            .post(self.completions_url())
            .bearer_auth(key)
            .json(&request_body)
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                error!(provider = %self.display_name, "request timed out");
                return Err(ProviderError::Timeout);
            }
            Err(e) => {
                error!(provider = %self.display_name, error = %e, "request failed");
                return Err(ProviderError::Connect(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(provider = %self.display_name, status = %status, "API error");
            return Err(ProviderError::Status {
                code: status.as_u16(),
                body,
            });
        }

        match response.json::<ChatCompletionResponse>().await {
            Ok(parsed) => {
                let llm_resp: LlmResponse = parsed.into();
                debug!(
                    provider = %self.display_name,
                    has_content = llm_resp.content.is_some(),
                    tool_calls = llm_resp.tool_calls.len(),
                    "LLM response received"
                );
                Ok(llm_resp)
            }
            Err(e) => Err(ProviderError::InvalidResponse(e.to_string())),
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn api_key(&self) -> Option<String> {
        Some(self.api_key.read().unwrap().clone())
    }

    fn set_api_key(&self, key: &str) {
        *self.api_key.write().unwrap() = key.to_string();
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
