//! Chat message and tool-call types shared across the runtime.
//!
//! Everything here follows the OpenAI chat-completions wire format, which is
//! what every provider endpoint we talk to accepts. The enums keep role and
//! content shape mismatches out of the agent loop: a `tool` message cannot be
//! built without its `tool_call_id`, and an assistant turn either carries
//! text, tool calls, or both.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// One conversation message, tagged by `role` on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: MessageContent },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        /// Chain-of-thought text from reasoning models; never echoed back.
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },

    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
        /// Tool name, echoed for providers that require it.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: MessageContent::Text(content.into()),
        }
    }

    /// User message with multipart content (text + inline images).
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Message::User {
            content: MessageContent::Parts(parts),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
            reasoning_content: None,
        }
    }

    /// Assistant turn requesting tool execution, with optional lead-in text.
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content,
            tool_calls: Some(tool_calls),
            reasoning_content: None,
        }
    }

    /// Tool result answering a specific `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            name: Some(name.into()),
        }
    }

    /// Plain-text view of the message content, for token counting.
    pub fn text_content(&self) -> &str {
        match self {
            Message::System { content } => content,
            Message::User {
                content: MessageContent::Text(text),
            } => text,
            Message::User {
                content: MessageContent::Parts(_),
            } => "",
            Message::Assistant { content, .. } => content.as_deref().unwrap_or(""),
            Message::Tool { content, .. } => content,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }
}

/// User message content — plain text or multipart for vision input.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single part of a multipart user message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ─────────────────────────────────────────────
// Tool calls and definitions
// ─────────────────────────────────────────────

/// A tool invocation requested by the assistant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Call id the tool result must echo back.
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parse the JSON-encoded arguments into a map. Providers send arguments
    /// as a string; malformed payloads come back as an empty map.
    pub fn parsed_arguments(&self) -> HashMap<String, serde_json::Value> {
        serde_json::from_str(&self.function.arguments).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// Tool schema advertised to the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────
// Provider responses
// ─────────────────────────────────────────────

/// Parsed response from one chat-completion call.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageInfo>,
    pub reasoning_content: Option<String>,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Raw chat-completion response body, pre-conversion.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: Option<String>,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

impl From<ChatCompletionResponse> for LlmResponse {
    fn from(resp: ChatCompletionResponse) -> Self {
        match resp.choices.into_iter().next() {
            Some(choice) => LlmResponse {
                content: choice.message.content,
                tool_calls: choice.message.tool_calls.unwrap_or_default(),
                finish_reason: choice.finish_reason,
                usage: resp.usage,
                reasoning_content: choice.message.reasoning_content,
            },
            None => LlmResponse {
                content: Some("No choices in response".to_string()),
                ..Default::default()
            },
        }
    }
}

/// Request body for an OpenAI-compatible chat-completion endpoint.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

// ─────────────────────────────────────────────
// Media attachments
// ─────────────────────────────────────────────

/// A media attachment (photo, voice note, document) carried by a channel message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MediaAttachment {
    /// MIME type (e.g. "image/jpeg").
    pub mime_type: String,
    /// Local file path or URL.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

// ─────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────

/// A conversation session: ordered message history plus mutable metadata.
///
/// Metadata values are arbitrary JSON so structured records (active
/// directives, routing hints) persist alongside plain strings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub messages: Vec<Message>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Session {
            key: key.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// The last `n` messages, oldest first.
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let len = self.messages.len();
        &self.messages[len.saturating_sub(n)..]
    }

    /// Content of the most recent assistant turn, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant {
                content: Some(text),
                ..
            } => Some(text.as_str()),
            _ => None,
        })
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_message_shape() {
        let msg = Message::system("Be helpful.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "Be helpful.");
    }

    #[test]
    fn test_tool_result_carries_name_and_id() {
        let msg = Message::tool_result("call_7", "weather", "Cilacap: 29C");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_7");
        assert_eq!(json["name"], "weather");
        assert_eq!(json["content"], "Cilacap: 29C");
    }

    #[test]
    fn test_assistant_optional_fields_absent() {
        let msg = Message::assistant("done");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("reasoning_content").is_none());
    }

    #[test]
    fn test_assistant_with_tools_keeps_lead_in() {
        let tc = ToolCall::new("c1", "exec", r#"{"command":"ls"}"#);
        let msg = Message::assistant_with_tools(Some("Checking...".into()), vec![tc]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "Checking...");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "exec");
    }

    #[test]
    fn test_multipart_user_message() {
        let msg = Message::user_parts(vec![
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,aGk=".into(),
                    detail: None,
                },
            },
            ContentPart::Text {
                text: "what is this?".into(),
            },
        ]);
        let json = serde_json::to_value(&msg).unwrap();
        let parts = json["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "image_url");
        assert_eq!(parts[1]["text"], "what is this?");
    }

    #[test]
    fn test_parsed_arguments_valid_json() {
        let tc = ToolCall::new("c1", "weather", r#"{"location": "Cilacap"}"#);
        let args = tc.parsed_arguments();
        assert_eq!(args["location"], json!("Cilacap"));
    }

    #[test]
    fn test_parsed_arguments_malformed_is_empty() {
        let tc = ToolCall::new("c1", "weather", "{not json");
        assert!(tc.parsed_arguments().is_empty());
    }

    #[test]
    fn test_text_content_per_role() {
        assert_eq!(Message::system("s").text_content(), "s");
        assert_eq!(Message::user("u").text_content(), "u");
        assert_eq!(Message::assistant("a").text_content(), "a");
        assert_eq!(Message::tool_result("id", "t", "out").text_content(), "out");
    }

    #[test]
    fn test_message_round_trip() {
        let messages = vec![
            Message::system("You are Kestrel."),
            Message::user("hello"),
            Message::assistant("hi"),
            Message::tool_result("call_1", "exec", "ok"),
        ];
        let encoded = serde_json::to_string(&messages).unwrap();
        let decoded: Vec<Message> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(messages, decoded);
    }

    #[test]
    fn test_chat_completion_into_response() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "cron", "arguments": "{\"action\":\"list\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(body).unwrap();
        let resp: LlmResponse = parsed.into();
        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].name(), "cron");
        assert_eq!(resp.usage.unwrap().total_tokens, 20);
    }

    #[test]
    fn test_chat_completion_empty_choices() {
        let parsed: ChatCompletionResponse =
            serde_json::from_value(json!({"id": null, "choices": [], "usage": null})).unwrap();
        let resp: LlmResponse = parsed.into();
        assert_eq!(resp.content.as_deref(), Some("No choices in response"));
    }

    #[test]
    fn test_request_omits_absent_options() {
        let req = ChatCompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("hi")],
            tools: None,
            tool_choice: None,
            max_tokens: None,
            temperature: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_session_metadata_holds_structured_values() {
        let mut session = Session::new("telegram:42");
        session
            .metadata
            .insert("directives".into(), json!({"think": true, "verbose": false}));
        let encoded = serde_json::to_string(&session).unwrap();
        let decoded: Session = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.metadata["directives"]["think"], json!(true));
    }

    #[test]
    fn test_recent_messages_window() {
        let mut session = Session::new("t:1");
        for i in 0..5 {
            session.messages.push(Message::user(format!("m{i}")));
        }
        let recent = session.recent_messages(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text_content(), "m3");
    }

    #[test]
    fn test_last_assistant_text() {
        let mut session = Session::new("t:1");
        session.messages.push(Message::assistant("first"));
        session.messages.push(Message::user("q"));
        session.messages.push(Message::assistant("second"));
        assert_eq!(session.last_assistant_text(), Some("second"));
    }
}
