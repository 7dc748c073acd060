//! Message tool — lets the agent proactively send messages to channels.
//!
//! The loop rebinds the default channel/chat via `set_context` at the start
//! of every turn, so a bare `message` call goes to the current conversation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use kestrel_core::bus::types::OutboundMessage;

use super::base::{optional_string, require_string, Tool, ToolParams};

/// Callback delivering outbound messages to the bus.
pub type SendCallback = Arc<
    dyn Fn(OutboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Sends messages to channels on the agent's behalf.
pub struct MessageTool {
    send_callback: Option<SendCallback>,
    /// Default (channel, chat_id), rebound per turn by the loop.
    context: Mutex<(String, String)>,
}

impl MessageTool {
    pub fn new(send_callback: Option<SendCallback>) -> Self {
        Self {
            send_callback,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    /// Bind the tool to the current conversation.
    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a channel. By default sends to the current conversation; \
         channel and chat_id can be overridden to reach a different one."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message content to send"
                },
                "channel": {
                    "type": "string",
                    "description": "Target channel (optional, defaults to current)"
                },
                "chat_id": {
                    "type": "string",
                    "description": "Target chat ID (optional, defaults to current)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: ToolParams) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;
        let override_channel = optional_string(&params, "channel");
        let override_chat = optional_string(&params, "chat_id");

        let (default_channel, default_chat) = {
            let ctx = self.context.lock().await;
            ctx.clone()
        };
        let channel = override_channel.unwrap_or(default_channel);
        let chat_id = override_chat.unwrap_or(default_chat);

        debug!(channel = %channel, chat_id = %chat_id, "sending message via tool");
        let msg = OutboundMessage::new(&channel, &chat_id, &content);

        if let Some(cb) = &self.send_callback {
            cb(msg)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to send message: {e}"))?;
        } else {
            debug!("no send callback configured; message discarded");
        }

        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_default_target() {
        let tool = MessageTool::new(None);
        tool.set_context("discord", "guild_1").await;
        let mut params = ToolParams::new();
        params.insert("content".into(), json!("hello"));
        let result = tool.execute(params).await.unwrap();
        assert_eq!(result, "Message sent to discord:guild_1");
    }

    #[tokio::test]
    async fn test_explicit_target_overrides_context() {
        let tool = MessageTool::new(None);
        tool.set_context("cli", "direct").await;
        let mut params = ToolParams::new();
        params.insert("content".into(), json!("ping"));
        params.insert("channel".into(), json!("telegram"));
        params.insert("chat_id".into(), json!("987"));
        let result = tool.execute(params).await.unwrap();
        assert_eq!(result, "Message sent to telegram:987");
    }

    #[tokio::test]
    async fn test_missing_content_errors() {
        let tool = MessageTool::new(None);
        assert!(tool.execute(ToolParams::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_callback_receives_message() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let delivered = Arc::new(AtomicBool::new(false));
        let flag = delivered.clone();
        let callback: SendCallback = Arc::new(move |msg| {
            let flag = flag.clone();
            Box::pin(async move {
                assert_eq!(msg.content, "from agent");
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        });

        let tool = MessageTool::new(Some(callback));
        let mut params = ToolParams::new();
        params.insert("content".into(), json!("from agent"));
        tool.execute(params).await.unwrap();
        assert!(delivered.load(Ordering::SeqCst));
    }
}
