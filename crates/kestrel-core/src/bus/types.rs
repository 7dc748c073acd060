//! Bus event types — what flows between channels, the agent loop, and
//! system-event observers.

use crate::types::MediaAttachment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────

/// What kind of peer a message came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Direct,
    Group,
    Channel,
}

/// A message received from a channel, immutable once published.
///
/// Channel adapters fill the routing fields once at construction; nothing
/// downstream mutates `content`.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "telegram", "discord", "system").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier.
    pub chat_id: String,
    /// Message text.
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Attached media (photos, voice notes, documents).
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata (message_id, username, is_interaction, ...).
    pub metadata: HashMap<String, String>,

    // Routing fields for multi-account / threaded platforms.
    pub account_id: Option<String>,
    pub peer_kind: Option<PeerKind>,
    pub peer_id: Option<String>,
    pub guild_id: Option<String>,
    pub team_id: Option<String>,
    pub thread_id: Option<String>,
    /// Parent peer for thread inheritance, as (kind, id).
    pub parent_peer: Option<(String, String)>,

    /// Session-key override set by the routing resolver.
    session_key_override: Option<String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
            account_id: None,
            peer_kind: None,
            peer_id: None,
            guild_id: None,
            team_id: None,
            thread_id: None,
            parent_peer: None,
            session_key_override: None,
        }
    }

    /// Canonical session key: `channel:chat_id`, unless the routing
    /// resolver pinned an override (isolated/background runs).
    pub fn session_key(&self) -> String {
        match &self.session_key_override {
            Some(key) => key.clone(),
            None => format!("{}:{}", self.channel, self.chat_id),
        }
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key_override = Some(key.into());
        self
    }

    /// Whether this message is a button press / interaction callback.
    pub fn is_interaction(&self) -> bool {
        self.metadata
            .get("is_interaction")
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}

// ─────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────

/// A message the agent sends back to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata. `type=status_update` marks non-final
    /// progress lines; `inline_keyboard` / `components` carry UI widgets.
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// A non-final progress line ("_Reading `x.md`_").
    pub fn status_update(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(channel, chat_id, content);
        msg.metadata
            .insert("type".to_string(), "status_update".to_string());
        msg
    }

    pub fn is_status_update(&self) -> bool {
        self.metadata.get("type").map(String::as_str) == Some("status_update")
    }
}

// ─────────────────────────────────────────────
// System events
// ─────────────────────────────────────────────

/// Which internal stream an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStream {
    Lifecycle,
    Tool,
    Assistant,
    Error,
}

/// An observable runtime event. Within one `run_id`, `seq` is strictly
/// increasing across all streams combined.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemEvent {
    pub run_id: String,
    pub seq: u64,
    pub stream: EventStream,
    pub timestamp: DateTime<Utc>,
    pub data: HashMap<String, serde_json::Value>,
}

impl SystemEvent {
    fn build(
        run_id: impl Into<String>,
        seq: u64,
        stream: EventStream,
        data: HashMap<String, serde_json::Value>,
    ) -> Self {
        SystemEvent {
            run_id: run_id.into(),
            seq,
            stream,
            timestamp: Utc::now(),
            data,
        }
    }

    /// A lifecycle event (start, stop, crash_recovery, ...).
    pub fn lifecycle(run_id: impl Into<String>, seq: u64, action: &str) -> Self {
        let mut data = HashMap::new();
        data.insert("action".to_string(), serde_json::json!(action));
        Self::build(run_id, seq, EventStream::Lifecycle, data)
    }

    /// A tool execution event with `status` in {start, complete, error}.
    pub fn tool(run_id: impl Into<String>, seq: u64, tool_name: &str, status: &str) -> Self {
        let mut data = HashMap::new();
        data.insert("tool".to_string(), serde_json::json!(tool_name));
        data.insert("status".to_string(), serde_json::json!(status));
        Self::build(run_id, seq, EventStream::Tool, data)
    }

    /// An assistant content event.
    pub fn assistant(run_id: impl Into<String>, seq: u64, content: &str) -> Self {
        let mut data = HashMap::new();
        data.insert("content".to_string(), serde_json::json!(content));
        Self::build(run_id, seq, EventStream::Assistant, data)
    }

    /// An error event.
    pub fn error(run_id: impl Into<String>, seq: u64, error_type: &str, message: &str) -> Self {
        let mut data = HashMap::new();
        data.insert("error_type".to_string(), serde_json::json!(error_type));
        data.insert("message".to_string(), serde_json::json!(message));
        Self::build(run_id, seq, EventStream::Error, data)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
