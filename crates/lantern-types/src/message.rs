//! Conversation messages and tool calls.
//!
//! [`Message`] is the unit of raw session history. The history is
//! provider-agnostic: tool calls and tool results are stored in full and
//! projected into provider-safe shapes at request time by the view
//! builder, never rewritten in place.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// End-user input (or a synthetic auto-mode message).
    User,
    /// Model output, possibly carrying tool calls.
    Assistant,
    /// Injected system content (e.g. a compaction summary).
    System,
    /// A tool result referencing an assistant tool call.
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, unique within its assistant message.
    pub id: String,

    /// Name of the tool to invoke.
    pub name: String,

    /// JSON arguments for the tool.
    pub arguments: serde_json::Value,
}

/// One message in a session's raw history.
///
/// Invariant (enforced by the tool loop, checked by tests): every
/// assistant message with `N` tool calls is followed by exactly `N` tool
/// messages whose `tool_call_id` values match — real results, or
/// synthetic ones appended on stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: String,

    /// Who produced this message.
    pub role: MessageRole,

    /// Text content. For tool messages this is the serialized result.
    pub content: String,

    /// Tool calls carried by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// For tool messages: the assistant tool call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For tool messages: the tool that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Arbitrary message metadata (auto-mode markers, file lists, etc.).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the message was appended.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional audio payload reference (voice messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl Message {
    /// Create a message with a fresh id and the current timestamp.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            audio: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a tool result message answering `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(MessageRole::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.tool_name = Some(tool_name.into());
        msg
    }

    /// Attach a metadata entry, returning self for chaining.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this message carries at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Whether this is an auto-mode synthetic message.
    pub fn is_auto_mode(&self) -> bool {
        self.metadata
            .get("auto_mode")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
