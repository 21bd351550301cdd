//! Provider-agnostic request and response types.
//!
//! A [`ChatRequest`] carries the per-call projection of a conversation
//! (built by the view builder from raw history) plus tool definitions and
//! sampling knobs. A [`ChatResponse`] is a list of content blocks: text
//! and/or tool-use requests. Nothing here is tied to a specific wire
//! protocol; adapters translate both ways.

use serde::{Deserialize, Serialize};

use lantern_types::message::ToolCall;
use lantern_types::routing::ReasoningEffort;
use lantern_types::tool::ToolDefinition;

/// One message in the request-time conversation view.
///
/// Distinct from the raw [`Message`](lantern_types::message::Message):
/// view messages are a per-request projection and may be flattened when
/// the target provider cannot represent tool messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMessage {
    /// Role string as providers expect it (`"user"`, `"assistant"`, ...).
    pub role: String,

    /// Text content.
    pub content: String,

    /// For tool-result messages: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For assistant messages: tool calls carried by the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ViewMessage {
    /// Create a plain view message.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// The model identifier (e.g. `"anthropic/claude-sonnet-4-5"`).
    pub model: String,

    /// System prompt for the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The conversation view.
    pub messages: Vec<ViewMessage>,

    /// Tool definitions available to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// How much reasoning the provider should spend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl ChatRequest {
    /// Create a minimal request with a model and messages.
    pub fn new(model: impl Into<String>, messages: Vec<ViewMessage>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
            reasoning_effort: None,
        }
    }
}

/// A single block of content in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// A text block.
    Text {
        /// The text content.
        text: String,
    },
    /// A tool-use request from the model.
    ToolUse {
        /// Tool call identifier (for correlating results).
        id: String,
        /// Name of the tool the model wants to invoke.
        name: String,
        /// JSON arguments to pass to the tool.
        input: serde_json::Value,
    },
}

/// The reason a model stopped generating tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response.
    EndTurn,
    /// Hit the `max_tokens` limit.
    MaxTokens,
    /// The model wants to use a tool.
    ToolUse,
}

/// Token usage statistics for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    /// Tokens consumed by the prompt / input.
    pub input_tokens: u32,
    /// Tokens generated in the response.
    pub output_tokens: u32,
}

/// A complete response from an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider-assigned response identifier.
    pub id: String,

    /// Content blocks in the response.
    pub content: Vec<ContentBlock>,

    /// Why the model stopped generating.
    pub stop_reason: StopReason,

    /// Token usage for this request/response pair.
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolUse { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool calls requested by this response, in order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                ContentBlock::Text { .. } => None,
            })
            .collect()
    }
}

/// One chunk of a streamed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Incremental text, if any.
    #[serde(default)]
    pub delta: String,

    /// Set on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: Vec<ContentBlock>) -> ChatResponse {
        ChatResponse {
            id: "resp-1".into(),
            content,
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    #[test]
    fn text_joins_text_blocks() {
        let resp = response(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::ToolUse {
                id: "tc1".into(),
                name: "echo".into(),
                input: serde_json::json!({}),
            },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(resp.text(), "ab");
    }

    #[test]
    fn tool_calls_extracted_in_order() {
        let resp = response(vec![
            ContentBlock::ToolUse {
                id: "tc1".into(),
                name: "first".into(),
                input: serde_json::json!({"x": 1}),
            },
            ContentBlock::ToolUse {
                id: "tc2".into(),
                name: "second".into(),
                input: serde_json::json!({}),
            },
        ]);
        let calls = resp.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "tc1");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn content_block_serde_tagged() {
        let block = ContentBlock::ToolUse {
            id: "tc1".into(),
            name: "echo".into(),
            input: serde_json::json!({"text": "hi"}),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"tool_use\""));
        let restored: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, block);
    }

    #[test]
    fn response_serde_roundtrip() {
        let resp = response(vec![ContentBlock::Text { text: "hi!".into() }]);
        let json = serde_json::to_string(&resp).unwrap();
        let restored: ChatResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.text(), "hi!");
        assert_eq!(restored.stop_reason, StopReason::EndTurn);
    }
}
