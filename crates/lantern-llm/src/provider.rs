//! The [`LlmPort`] trait.
//!
//! Every provider adapter implements this trait. Deadlines and
//! cancellation are enforced by the caller (the tool loop wraps each call
//! in a timeout and a cancellation check), so implementations only need
//! to translate requests and responses.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ProviderError, Result};
use crate::types::{ChatRequest, ChatResponse, StreamChunk};

/// A provider that can execute chat completion requests.
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Returns the provider name (e.g. `"openai"`, `"anthropic"`).
    fn name(&self) -> &str;

    /// Whether this provider accepts tool-role messages and assistant
    /// tool calls in its conversation format. When false, the view
    /// builder flattens tool traffic into plain assistant text.
    fn supports_tool_messages(&self) -> bool {
        true
    }

    /// Execute a chat completion request and return the response.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on network failures, authentication
    /// problems, rate limiting, or invalid responses.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Execute a streaming chat request.
    ///
    /// Optional; the default implementation reports the capability as
    /// missing. Callers should fall back to [`chat`](LlmPort::chat).
    async fn chat_stream(&self, _request: &ChatRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        Err(ProviderError::NotConfigured(format!(
            "provider '{}' does not support streaming",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, StopReason, Usage, ViewMessage};

    struct FixedPort;

    #[async_trait]
    impl LlmPort for FixedPort {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                id: "r1".into(),
                content: vec![ContentBlock::Text { text: "ok".into() }],
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            })
        }
    }

    #[tokio::test]
    async fn default_capabilities() {
        let port = FixedPort;
        assert!(port.supports_tool_messages());
        let req = ChatRequest::new("m", vec![ViewMessage::new("user", "hi")]);
        assert!(port.chat_stream(&req).await.is_err());
        assert_eq!(port.chat(&req).await.unwrap().text(), "ok");
    }
}
