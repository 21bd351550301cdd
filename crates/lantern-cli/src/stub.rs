//! Stand-in LLM port.
//!
//! Provider adapters live outside this workspace. Until one is wired,
//! this port answers every request locally so the engine can be
//! smoke-tested end to end.

use async_trait::async_trait;

use lantern_llm::types::{ChatRequest, ChatResponse, ContentBlock, StopReason, Usage};
use lantern_llm::LlmPort;

/// Echoes the last user message back as the assistant answer.
pub struct StubPort;

#[async_trait]
impl LlmPort for StubPort {
    fn name(&self) -> &str {
        "stub"
    }

    async fn chat(&self, request: &ChatRequest) -> lantern_llm::Result<ChatResponse> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(ChatResponse {
            id: "stub".into(),
            content: vec![ContentBlock::Text {
                text: format!("[stub provider] You said: {last_user}"),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }
}
