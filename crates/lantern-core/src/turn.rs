//! Per-turn execution context.
//!
//! [`TurnContext`] is the scratch state threaded through the pipeline:
//! created at turn start, discarded at turn end, never persisted. Core
//! contracts are typed fields; the untyped attribute map carries only
//! diagnostics.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use lantern_types::error::{FailureEvent, FailureKind, FailureSource, TurnLimitReason};
use lantern_types::event::InboundMessage;
use lantern_types::response::{Attachment, OutgoingResponse, RoutingOutcome};
use lantern_types::routing::{ModelTier, ReasoningEffort};
use lantern_types::session::Session;
use lantern_types::tool::ToolDefinition;

/// Scratch state for one turn.
pub struct TurnContext {
    /// Working copy of the session; the raw history grows here and the
    /// orchestrator persists it once at turn end.
    pub session: Session,

    /// The inbound message that triggered the turn.
    pub incoming: InboundMessage,

    // ── Pipeline-populated fields ────────────────────────────────────
    /// Assembled system prompt.
    pub system_prompt: String,

    /// Packed memory block, when retrieval found anything.
    pub memory_pack: Option<String>,

    /// External RAG context, when the port returned anything.
    pub rag_context: Option<String>,

    /// Goal/task/diary context injected for auto-mode turns.
    pub auto_context: Option<String>,

    /// Tools offered to the model this turn.
    pub available_tools: Vec<ToolDefinition>,

    /// Skill selected for the turn, if any.
    pub active_skill: Option<String>,

    /// Model tier for the turn.
    pub model_tier: ModelTier,

    /// Whether the user pinned the tier (blocks dynamic upgrades).
    pub tier_locked: bool,

    /// Reasoning effort for the turn.
    pub reasoning_effort: ReasoningEffort,

    // ── Execution results ────────────────────────────────────────────
    /// Final assistant answer, when the loop reached one.
    pub final_text: Option<String>,

    /// Why the tool loop stopped.
    pub stop_reason: Option<TurnLimitReason>,

    /// The single source of truth for what gets delivered.
    pub outgoing_response: Option<OutgoingResponse>,

    /// What routing actually did; written by response routing only.
    pub routing_outcome: Option<RoutingOutcome>,

    /// Failures recorded during the turn.
    pub failures: Vec<FailureEvent>,

    /// When set, routing suppresses delivery: a skill transition is a
    /// control-flow step, not a user-facing response.
    pub skill_transition_request: Option<String>,

    /// Attachments accumulated by tools for delivery.
    pub attachments: Vec<Attachment>,

    /// Untyped diagnostics (sanitization markers, view diagnostics).
    /// Never used to encode cross-system contracts.
    pub attributes: HashMap<String, serde_json::Value>,

    // ── Runtime plumbing ─────────────────────────────────────────────
    /// Cooperative cancellation for the turn.
    pub cancel: CancellationToken,

    /// Absolute turn deadline.
    pub deadline: Instant,

    /// LLM calls made so far this turn.
    pub llm_calls: u32,

    /// Tool executions made so far this turn.
    pub tool_executions: u32,
}

impl TurnContext {
    /// Create a context for one turn.
    pub fn new(
        session: Session,
        incoming: InboundMessage,
        turn_deadline: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            incoming,
            system_prompt: String::new(),
            memory_pack: None,
            rag_context: None,
            auto_context: None,
            available_tools: Vec::new(),
            active_skill: None,
            model_tier: ModelTier::default(),
            tier_locked: false,
            reasoning_effort: ReasoningEffort::default(),
            final_text: None,
            stop_reason: None,
            outgoing_response: None,
            routing_outcome: None,
            failures: Vec::new(),
            skill_transition_request: None,
            attachments: Vec::new(),
            attributes: HashMap::new(),
            cancel,
            deadline: Instant::now() + turn_deadline,
            llm_calls: 0,
            tool_executions: 0,
        }
    }

    /// Session id shorthand.
    pub fn session_id(&self) -> String {
        self.session.identity.session_id()
    }

    /// Whether this turn was synthesized by the scheduler.
    pub fn is_auto_mode(&self) -> bool {
        self.incoming.is_auto_mode()
    }

    /// Whether the turn deadline has passed.
    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Record a failure event.
    pub fn record_failure(
        &mut self,
        source: FailureSource,
        component: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        self.failures
            .push(FailureEvent::new(source, component, kind, message));
    }

    /// Compose the full system prompt for an LLM call: base prompt plus
    /// memory, RAG, and auto-mode context blocks.
    pub fn composed_system_prompt(&self) -> Option<String> {
        let mut sections: Vec<&str> = Vec::new();
        if !self.system_prompt.is_empty() {
            sections.push(&self.system_prompt);
        }
        if let Some(pack) = self.memory_pack.as_deref() {
            sections.push(pack);
        }
        if let Some(rag) = self.rag_context.as_deref() {
            sections.push(rag);
        }
        if let Some(auto) = self.auto_context.as_deref() {
            sections.push(auto);
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_types::identity::SessionIdentity;

    fn ctx() -> TurnContext {
        let identity = SessionIdentity::new("web", "abcd1234").unwrap();
        TurnContext::new(
            Session::new(identity, "42"),
            InboundMessage::new("web", "u1", "42", "hello"),
            Duration::from_secs(3600),
            CancellationToken::new(),
        )
    }

    #[test]
    fn fresh_context_defaults() {
        let ctx = ctx();
        assert_eq!(ctx.session_id(), "web:abcd1234");
        assert!(!ctx.is_auto_mode());
        assert!(!ctx.deadline_exceeded());
        assert!(ctx.outgoing_response.is_none());
        assert_eq!(ctx.model_tier, ModelTier::Balanced);
    }

    #[test]
    fn zero_deadline_is_immediately_exceeded() {
        let identity = SessionIdentity::new("web", "abcd1234").unwrap();
        let ctx = TurnContext::new(
            Session::new(identity, "42"),
            InboundMessage::new("web", "u1", "42", "hello"),
            Duration::ZERO,
            CancellationToken::new(),
        );
        assert!(ctx.deadline_exceeded());
    }

    #[test]
    fn composed_prompt_joins_present_sections() {
        let mut ctx = ctx();
        assert!(ctx.composed_system_prompt().is_none());

        ctx.system_prompt = "base".into();
        ctx.memory_pack = Some("## Memory\n- fact".into());
        ctx.auto_context = Some("## Goal".into());
        let composed = ctx.composed_system_prompt().unwrap();
        assert_eq!(composed, "base\n\n## Memory\n- fact\n\n## Goal");
    }

    #[test]
    fn record_failure_appends() {
        let mut ctx = ctx();
        ctx.record_failure(
            FailureSource::System,
            "context_building",
            FailureKind::Exception,
            "boom",
        );
        assert_eq!(ctx.failures.len(), 1);
        assert_eq!(ctx.failures[0].component, "context_building");
    }
}
