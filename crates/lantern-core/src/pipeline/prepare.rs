//! Response preparation (order 58) and the feedback guarantee (order 59).
//!
//! Preparation translates turn outputs into the single
//! [`OutgoingResponse`]. The guarantee backstops it: a non-auto turn
//! that still has no response gets a generic fallback, so the user is
//! never left in silence. The guarantee never overwrites an existing
//! response and never mutates history.

use async_trait::async_trait;
use tracing::{debug, warn};

use lantern_types::error::{FailureKind, FailureSource, Result};
use lantern_types::response::OutgoingResponse;

use crate::pipeline::{System, order};
use crate::turn::TurnContext;

/// Generic fallback text produced by the feedback guarantee.
pub const FALLBACK_TEXT: &str =
    "Sorry, I couldn't finish processing that request. Please try again.";

/// Builds the outgoing response from turn outputs.
pub struct OutgoingResponsePreparation;

impl OutgoingResponsePreparation {
    /// Error-derived user-facing text for a failed turn, when the
    /// failure kind warrants one.
    fn error_text(ctx: &TurnContext) -> Option<String> {
        let llm_failure = ctx
            .failures
            .iter()
            .rev()
            .find(|f| f.source == FailureSource::Llm)?;
        match llm_failure.kind {
            FailureKind::RateLimit => Some(
                "The model is currently rate-limited. Please try again in a moment.".to_string(),
            ),
            FailureKind::Timeout => None,
            _ => Some("The language model request failed. Please try again.".to_string()),
        }
    }
}

#[async_trait]
impl System for OutgoingResponsePreparation {
    fn name(&self) -> &str {
        "outgoing_response_preparation"
    }

    fn order(&self) -> u32 {
        order::RESPONSE_PREPARATION
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        if ctx.outgoing_response.is_some() {
            return Ok(());
        }

        let text = match ctx.final_text.clone() {
            Some(text) if !text.is_empty() => Some(text),
            _ => Self::error_text(ctx),
        };
        let Some(text) = text else {
            // Nothing to say; the feedback guarantee decides next.
            return Ok(());
        };

        let voice_requested = ctx
            .incoming
            .metadata
            .get("voice_requested")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut response = OutgoingResponse::text(text);
        response.voice_requested = voice_requested;
        response.attachments = std::mem::take(&mut ctx.attachments);
        response.skip_assistant_history = true;
        ctx.outgoing_response = Some(response);
        debug!(session = %ctx.session_id(), "outgoing response prepared");
        Ok(())
    }
}

/// Guarantees a non-auto turn always produces a response.
pub struct FeedbackGuarantee;

#[async_trait]
impl System for FeedbackGuarantee {
    fn name(&self) -> &str {
        "feedback_guarantee"
    }

    fn order(&self) -> u32 {
        order::FEEDBACK_GUARANTEE
    }

    fn should_process(&self, ctx: &TurnContext) -> bool {
        // Never overwrite, never speak for auto-mode synthetic turns.
        ctx.outgoing_response.is_none() && !ctx.is_auto_mode()
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        warn!(
            session = %ctx.session_id(),
            stop_reason = ?ctx.stop_reason,
            failures = ctx.failures.len(),
            "turn produced no response, emitting fallback"
        );
        ctx.outgoing_response = Some(OutgoingResponse::text(FALLBACK_TEXT));
        Ok(())
    }
}
