//! Response routing.
//!
//! The only component that touches transport state. Reads nothing but
//! `TurnContext.outgoing_response`, delivers in strict order (text,
//! voice, attachments), and records what happened in a
//! [`RoutingOutcome`]. Send errors are captured, never thrown.

use std::sync::Arc;

use tracing::{debug, warn};

use lantern_channels::ChannelRegistry;
use lantern_types::response::RoutingOutcome;

use crate::ports::VoicePort;
use crate::turn::TurnContext;

/// Delivers outgoing responses through the channel registry.
pub struct ResponseRouter {
    channels: Arc<ChannelRegistry>,
    /// Optional speech synthesis; voice falls back to text without it.
    voice: Option<Arc<dyn VoicePort>>,
}

impl ResponseRouter {
    /// Create a router.
    pub fn new(channels: Arc<ChannelRegistry>, voice: Option<Arc<dyn VoicePort>>) -> Self {
        Self { channels, voice }
    }

    /// Deliver the turn's outgoing response and write the outcome.
    pub async fn route(&self, ctx: &mut TurnContext) {
        // A skill transition is control flow, not a user-facing message.
        if ctx.skill_transition_request.is_some() {
            debug!(session = %ctx.session_id(), "skill transition, delivery suppressed");
            ctx.routing_outcome = Some(RoutingOutcome::default());
            return;
        }

        let Some(response) = ctx.outgoing_response.clone() else {
            // Auto-mode turns may legitimately end without a response.
            ctx.routing_outcome = Some(RoutingOutcome::default());
            return;
        };

        let mut outcome = RoutingOutcome {
            attempted: true,
            ..Default::default()
        };

        let channel = match self.channels.get(&ctx.session.identity.channel_type) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(session = %ctx.session_id(), error = %e, "no channel for delivery");
                outcome.error_message = Some(e.to_string());
                ctx.routing_outcome = Some(outcome);
                return;
            }
        };
        let chat_id = ctx.session.transport_chat_id.clone();

        // 1. Text.
        if !response.text.is_empty() {
            match channel.send_message(&chat_id, &response.text).await {
                Ok(()) => outcome.sent_text = true,
                Err(e) => {
                    warn!(error = %e, "text delivery failed");
                    record_error(&mut outcome, e.to_string());
                }
            }
        }

        // 2. Voice, with text fallback on any failure.
        if response.voice_requested && !response.speech_text().is_empty() {
            let speech = response.speech_text().to_string();
            let sent = match self.synthesize(&speech).await {
                Some(audio) => match channel.send_voice(&chat_id, &audio).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(error = %e, "voice delivery failed, falling back to text");
                        false
                    }
                },
                None => false,
            };
            if sent {
                outcome.sent_voice = true;
            } else if !outcome.sent_text || speech != response.text {
                match channel.send_message(&chat_id, &speech).await {
                    Ok(()) => outcome.sent_text = true,
                    Err(e) => record_error(&mut outcome, e.to_string()),
                }
            }
        }

        // 3. Attachments.
        for attachment in &response.attachments {
            match channel.send_attachment(&chat_id, attachment).await {
                Ok(()) => outcome.sent_attachments += 1,
                Err(e) => {
                    warn!(file = %attachment.file_name, error = %e, "attachment delivery failed");
                    record_error(&mut outcome, e.to_string());
                }
            }
        }

        debug!(
            session = %ctx.session_id(),
            sent_text = outcome.sent_text,
            sent_voice = outcome.sent_voice,
            attachments = outcome.sent_attachments,
            "routing finished"
        );
        ctx.routing_outcome = Some(outcome);
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        let port = self.voice.as_ref()?;
        match port.synthesize(text).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                debug!(error = %e, "speech synthesis failed");
                None
            }
        }
    }
}

fn record_error(outcome: &mut RoutingOutcome, message: String) {
    // Keep the first error; later ones are logged by callers.
    if outcome.error_message.is_none() {
        outcome.error_message = Some(message);
    }
}
