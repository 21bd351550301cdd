//! Input sanitization (order 10).
//!
//! Normalizes the incoming text and detects prompt-injection patterns.
//! Detection is best-effort and advisory: the turn is never rejected,
//! the findings land in the context's diagnostic attributes.

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use lantern_types::error::Result;
use lantern_types::message::MessageRole;

use crate::pipeline::{System, order};
use crate::turn::TurnContext;

/// Characters stripped from input: zero-width and bidi-control code
/// points commonly used to smuggle instructions past review.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
    )
}

/// Strips invisible characters and flags injection patterns.
pub struct InputSanitization {
    patterns: Vec<(&'static str, Regex)>,
}

impl InputSanitization {
    /// Create the system with the built-in pattern set.
    pub fn new() -> Self {
        let patterns = [
            ("ignore_previous", r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+instructions"),
            ("disregard_system", r"(?i)disregard\s+(the\s+)?(system\s+prompt|your\s+instructions)"),
            ("role_override", r"(?i)you\s+are\s+now\s+(a|an|the)\s+"),
            ("fake_system_tag", r"(?i)<\s*/?\s*system\s*>"),
            ("reveal_prompt", r"(?i)(reveal|print|show)\s+(your\s+)?(system\s+prompt|instructions)"),
        ]
        .into_iter()
        .map(|(name, pattern)| (name, Regex::new(pattern).expect("pattern compiles")))
        .collect();
        Self { patterns }
    }

    fn sanitize(&self, text: &str) -> (String, Vec<String>) {
        let cleaned: String = text.chars().filter(|c| !is_invisible(*c)).collect();
        let threats: Vec<String> = self
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(&cleaned))
            .map(|(name, _)| (*name).to_string())
            .collect();
        (cleaned, threats)
    }
}

impl Default for InputSanitization {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl System for InputSanitization {
    fn name(&self) -> &str {
        "input_sanitization"
    }

    fn order(&self) -> u32 {
        order::INPUT_SANITIZATION
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        let (cleaned, threats) = self.sanitize(&ctx.incoming.content);
        if cleaned != ctx.incoming.content {
            ctx.incoming.content = cleaned.clone();
            // Keep the working history copy consistent with the
            // sanitized input.
            if let Some(last) = ctx
                .session
                .messages
                .iter_mut()
                .rev()
                .find(|m| m.role == MessageRole::User)
            {
                last.content = cleaned;
            }
        }
        if !threats.is_empty() {
            warn!(session = %ctx.session_id(), ?threats, "possible prompt injection detected");
        }
        ctx.attributes
            .insert("sanitization.performed".into(), serde_json::json!(true));
        ctx.attributes
            .insert("sanitization.threats".into(), serde_json::json!(threats));
        Ok(())
    }
}
