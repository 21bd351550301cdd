//! Outgoing responses and routing outcomes.
//!
//! [`OutgoingResponse`] is the single source of truth for what a turn
//! delivers; [`RoutingOutcome`] records what actually happened at the
//! transport. Only response routing writes the outcome.

use serde::{Deserialize, Serialize};

/// A file or image attached to an outgoing response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Suggested file name.
    pub file_name: String,

    /// MIME type (e.g. `"image/png"`).
    pub mime_type: String,

    /// Raw bytes, base64-encoded in JSON so responses stay representable
    /// in logs and test fixtures.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// What a completed turn delivers back to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingResponse {
    /// Text to deliver (may be empty when only voice/attachments are sent).
    pub text: String,

    /// Whether the user asked for a spoken reply.
    #[serde(default)]
    pub voice_requested: bool,

    /// Text to synthesize when voice is requested (falls back to `text`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_text: Option<String>,

    /// Attachments to deliver after text and voice.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// When true (the default) the response text is not re-appended to
    /// raw history: the assistant message already lives there.
    #[serde(default = "default_true")]
    pub skip_assistant_history: bool,
}

fn default_true() -> bool {
    true
}

impl OutgoingResponse {
    /// A plain text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_requested: false,
            voice_text: None,
            attachments: Vec::new(),
            skip_assistant_history: true,
        }
    }

    /// The text to speak when voice is requested.
    pub fn speech_text(&self) -> &str {
        self.voice_text.as_deref().unwrap_or(&self.text)
    }
}

/// What response routing actually did for a turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingOutcome {
    /// Whether any delivery was attempted.
    pub attempted: bool,

    /// Whether the text part was sent.
    pub sent_text: bool,

    /// Whether a voice message was sent.
    pub sent_voice: bool,

    /// How many attachments were sent.
    pub sent_attachments: usize,

    /// Transport error, if delivery failed. Routing never throws.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_response_defaults() {
        let r = OutgoingResponse::text("hi!");
        assert_eq!(r.text, "hi!");
        assert!(!r.voice_requested);
        assert!(r.skip_assistant_history);
        assert!(r.attachments.is_empty());
    }

    #[test]
    fn speech_text_falls_back_to_text() {
        let mut r = OutgoingResponse::text("written");
        assert_eq!(r.speech_text(), "written");
        r.voice_text = Some("spoken".into());
        assert_eq!(r.speech_text(), "spoken");
    }

    #[test]
    fn skip_history_defaults_true_on_deserialize() {
        let r: OutgoingResponse = serde_json::from_str(r#"{"text":"x"}"#).unwrap();
        assert!(r.skip_assistant_history);
    }

    #[test]
    fn attachment_serde_roundtrip() {
        let att = Attachment {
            file_name: "report.png".into(),
            mime_type: "image/png".into(),
            data: vec![0, 1, 2, 250, 251, 252, 253],
        };
        let json = serde_json::to_string(&att).unwrap();
        let restored: Attachment = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, att);
    }

    #[test]
    fn attachment_data_is_base64_in_json() {
        let att = Attachment {
            file_name: "a.txt".into(),
            mime_type: "text/plain".into(),
            data: b"hello".to_vec(),
        };
        let json = serde_json::to_string(&att).unwrap();
        assert!(json.contains("aGVsbG8="), "got {json}");
    }

    #[test]
    fn routing_outcome_default_is_unattempted() {
        let o = RoutingOutcome::default();
        assert!(!o.attempted);
        assert!(!o.sent_text);
        assert_eq!(o.sent_attachments, 0);
        assert!(o.error_message.is_none());
    }
}
