//! Conversation session record.
//!
//! [`Session`] stores the append-only message history for one logical
//! conversation. The history only grows, except through compaction,
//! which replaces a contiguous prefix with exactly one summary message.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::SessionIdentity;
use crate::message::Message;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// The session accepts and processes messages.
    Active,
    /// The session is paused; messages are rejected at routing.
    Paused,
    /// The session is closed for good.
    Terminated,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Active
    }
}

/// A conversation session.
///
/// Exclusively owned by the session store; other components see it as a
/// read-only snapshot inside a turn. Mutation happens through the store
/// so that per-session write serialization holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Logical identity of this conversation.
    pub identity: SessionIdentity,

    /// Physical delivery address on the transport (chat id, client id).
    pub transport_chat_id: String,

    /// Ordered message history (append-only outside compaction).
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Arbitrary session metadata (`llm.model`, user tier lock, etc.).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Lifecycle state.
    #[serde(default)]
    pub state: SessionState,

    /// When the session was first created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the session was last updated.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session.
    pub fn new(identity: SessionIdentity, transport_chat_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            identity,
            transport_chat_id: transport_chat_id.into(),
            messages: Vec::new(),
            metadata: HashMap::new(),
            state: SessionState::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message to the history.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// The model id persisted by the last completed turn, if any.
    ///
    /// Used by the view builder to detect provider switches between turns.
    pub fn last_model(&self) -> Option<&str> {
        self.metadata.get("llm.model").and_then(|v| v.as_str())
    }

    /// Record the model id used by the current turn.
    pub fn set_last_model(&mut self, model: &str) {
        self.metadata
            .insert("llm.model".into(), serde_json::Value::String(model.into()));
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageRole;

    fn identity() -> SessionIdentity {
        SessionIdentity::new("web", "abcd1234").unwrap()
    }

    #[test]
    fn new_session_is_active_and_empty() {
        let s = Session::new(identity(), "client-1");
        assert_eq!(s.state, SessionState::Active);
        assert!(s.messages.is_empty());
        assert_eq!(s.transport_chat_id, "client-1");
    }

    #[test]
    fn push_message_appends_and_touches() {
        let mut s = Session::new(identity(), "client-1");
        let before = s.updated_at;
        s.push_message(Message::user("hello"));
        s.push_message(Message::assistant("hi!"));
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[0].role, MessageRole::User);
        assert!(s.updated_at >= before);
    }

    #[test]
    fn last_model_roundtrip() {
        let mut s = Session::new(identity(), "client-1");
        assert!(s.last_model().is_none());
        s.set_last_model("balanced-1");
        assert_eq!(s.last_model(), Some("balanced-1"));
    }

    #[test]
    fn serde_roundtrip_identity() {
        let mut s = Session::new(identity(), "42");
        s.push_message(Message::user("one"));
        s.push_message(Message::assistant("two"));
        s.set_last_model("m");

        let json = serde_json::to_string(&s).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.identity, s.identity);
        assert_eq!(restored.messages.len(), 2);
        assert_eq!(restored.messages[1].content, "two");
        assert_eq!(restored.last_model(), Some("m"));
        assert_eq!(restored.state, SessionState::Active);
    }

    #[test]
    fn state_defaults_on_missing_field() {
        let json = r#"{"identity":{"channel_type":"web","conversation_key":"abcd1234"},"transport_chat_id":"42"}"#;
        let s: Session = serde_json::from_str(json).unwrap();
        assert_eq!(s.state, SessionState::Active);
        assert!(s.messages.is_empty());
    }
}
