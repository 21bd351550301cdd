//! Session identity.
//!
//! A [`SessionIdentity`] names one logical conversation independently of
//! the transport that delivers its messages. The conversation key is
//! validated at construction so that downstream components (file paths,
//! memory scopes) can trust its alphabet.

use serde::{Deserialize, Serialize};

use crate::error::LanternError;

/// Minimum length of a conversation key.
pub const MIN_KEY_LEN: usize = 8;

/// Maximum length of a conversation key.
pub const MAX_KEY_LEN: usize = 64;

/// Identity of one logical conversation.
///
/// Immutable once constructed. The pair `(channel_type, conversation_key)`
/// is the queueing key for the orchestrator and the prefix for all
/// session-scoped memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    /// Channel type (e.g. `"telegram"`, `"web"`, `"webhook"`).
    pub channel_type: String,

    /// Logical conversation key: URL-safe `[A-Za-z0-9_-]`, length 8–64.
    pub conversation_key: String,
}

impl SessionIdentity {
    /// Construct a validated identity.
    ///
    /// # Errors
    ///
    /// Returns [`LanternError::Validation`] when the channel type is not
    /// lowercase alphanumeric or the conversation key violates the
    /// alphabet / length rules.
    pub fn new(
        channel_type: impl Into<String>,
        conversation_key: impl Into<String>,
    ) -> Result<Self, LanternError> {
        let channel_type = channel_type.into();
        let conversation_key = conversation_key.into();
        validate_channel_type(&channel_type)?;
        validate_conversation_key(&conversation_key)?;
        Ok(Self {
            channel_type,
            conversation_key,
        })
    }

    /// Full session id: `"{channel_type}:{conversation_key}"`.
    pub fn session_id(&self) -> String {
        format!("{}:{}", self.channel_type, self.conversation_key)
    }
}

impl std::fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel_type, self.conversation_key)
    }
}

/// Validate a channel type: non-empty, lowercase ASCII alphanumeric.
pub fn validate_channel_type(channel: &str) -> Result<(), LanternError> {
    if channel.is_empty() {
        return Err(LanternError::Validation {
            reason: "channel type must not be empty".into(),
        });
    }
    if !channel
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(LanternError::Validation {
            reason: format!("channel type contains invalid characters: {channel:?}"),
        });
    }
    Ok(())
}

/// Validate a conversation key: `[A-Za-z0-9_-]`, length 8–64.
pub fn validate_conversation_key(key: &str) -> Result<(), LanternError> {
    if key.len() < MIN_KEY_LEN || key.len() > MAX_KEY_LEN {
        return Err(LanternError::Validation {
            reason: format!(
                "conversation key length {} outside {MIN_KEY_LEN}..={MAX_KEY_LEN}",
                key.len()
            ),
        });
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(LanternError::Validation {
            reason: format!("conversation key contains invalid characters: {key:?}"),
        });
    }
    Ok(())
}

/// Derive a valid conversation key from an arbitrary transport identifier.
///
/// Used for legacy compatibility when no active pointer exists: invalid
/// characters are replaced with `_`, the result is prefixed to reach the
/// minimum length and truncated to the maximum.
pub fn derive_default_key(transport_id: &str) -> String {
    let mut key: String = transport_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if key.len() < MIN_KEY_LEN {
        key = format!("chat-{key:0>4}");
    }
    if key.len() < MIN_KEY_LEN {
        let pad = MIN_KEY_LEN - key.len();
        key.push_str(&"0".repeat(pad));
    }
    key.truncate(MAX_KEY_LEN);
    key
}
