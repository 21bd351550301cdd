//! Optional collaborator ports.
//!
//! Confirmation, retrieval-augmented memory, and voice are external
//! services behind narrow contracts. Each is optional: the engine runs
//! without them and degrades the corresponding feature.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use lantern_types::error::Result;

/// Timed user approval for sensitive tool calls.
#[async_trait]
pub trait ConfirmationPort: Send + Sync {
    /// Ask the user to approve an action.
    ///
    /// Implementations resolve `false` when the user declines or when
    /// `expires_at` passes without an answer.
    async fn request(&self, id: &str, description: &str, expires_at: DateTime<Utc>)
    -> Result<bool>;
}

/// A document submitted for external indexing.
#[derive(Debug, Clone)]
pub struct RagDocument {
    /// Stable document id.
    pub id: String,
    /// Document text.
    pub text: String,
    /// Source tag (session id, channel).
    pub source: String,
}

/// Optional long-term retrieval service.
#[async_trait]
pub trait RagPort: Send + Sync {
    /// Query for context relevant to `text`. `mode` is backend-specific
    /// (e.g. `"conversation"`).
    async fn query(&self, text: &str, mode: &str) -> Result<Option<String>>;

    /// Submit a document for indexing.
    async fn index(&self, doc: RagDocument) -> Result<()>;
}

/// Speech-to-text and text-to-speech.
#[async_trait]
pub trait VoicePort: Send + Sync {
    /// Transcribe audio to text.
    async fn transcribe(&self, audio: &[u8], format: &str) -> Result<String>;

    /// Synthesize speech for `text`.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Confirmation stub that approves everything before expiry.
    struct AlwaysApprove;

    #[async_trait]
    impl ConfirmationPort for AlwaysApprove {
        async fn request(
            &self,
            _id: &str,
            _description: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<bool> {
            Ok(expires_at > Utc::now())
        }
    }

    #[tokio::test]
    async fn expired_confirmation_denies() {
        let port = AlwaysApprove;
        let future = Utc::now() + chrono::Duration::seconds(60);
        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(port.request("p1", "run shell", future).await.unwrap());
        assert!(!port.request("p1", "run shell", past).await.unwrap());
    }
}
