//! Session identity resolution.
//!
//! [`SessionRouter`] turns an inbound transport message into the
//! [`SessionIdentity`] of the conversation that should process it, using
//! the active pointer registry with a legacy fallback that derives a
//! default conversation key from the transport id.

use std::sync::Arc;

use tracing::{debug, info};

use lantern_types::error::Result;
use lantern_types::event::InboundMessage;
use lantern_types::identity::{self, SessionIdentity};

use crate::pointers::ActivePointerRegistry;
use crate::sessions::SessionStore;

/// Resolves inbound messages to session identities.
pub struct SessionRouter {
    pointers: Arc<ActivePointerRegistry>,
    sessions: Arc<SessionStore>,
}

impl SessionRouter {
    /// Create a router over the pointer registry and session store.
    pub fn new(pointers: Arc<ActivePointerRegistry>, sessions: Arc<SessionStore>) -> Self {
        Self { pointers, sessions }
    }

    /// Build the pointer key for an inbound message.
    ///
    /// Telegram keys on the server-derived chat id; web keys on the
    /// authenticated principal plus client instance; webhooks key on
    /// the configured chat id or `default`. Other channels fall back
    /// to `channel|chat_id`.
    pub fn pointer_key(msg: &InboundMessage) -> String {
        match msg.channel.as_str() {
            "telegram" => format!("telegram|{}", msg.transport_chat_id),
            "web" => {
                let client = msg
                    .metadata
                    .get("client_instance_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("default");
                format!("web|{}|{client}", msg.sender_id)
            }
            "webhook" => {
                let chat = if msg.transport_chat_id.is_empty() {
                    "default"
                } else {
                    msg.transport_chat_id.as_str()
                };
                format!("webhook|{chat}")
            }
            other => format!("{other}|{}", msg.transport_chat_id),
        }
    }

    /// Resolve the session identity for an inbound message.
    ///
    /// Looks up the active pointer; when absent, derives a default
    /// conversation key from the transport id and binds it. A pointer
    /// referencing a missing session is honored by creating the session
    /// lazily on first use (the store does this), so resolution never
    /// fails for a well-formed message.
    pub async fn resolve(&self, msg: &InboundMessage) -> Result<SessionIdentity> {
        let pointer_key = Self::pointer_key(msg);

        if let Some(conversation_key) = self.pointers.get(&pointer_key).await? {
            debug!(pointer_key, conversation_key, "resolved active pointer");
            return SessionIdentity::new(&msg.channel, conversation_key);
        }

        // Legacy compatibility: no pointer yet. Derive a stable default
        // key from the transport id and bind it.
        let conversation_key = identity::derive_default_key(&msg.transport_chat_id);
        let identity = SessionIdentity::new(&msg.channel, &conversation_key)?;
        self.pointers.bind(&pointer_key, &conversation_key).await?;
        info!(pointer_key, conversation_key, "bound default conversation key");
        Ok(identity)
    }

    /// Switch the active conversation for a pointer key.
    ///
    /// Idempotent: switching to the already-active target is a no-op.
    pub async fn switch(
        &self,
        channel: &str,
        pointer_key: &str,
        conversation_key: &str,
    ) -> Result<SessionIdentity> {
        let identity = SessionIdentity::new(channel, conversation_key)?;
        self.pointers.bind(pointer_key, conversation_key).await?;
        Ok(identity)
    }

    /// Delete a session and repoint its pointer key.
    ///
    /// The pointer moves to the most recently updated remaining session
    /// on the same channel; when none remain, a default key derived from
    /// `transport_chat_id` is bound (the session itself is created
    /// lazily on next use).
    pub async fn delete_and_repoint(
        &self,
        identity: &SessionIdentity,
        pointer_key: &str,
        transport_chat_id: &str,
    ) -> Result<SessionIdentity> {
        self.sessions.delete(identity).await?;

        let mut newest: Option<(SessionIdentity, chrono::DateTime<chrono::Utc>)> = None;
        for candidate in self.sessions.list(Some(&identity.channel_type)).await? {
            if &candidate == identity {
                continue;
            }
            if let Some(session) = self.sessions.load(&candidate).await? {
                let is_newer = newest
                    .as_ref()
                    .map(|(_, at)| session.updated_at > *at)
                    .unwrap_or(true);
                if is_newer {
                    newest = Some((candidate, session.updated_at));
                }
            }
        }

        let target = match newest {
            Some((identity, _)) => identity,
            None => SessionIdentity::new(
                &identity.channel_type,
                identity::derive_default_key(transport_chat_id),
            )?,
        };
        self.pointers
            .bind(pointer_key, &target.conversation_key)
            .await?;
        info!(
            pointer_key,
            target = %target,
            "repointed after session delete"
        );
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use lantern_types::message::Message;

    fn router() -> (Arc<SessionStore>, Arc<ActivePointerRegistry>, SessionRouter) {
        let storage: Arc<MemStorage> = Arc::new(MemStorage::new());
        let sessions = Arc::new(SessionStore::new(storage.clone()));
        let pointers = Arc::new(ActivePointerRegistry::new(storage));
        let r = SessionRouter::new(pointers.clone(), sessions.clone());
        (sessions, pointers, r)
    }

    fn telegram_msg(chat_id: &str) -> InboundMessage {
        InboundMessage::new("telegram", "user1", chat_id, "hello")
    }

    #[test]
    fn pointer_keys_by_channel() {
        assert_eq!(
            SessionRouter::pointer_key(&telegram_msg("42")),
            "telegram|42"
        );

        let web = InboundMessage::new("web", "alice", "conn-9", "hi")
            .with_metadata("client_instance_id", serde_json::json!("tab-1"));
        assert_eq!(SessionRouter::pointer_key(&web), "web|alice|tab-1");

        let web_no_client = InboundMessage::new("web", "alice", "conn-9", "hi");
        assert_eq!(
            SessionRouter::pointer_key(&web_no_client),
            "web|alice|default"
        );

        let hook = InboundMessage::new("webhook", "hook", "", "payload");
        assert_eq!(SessionRouter::pointer_key(&hook), "webhook|default");
    }

    #[tokio::test]
    async fn missing_pointer_derives_default_and_binds() {
        let (_, pointers, router) = router();
        let msg = telegram_msg("12345678");

        let identity = router.resolve(&msg).await.unwrap();
        assert_eq!(identity.channel_type, "telegram");
        assert_eq!(identity.conversation_key, "12345678");

        // Subsequent call finds the pointer.
        assert_eq!(
            pointers.get("telegram|12345678").await.unwrap(),
            Some("12345678".into())
        );
        let again = router.resolve(&msg).await.unwrap();
        assert_eq!(again, identity);
    }

    #[tokio::test]
    async fn switch_changes_resolution() {
        let (_, _, router) = router();
        let msg = telegram_msg("12345678");
        let original = router.resolve(&msg).await.unwrap();

        router
            .switch("telegram", "telegram|12345678", "newkey-1")
            .await
            .unwrap();
        let switched = router.resolve(&msg).await.unwrap();
        assert_ne!(switched, original);
        assert_eq!(switched.conversation_key, "newkey-1");
    }

    #[tokio::test]
    async fn switch_back_restores_original_session_state() {
        let (sessions, _, router) = router();
        let msg = telegram_msg("12345678");

        // Build up history in the original session K1.
        let k1 = router.resolve(&msg).await.unwrap();
        let mut session = sessions.get_or_create(&k1, "12345678").await.unwrap();
        session.push_message(Message::user("original history"));
        sessions.save(&session).await.unwrap();

        // Switch to K2, then back to K1.
        router
            .switch("telegram", "telegram|12345678", "kkkk2222")
            .await
            .unwrap();
        router
            .switch("telegram", "telegram|12345678", &k1.conversation_key)
            .await
            .unwrap();

        let restored = router.resolve(&msg).await.unwrap();
        assert_eq!(restored, k1);
        let reloaded = sessions.get_or_create(&restored, "12345678").await.unwrap();
        assert_eq!(reloaded.messages.len(), 1);
        assert_eq!(reloaded.messages[0].content, "original history");
    }

    #[tokio::test]
    async fn delete_repoints_to_most_recent_remaining() {
        let (sessions, pointers, router) = router();

        // Two sessions on the channel; "younger" updated later.
        let older = SessionIdentity::new("telegram", "older111").unwrap();
        let younger = SessionIdentity::new("telegram", "younger1").unwrap();
        let mut s_old = lantern_types::session::Session::new(older.clone(), "42");
        s_old.updated_at = chrono::Utc::now() - chrono::Duration::hours(2);
        sessions.save(&s_old).await.unwrap();
        let s_new = lantern_types::session::Session::new(younger.clone(), "42");
        sessions.save(&s_new).await.unwrap();

        let active = SessionIdentity::new("telegram", "active11").unwrap();
        sessions
            .save(&lantern_types::session::Session::new(active.clone(), "42"))
            .await
            .unwrap();
        pointers.bind("telegram|42", "active11").await.unwrap();

        let target = router
            .delete_and_repoint(&active, "telegram|42", "42")
            .await
            .unwrap();
        assert_eq!(target, younger);
        assert_eq!(
            pointers.get("telegram|42").await.unwrap(),
            Some("younger1".into())
        );
        assert!(sessions.load(&active).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_last_session_repoints_to_default() {
        let (sessions, pointers, router) = router();
        let only = SessionIdentity::new("telegram", "only1111").unwrap();
        sessions
            .save(&lantern_types::session::Session::new(only.clone(), "42"))
            .await
            .unwrap();
        pointers.bind("telegram|42", "only1111").await.unwrap();

        let target = router
            .delete_and_repoint(&only, "telegram|42", "42")
            .await
            .unwrap();
        // No sessions remain: a default key derived from the transport id.
        assert_eq!(target.conversation_key, "chat-0042");
        assert_eq!(
            pointers.get("telegram|42").await.unwrap(),
            Some("chat-0042".into())
        );
    }
}
