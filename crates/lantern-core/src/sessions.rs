//! Session persistence.
//!
//! [`SessionStore`] owns all [`Session`] records: a write-through
//! in-memory cache over one JSON file per session at
//! `sessions/{channel}:{key}.json`. Writes are atomic (the storage
//! layer renames into place) and serialized per session id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use lantern_types::error::Result;
use lantern_types::identity::SessionIdentity;
use lantern_types::session::Session;

use crate::storage::Storage;

const SESSIONS_DIR: &str = "sessions";

/// Loads and saves [`Session`] records.
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    cache: Mutex<HashMap<String, Session>>,
    /// Per-session write locks, created on demand.
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    /// Create a store over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: Mutex::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    fn file_key(identity: &SessionIdentity) -> String {
        format!("{}.json", identity.session_id())
    }

    async fn write_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Get an existing session or create a fresh empty one.
    ///
    /// Checks the cache first, then disk. New sessions are cached but
    /// not persisted until the first [`save`](SessionStore::save).
    pub async fn get_or_create(
        &self,
        identity: &SessionIdentity,
        transport_chat_id: &str,
    ) -> Result<Session> {
        let session_id = identity.session_id();
        {
            let cache = self.cache.lock().await;
            if let Some(session) = cache.get(&session_id) {
                return Ok(session.clone());
            }
        }

        if let Some(session) = self.load(identity).await? {
            let mut cache = self.cache.lock().await;
            cache.insert(session_id, session.clone());
            return Ok(session);
        }

        let session = Session::new(identity.clone(), transport_chat_id);
        let mut cache = self.cache.lock().await;
        cache.insert(session_id, session.clone());
        Ok(session)
    }

    /// Load a session from disk, bypassing the cache.
    pub async fn load(&self, identity: &SessionIdentity) -> Result<Option<Session>> {
        let content = self
            .storage
            .get_text(SESSIONS_DIR, &Self::file_key(identity))
            .await?;
        match content {
            Some(content) => match serde_json::from_str::<Session>(&content) {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    warn!(
                        session = %identity,
                        error = %e,
                        "session file is malformed, treating as missing"
                    );
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Persist a session atomically and update the cache.
    pub async fn save(&self, session: &Session) -> Result<()> {
        let session_id = session.identity.session_id();
        let lock = self.write_lock(&session_id).await;
        let _guard = lock.lock().await;

        let content = serde_json::to_string(session)?;
        self.storage
            .put_text(SESSIONS_DIR, &Self::file_key(&session.identity), &content)
            .await?;

        let mut cache = self.cache.lock().await;
        cache.insert(session_id.clone(), session.clone());
        debug!(session = %session_id, messages = session.messages.len(), "saved session");
        Ok(())
    }

    /// List identities of all persisted sessions, optionally filtered
    /// by channel type.
    pub async fn list(&self, channel: Option<&str>) -> Result<Vec<SessionIdentity>> {
        let prefix = channel.map(|c| format!("{c}:")).unwrap_or_default();
        let keys = self.storage.list(SESSIONS_DIR, &prefix).await?;
        let mut identities = Vec::new();
        for key in keys {
            let Some(stem) = key.strip_suffix(".json") else {
                continue;
            };
            let Some((channel, conversation_key)) = stem.split_once(':') else {
                continue;
            };
            match SessionIdentity::new(channel, conversation_key) {
                Ok(identity) => identities.push(identity),
                Err(e) => warn!(file = %key, error = %e, "skipping invalid session file name"),
            }
        }
        Ok(identities)
    }

    /// Delete a session from disk and cache.
    pub async fn delete(&self, identity: &SessionIdentity) -> Result<()> {
        let session_id = identity.session_id();
        let lock = self.write_lock(&session_id).await;
        let _guard = lock.lock().await;

        self.storage
            .delete(SESSIONS_DIR, &Self::file_key(identity))
            .await?;
        self.cache.lock().await.remove(&session_id);
        debug!(session = %session_id, "deleted session");
        Ok(())
    }

    /// Drop a session from the cache; the next read reloads from disk.
    pub async fn invalidate(&self, identity: &SessionIdentity) {
        self.cache.lock().await.remove(&identity.session_id());
    }
}
