//! Active pointer registry.
//!
//! Maps transport pointer keys (`telegram|<chatId>`,
//! `web|<user>|<client>`, `webhook|<chatIdOrDefault>`) to the active
//! conversation key for that transport surface. Persisted as one JSON
//! file written atomically; the in-memory cache is invalidated only by
//! registry mutations.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use lantern_types::error::Result;

use crate::storage::Storage;

const PREFERENCES_DIR: &str = "preferences";
const POINTERS_FILE: &str = "pointers.json";

/// On-disk schema of `preferences/pointers.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointerFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    pointers: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl Default for PointerFile {
    fn default() -> Self {
        Self {
            version: 1,
            pointers: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Pointer key → conversation key registry.
///
/// All mutations run under one write lock, which also covers the cache
/// update, so readers never observe a cache ahead of or behind disk.
pub struct ActivePointerRegistry {
    storage: Arc<dyn Storage>,
    cache: Mutex<Option<PointerFile>>,
    write_lock: Mutex<()>,
}

impl ActivePointerRegistry {
    /// Create a registry over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: Mutex::new(None),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<PointerFile> {
        {
            let cache = self.cache.lock().await;
            if let Some(file) = cache.as_ref() {
                return Ok(file.clone());
            }
        }
        let file = match self.storage.get_text(PREFERENCES_DIR, POINTERS_FILE).await? {
            Some(content) => serde_json::from_str(&content).unwrap_or_default(),
            None => PointerFile::default(),
        };
        let mut cache = self.cache.lock().await;
        *cache = Some(file.clone());
        Ok(file)
    }

    async fn persist(&self, file: &PointerFile) -> Result<()> {
        let content = serde_json::to_string_pretty(file)?;
        self.storage
            .put_text(PREFERENCES_DIR, POINTERS_FILE, &content)
            .await?;
        let mut cache = self.cache.lock().await;
        *cache = Some(file.clone());
        Ok(())
    }

    /// Look up the active conversation key for a pointer key.
    pub async fn get(&self, pointer_key: &str) -> Result<Option<String>> {
        Ok(self.load().await?.pointers.get(pointer_key).cloned())
    }

    /// Bind a pointer key to a conversation key.
    ///
    /// Idempotent: binding to the already-active target is a no-op and
    /// performs no write.
    pub async fn bind(&self, pointer_key: &str, conversation_key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        if file.pointers.get(pointer_key).map(String::as_str) == Some(conversation_key) {
            debug!(pointer_key, conversation_key, "pointer already bound, no-op");
            return Ok(());
        }
        file.pointers
            .insert(pointer_key.to_string(), conversation_key.to_string());
        file.updated_at = Utc::now();
        self.persist(&file).await?;
        debug!(pointer_key, conversation_key, "pointer bound");
        Ok(())
    }

    /// Remove a pointer binding. Removing a missing key is a no-op.
    pub async fn remove(&self, pointer_key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        if file.pointers.remove(pointer_key).is_none() {
            return Ok(());
        }
        file.updated_at = Utc::now();
        self.persist(&file).await
    }

    /// All current bindings.
    pub async fn all(&self) -> Result<HashMap<String, String>> {
        Ok(self.load().await?.pointers)
    }
}
