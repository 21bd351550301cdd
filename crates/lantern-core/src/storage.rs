//! Blob/text key-value storage.
//!
//! All persistent state goes through the [`Storage`] trait: small JSON
//! records written atomically (write-temp-then-rename) and JSONL files
//! grown by line appends. Two backends ship with the runtime:
//! [`NativeStorage`] over a filesystem workspace and [`MemStorage`] for
//! tests and embedded runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use lantern_types::error::{LanternError, Result};

/// Atomic small-blob key-value storage.
///
/// `dir` is a logical directory under the workspace root and may contain
/// `/` separators (e.g. `"memory/items/episodic"`). `key` is a single
/// file name and may not contain separators or traversal sequences.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `content` under `dir/key`, atomically replacing any
    /// previous value.
    async fn put_text(&self, dir: &str, key: &str, content: &str) -> Result<()>;

    /// Read the value under `dir/key`, or `None` when absent.
    async fn get_text(&self, dir: &str, key: &str) -> Result<Option<String>>;

    /// Append one line (newline added) to `dir/key`, creating it if
    /// needed. Appends are not atomic across processes; callers
    /// serialize writers per file.
    async fn append_line(&self, dir: &str, key: &str, line: &str) -> Result<()>;

    /// List keys under `dir` starting with `prefix`, sorted.
    async fn list(&self, dir: &str, prefix: &str) -> Result<Vec<String>>;

    /// Delete `dir/key`. Deleting a missing key is not an error.
    async fn delete(&self, dir: &str, key: &str) -> Result<()>;
}

/// Reject keys and dirs that could escape the workspace.
fn validate_component(what: &str, value: &str, allow_separators: bool) -> Result<()> {
    if value.is_empty() {
        return Err(LanternError::SecurityViolation {
            reason: format!("{what} must not be empty"),
        });
    }
    if value.contains("..") {
        return Err(LanternError::SecurityViolation {
            reason: format!("{what} contains path traversal sequence: {value:?}"),
        });
    }
    if value.contains('\0') {
        return Err(LanternError::SecurityViolation {
            reason: format!("{what} contains a null byte"),
        });
    }
    if !allow_separators && (value.contains('/') || value.contains('\\')) {
        return Err(LanternError::SecurityViolation {
            reason: format!("{what} contains a directory separator: {value:?}"),
        });
    }
    if value.starts_with('/') || value.contains('\\') {
        return Err(LanternError::SecurityViolation {
            reason: format!("{what} must be relative: {value:?}"),
        });
    }
    Ok(())
}

fn validate(dir: &str, key: &str) -> Result<()> {
    validate_component("storage dir", dir, true)?;
    validate_component("storage key", key, false)
}

/// Filesystem-backed storage rooted at a workspace directory.
pub struct NativeStorage {
    root: PathBuf,
}

impl NativeStorage {
    /// Create storage rooted at `root`. The directory is created lazily
    /// on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, dir: &str, key: &str) -> PathBuf {
        self.root.join(dir).join(key)
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn put_text(&self, dir: &str, key: &str, content: &str) -> Result<()> {
        validate(dir, key)?;
        let path = self.path(dir, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-temp-then-rename for atomic replacement.
        let tmp = path.with_file_name(format!(".{key}.tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), bytes = content.len(), "stored blob");
        Ok(())
    }

    async fn get_text(&self, dir: &str, key: &str) -> Result<Option<String>> {
        validate(dir, key)?;
        match tokio::fs::read_to_string(self.path(dir, key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn append_line(&self, dir: &str, key: &str, line: &str) -> Result<()> {
        validate(dir, key)?;
        let path = self.path(dir, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut content = line.to_string();
        content.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list(&self, dir: &str, prefix: &str) -> Result<Vec<String>> {
        validate_component("storage dir", dir, true)?;
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.root.join(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Skip in-flight temp files from atomic writes.
            if name.starts_with('.') {
                continue;
            }
            if name.starts_with(prefix) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, dir: &str, key: &str) -> Result<()> {
        validate(dir, key)?;
        match tokio::fs::remove_file(self.path(dir, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory storage for tests and embedded runs.
#[derive(Default)]
pub struct MemStorage {
    blobs: Mutex<BTreeMap<(String, String), String>>,
}

impl MemStorage {
    /// Create empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn put_text(&self, dir: &str, key: &str, content: &str) -> Result<()> {
        validate(dir, key)?;
        self.blobs
            .lock()
            .unwrap()
            .insert((dir.to_string(), key.to_string()), content.to_string());
        Ok(())
    }

    async fn get_text(&self, dir: &str, key: &str) -> Result<Option<String>> {
        validate(dir, key)?;
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .get(&(dir.to_string(), key.to_string()))
            .cloned())
    }

    async fn append_line(&self, dir: &str, key: &str, line: &str) -> Result<()> {
        validate(dir, key)?;
        let mut blobs = self.blobs.lock().unwrap();
        let entry = blobs
            .entry((dir.to_string(), key.to_string()))
            .or_default();
        entry.push_str(line);
        entry.push('\n');
        Ok(())
    }

    async fn list(&self, dir: &str, prefix: &str) -> Result<Vec<String>> {
        validate_component("storage dir", dir, true)?;
        let blobs = self.blobs.lock().unwrap();
        let mut keys: Vec<String> = blobs
            .keys()
            .filter(|(d, k)| d == dir && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, dir: &str, key: &str) -> Result<()> {
        validate(dir, key)?;
        self.blobs
            .lock()
            .unwrap()
            .remove(&(dir.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_root(prefix: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        std::env::temp_dir().join(format!("lantern_storage_{prefix}_{pid}_{id}"))
    }

    #[tokio::test]
    async fn mem_put_get_roundtrip() {
        let storage = MemStorage::new();
        storage.put_text("sessions", "a.json", "{}").await.unwrap();
        assert_eq!(
            storage.get_text("sessions", "a.json").await.unwrap(),
            Some("{}".into())
        );
        assert_eq!(storage.get_text("sessions", "b.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mem_append_builds_lines() {
        let storage = MemStorage::new();
        storage.append_line("memory", "log.jsonl", "{\"a\":1}").await.unwrap();
        storage.append_line("memory", "log.jsonl", "{\"a\":2}").await.unwrap();
        let content = storage.get_text("memory", "log.jsonl").await.unwrap().unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[tokio::test]
    async fn mem_list_filters_by_prefix() {
        let storage = MemStorage::new();
        storage.put_text("sessions", "web:a.json", "{}").await.unwrap();
        storage.put_text("sessions", "web:b.json", "{}").await.unwrap();
        storage.put_text("sessions", "telegram:c.json", "{}").await.unwrap();

        let keys = storage.list("sessions", "web:").await.unwrap();
        assert_eq!(keys, vec!["web:a.json", "web:b.json"]);
    }

    #[tokio::test]
    async fn mem_delete_is_idempotent() {
        let storage = MemStorage::new();
        storage.put_text("d", "k", "v").await.unwrap();
        storage.delete("d", "k").await.unwrap();
        storage.delete("d", "k").await.unwrap();
        assert_eq!(storage.get_text("d", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn traversal_rejected() {
        let storage = MemStorage::new();
        assert!(storage.put_text("..", "k", "v").await.is_err());
        assert!(storage.put_text("d", "../k", "v").await.is_err());
        assert!(storage.put_text("d", "a/b", "v").await.is_err());
        assert!(storage.get_text("d", "").await.is_err());
    }

    #[tokio::test]
    async fn native_put_get_roundtrip() {
        let root = temp_root("roundtrip");
        let storage = NativeStorage::new(&root);
        storage
            .put_text("preferences", "pointers.json", "{\"version\":1}")
            .await
            .unwrap();
        assert_eq!(
            storage.get_text("preferences", "pointers.json").await.unwrap(),
            Some("{\"version\":1}".into())
        );
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn native_put_replaces_atomically() {
        let root = temp_root("replace");
        let storage = NativeStorage::new(&root);
        storage.put_text("d", "k.json", "one").await.unwrap();
        storage.put_text("d", "k.json", "two").await.unwrap();
        assert_eq!(
            storage.get_text("d", "k.json").await.unwrap(),
            Some("two".into())
        );
        // No temp files left behind.
        let keys = storage.list("d", "").await.unwrap();
        assert_eq!(keys, vec!["k.json"]);
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn native_nested_dirs_and_append() {
        let root = temp_root("nested");
        let storage = NativeStorage::new(&root);
        storage
            .append_line("memory/items/episodic", "2026-08-01.jsonl", "{\"x\":1}")
            .await
            .unwrap();
        storage
            .append_line("memory/items/episodic", "2026-08-01.jsonl", "{\"x\":2}")
            .await
            .unwrap();
        let content = storage
            .get_text("memory/items/episodic", "2026-08-01.jsonl")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content.lines().count(), 2);
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn native_list_missing_dir_is_empty() {
        let root = temp_root("missing");
        let storage = NativeStorage::new(&root);
        assert!(storage.list("nope", "").await.unwrap().is_empty());
        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
