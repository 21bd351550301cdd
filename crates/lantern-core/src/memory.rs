//! Scoped structured memory.
//!
//! [`MemoryStore`] persists [`MemoryItem`]s as JSONL: episodic items in
//! per-day files under `memory/items/episodic/`, semantic and procedural
//! items in single append files. Records are append-only; updates append
//! a newer record with the same id and the load path keeps the last one
//! (last-write-wins log). Working-layer items stay in memory only.
//!
//! Retrieval takes an explicit scope chain and never returns items
//! outside it, so memory can never leak across session identities.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use lantern_types::config::MemoryBudgets;
use lantern_types::error::Result;
use lantern_types::memory::{MemoryItem, MemoryLayer, MemoryScope, MemoryStatus};

use crate::storage::Storage;

const EPISODIC_DIR: &str = "memory/items/episodic";
const DURABLE_DIR: &str = "memory/items";
const SEMANTIC_FILE: &str = "semantic.jsonl";
const PROCEDURAL_FILE: &str = "procedural.jsonl";

/// Outcome of a memory write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new item was stored.
    Inserted,
    /// An item with the same fingerprint existed in the scope; its
    /// timestamps were refreshed instead.
    Deduplicated,
    /// A durable item with the same title existed and was superseded.
    Superseded {
        /// Id of the item that was replaced.
        old_id: String,
    },
}

/// Structured memory store with scope-checked retrieval.
pub struct MemoryStore {
    storage: Arc<dyn Storage>,
    /// All persisted items, last-write-wins by id. Loaded lazily.
    cache: Mutex<Option<HashMap<String, MemoryItem>>>,
    /// Working-layer items, in memory only.
    working: Mutex<Vec<MemoryItem>>,
    /// Serializes all file appends.
    write_lock: Mutex<()>,
    budgets: MemoryBudgets,
}

impl MemoryStore {
    /// Create a store over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>, budgets: MemoryBudgets) -> Self {
        Self {
            storage,
            cache: Mutex::new(None),
            working: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
            budgets,
        }
    }

    fn file_for(item: &MemoryItem) -> (String, String) {
        match item.layer {
            MemoryLayer::Episodic | MemoryLayer::Working => (
                EPISODIC_DIR.to_string(),
                format!("{}.jsonl", item.created_at.format("%Y-%m-%d")),
            ),
            MemoryLayer::Semantic => (DURABLE_DIR.to_string(), SEMANTIC_FILE.to_string()),
            MemoryLayer::Procedural => (DURABLE_DIR.to_string(), PROCEDURAL_FILE.to_string()),
        }
    }

    async fn load_file(&self, dir: &str, key: &str, into: &mut HashMap<String, MemoryItem>) {
        let content = match self.storage.get_text(dir, key).await {
            Ok(Some(content)) => content,
            Ok(None) => return,
            Err(e) => {
                warn!(dir, key, error = %e, "failed to read memory file");
                return;
            }
        };
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryItem>(trimmed) {
                // Later records with the same id replace earlier ones.
                Ok(item) => {
                    into.insert(item.id.clone(), item);
                }
                Err(e) => warn!(dir, key, error = %e, "skipping malformed memory line"),
            }
        }
    }

    async fn ensure_loaded(&self) -> Result<()> {
        let mut cache = self.cache.lock().await;
        if cache.is_some() {
            return Ok(());
        }
        let mut items = HashMap::new();
        for key in self.storage.list(EPISODIC_DIR, "").await.unwrap_or_default() {
            self.load_file(EPISODIC_DIR, &key, &mut items).await;
        }
        self.load_file(DURABLE_DIR, SEMANTIC_FILE, &mut items).await;
        self.load_file(DURABLE_DIR, PROCEDURAL_FILE, &mut items).await;
        debug!(items = items.len(), "loaded memory store");
        *cache = Some(items);
        Ok(())
    }

    async fn append(&self, item: &MemoryItem) -> Result<()> {
        let (dir, key) = Self::file_for(item);
        let line = serde_json::to_string(item)?;
        let _guard = self.write_lock.lock().await;
        self.storage.append_line(&dir, &key, &line).await
    }

    /// Write an item.
    ///
    /// Fingerprint duplicates within the same scope refresh the existing
    /// item's timestamps. Durable types with a matching `(scope, type,
    /// title)` supersede the older item: the old record is re-appended
    /// with `Superseded` status and a link to its replacement.
    pub async fn write(&self, item: MemoryItem) -> Result<WriteOutcome> {
        if item.layer == MemoryLayer::Working {
            self.working.lock().await.push(item);
            return Ok(WriteOutcome::Inserted);
        }
        self.ensure_loaded().await?;

        // Fingerprint dedup within scope.
        let duplicate = {
            let cache = self.cache.lock().await;
            cache.as_ref().and_then(|items| {
                items
                    .values()
                    .find(|existing| {
                        existing.status == MemoryStatus::Active
                            && existing.scope == item.scope
                            && existing.fingerprint == item.fingerprint
                    })
                    .map(|existing| existing.id.clone())
            })
        };
        if let Some(existing_id) = duplicate {
            let refreshed = {
                let mut cache = self.cache.lock().await;
                let items = cache.as_mut().expect("loaded above");
                let existing = items.get_mut(&existing_id).expect("indexed above");
                existing.updated_at = Utc::now();
                existing.last_accessed_at = Utc::now();
                existing.clone()
            };
            self.append(&refreshed).await?;
            debug!(id = %existing_id, "memory write deduplicated by fingerprint");
            return Ok(WriteOutcome::Deduplicated);
        }

        // Supersede detection for durable types: same scope + type +
        // title means the new item replaces the old fact.
        let superseded = if item.item_type.is_durable() {
            let cache = self.cache.lock().await;
            cache.as_ref().and_then(|items| {
                items
                    .values()
                    .find(|existing| {
                        existing.status == MemoryStatus::Active
                            && existing.scope == item.scope
                            && existing.item_type == item.item_type
                            && existing.title.eq_ignore_ascii_case(&item.title)
                    })
                    .map(|existing| existing.id.clone())
            })
        } else {
            None
        };

        if let Some(old_id) = superseded {
            let old = {
                let mut cache = self.cache.lock().await;
                let items = cache.as_mut().expect("loaded above");
                let old = items.get_mut(&old_id).expect("indexed above");
                old.status = MemoryStatus::Superseded;
                old.superseded_by_id = Some(item.id.clone());
                old.updated_at = Utc::now();
                old.clone()
            };
            self.append(&old).await?;
            self.append(&item).await?;
            let mut cache = self.cache.lock().await;
            cache
                .as_mut()
                .expect("loaded above")
                .insert(item.id.clone(), item);
            debug!(old_id = %old_id, "memory item superseded");
            return Ok(WriteOutcome::Superseded { old_id });
        }

        self.append(&item).await?;
        let mut cache = self.cache.lock().await;
        cache
            .as_mut()
            .expect("loaded above")
            .insert(item.id.clone(), item);
        Ok(WriteOutcome::Inserted)
    }

    /// Retrieve active items visible through `scope_chain`, ranked.
    ///
    /// The chain expresses precedence: items in an earlier scope rank
    /// ahead of items in a later one. Within a scope, ranking combines
    /// salience, recency, and a keyword match against `query`. Expired
    /// and non-active items are excluded. Items outside the chain are
    /// never returned.
    pub async fn retrieve(
        &self,
        scope_chain: &[MemoryScope],
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        self.ensure_loaded().await?;
        let now = Utc::now();
        let query_terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|t| t.len() > 2)
            .map(String::from)
            .collect();

        let mut scored: Vec<(usize, f64, MemoryItem)> = Vec::new();
        {
            let cache = self.cache.lock().await;
            let items = cache.as_ref().expect("loaded above");
            let working = self.working.lock().await;
            for item in items.values().chain(working.iter()) {
                if item.status != MemoryStatus::Active || item.expired(now) {
                    continue;
                }
                let Some(precedence) = scope_chain.iter().position(|s| *s == item.scope) else {
                    continue;
                };
                let age_hours = (now - item.updated_at).num_minutes() as f64 / 60.0;
                let recency = 1.0 / (1.0 + age_hours / 24.0);
                let haystack = format!("{} {}", item.title, item.content).to_lowercase();
                let matches = query_terms
                    .iter()
                    .filter(|t| haystack.contains(t.as_str()))
                    .count() as f64;
                let score = item.salience + 0.5 * recency + 0.3 * matches;
                scored.push((precedence, score, item.clone()));
            }
        }

        scored.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
        });
        scored.truncate(limit.min(self.budgets.max_items));

        // Touch access times in the cache.
        {
            let mut cache = self.cache.lock().await;
            let items = cache.as_mut().expect("loaded above");
            for (_, _, item) in &scored {
                if let Some(cached) = items.get_mut(&item.id) {
                    cached.last_accessed_at = now;
                }
            }
        }

        Ok(scored.into_iter().map(|(_, _, item)| item).collect())
    }

    /// Pack retrieved items into a prompt block under the token budgets.
    ///
    /// Items are added in rank order until the soft budget is reached;
    /// the hard budget is never exceeded. Returns `None` when nothing
    /// fits.
    pub fn pack(&self, items: &[MemoryItem]) -> Option<String> {
        if items.is_empty() {
            return None;
        }
        let estimate = |s: &str| (s.len() as f64 / 3.5).ceil() as usize;
        let mut lines = vec!["## Memory".to_string()];
        let mut tokens = estimate(&lines[0]);
        for item in items {
            let line = format!(
                "- [{}] {}: {}",
                serde_json::to_value(item.item_type)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default(),
                item.title,
                item.content
            );
            let cost = estimate(&line);
            if tokens + cost > self.budgets.max_tokens {
                break;
            }
            tokens += cost;
            lines.push(line);
            if tokens >= self.budgets.soft_tokens {
                break;
            }
        }
        if lines.len() == 1 {
            return None;
        }
        Some(lines.join("\n"))
    }

    /// Promote an item to the global scope (explicit promotion is the
    /// only path that writes `global` from a scoped turn).
    pub async fn promote_to_global(&self, item: &MemoryItem) -> Result<WriteOutcome> {
        let mut promoted = item.clone();
        promoted.id = uuid::Uuid::new_v4().to_string();
        promoted.scope = MemoryScope::Global;
        promoted.source = format!("promotion:{}", item.id);
        promoted.updated_at = Utc::now();
        self.write(promoted).await
    }
}
