//! Structured memory items and scopes.
//!
//! Memory is organized in layers (working/episodic/semantic/procedural)
//! and namespaced by [`MemoryScope`]. Retrieval never crosses session
//! scopes; the only shared namespace is the explicit `global` scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::SessionIdentity;

/// Which memory layer an item lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    /// Short-lived scratch for the current task.
    Working,
    /// Per-day event log of what happened.
    Episodic,
    /// Durable facts and preferences.
    Semantic,
    /// Durable how-to knowledge (commands, fixes).
    Procedural,
}

/// What kind of fact an item records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Decision,
    Constraint,
    Failure,
    Fix,
    Preference,
    ProjectFact,
    TaskState,
    CommandResult,
}

impl MemoryType {
    /// Durable types participate in contradiction / supersede detection.
    pub fn is_durable(self) -> bool {
        matches!(
            self,
            Self::Decision | Self::Constraint | Self::Preference | Self::ProjectFact
        )
    }
}

/// Lifecycle status of a memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    /// Returned by default retrieval.
    Active,
    /// Replaced by a newer item; excluded from default retrieval.
    Superseded,
    /// Kept for audit only.
    Archived,
}

/// Namespace of a memory item.
///
/// The string forms are `global`, `session:<channel>:<key>`,
/// `goal:<channel>:<key>:<goalId>` and `task:<taskId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryScope {
    /// Shared across all sessions; written only by explicit promotion.
    Global,
    /// Scoped to one conversation.
    Session(SessionIdentity),
    /// Scoped to one goal under a conversation.
    Goal(SessionIdentity, String),
    /// Scoped to one standalone task.
    Task(String),
}

impl MemoryScope {
    /// Whether retrieving under `active` may return items in this scope.
    ///
    /// Session and goal scopes must match the active session identity;
    /// task scopes are reachable only through an explicit scope chain,
    /// and `global` is always reachable.
    pub fn visible_from(&self, active: &SessionIdentity) -> bool {
        match self {
            Self::Global => true,
            Self::Session(id) => id == active,
            Self::Goal(id, _) => id == active,
            Self::Task(_) => true,
        }
    }

    /// Parse the canonical string form.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "global" {
            return Some(Self::Global);
        }
        let mut parts = s.splitn(2, ':');
        let kind = parts.next()?;
        let rest = parts.next()?;
        match kind {
            "session" => {
                let (channel, key) = rest.split_once(':')?;
                SessionIdentity::new(channel, key).ok().map(Self::Session)
            }
            "goal" => {
                let mut it = rest.splitn(3, ':');
                let channel = it.next()?;
                let key = it.next()?;
                let goal_id = it.next()?;
                SessionIdentity::new(channel, key)
                    .ok()
                    .map(|id| Self::Goal(id, goal_id.to_string()))
            }
            "task" => Some(Self::Task(rest.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Session(id) => write!(f, "session:{}:{}", id.channel_type, id.conversation_key),
            Self::Goal(id, goal) => {
                write!(f, "goal:{}:{}:{goal}", id.channel_type, id.conversation_key)
            }
            Self::Task(task) => write!(f, "task:{task}"),
        }
    }
}

impl Serialize for MemoryScope {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MemoryScope {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        Self::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid scope: {s}")))
    }
}

/// One structured memory item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique item id.
    pub id: String,

    /// Layer this item belongs to.
    pub layer: MemoryLayer,

    /// Kind of fact recorded.
    #[serde(rename = "type")]
    pub item_type: MemoryType,

    /// Short title, used for supersede matching on durable types.
    pub title: String,

    /// Full content.
    pub content: String,

    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Namespace of this item.
    pub scope: MemoryScope,

    /// Where the item came from (turn id, tool name, "promotion", ...).
    #[serde(default)]
    pub source: String,

    /// Confidence in [0, 1].
    pub confidence: f64,

    /// Salience in [0, 1]; weighs into retrieval ranking.
    pub salience: f64,

    /// Optional time-to-live in days; expired items are skipped on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Last update time.
    pub updated_at: DateTime<Utc>,

    /// Last retrieval time.
    pub last_accessed_at: DateTime<Utc>,

    /// Ids of related items.
    #[serde(default)]
    pub references: Vec<String>,

    /// Dedup fingerprint, unique within a scope.
    pub fingerprint: String,

    /// Lifecycle status.
    pub status: MemoryStatus,

    /// Id of the item that superseded this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by_id: Option<String>,
}

impl MemoryItem {
    /// Create an active item with a computed fingerprint.
    pub fn new(
        layer: MemoryLayer,
        item_type: MemoryType,
        title: impl Into<String>,
        content: impl Into<String>,
        scope: MemoryScope,
    ) -> Self {
        let title = title.into();
        let content = content.into();
        let now = Utc::now();
        let fingerprint = fingerprint(&title, &content);
        Self {
            id: Uuid::new_v4().to_string(),
            layer,
            item_type,
            title,
            content,
            tags: Vec::new(),
            scope,
            source: String::new(),
            confidence: 0.5,
            salience: 0.5,
            ttl_days: None,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            references: Vec::new(),
            fingerprint,
            status: MemoryStatus::Active,
            superseded_by_id: None,
        }
    }

    /// Whether the item's TTL has elapsed relative to `now`.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_days {
            Some(days) => now - self.created_at > chrono::Duration::days(i64::from(days)),
            None => false,
        }
    }
}

/// Content fingerprint used for dedup within a scope.
///
/// Normalizes whitespace and case so trivially-reworded duplicates
/// collide. FNV-1a over the normalized bytes.
pub fn fingerprint(title: &str, content: &str) -> String {
    let normalized: String = format!("{title}\n{content}")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in normalized.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> SessionIdentity {
        SessionIdentity::new("web", "abcd1234").unwrap()
    }

    #[test]
    fn scope_display_and_parse_roundtrip() {
        let scopes = [
            MemoryScope::Global,
            MemoryScope::Session(identity()),
            MemoryScope::Goal(identity(), "g1".into()),
            MemoryScope::Task("t-42".into()),
        ];
        for scope in scopes {
            let s = scope.to_string();
            assert_eq!(MemoryScope::parse(&s), Some(scope));
        }
    }

    #[test]
    fn scope_parse_rejects_garbage() {
        assert!(MemoryScope::parse("").is_none());
        assert!(MemoryScope::parse("nonsense:x").is_none());
        assert!(MemoryScope::parse("session:onlychannel").is_none());
    }

    #[test]
    fn scope_visibility_never_crosses_sessions() {
        let a = identity();
        let b = SessionIdentity::new("web", "zzzz9999").unwrap();

        assert!(MemoryScope::Global.visible_from(&a));
        assert!(MemoryScope::Session(a.clone()).visible_from(&a));
        assert!(!MemoryScope::Session(b.clone()).visible_from(&a));
        assert!(!MemoryScope::Goal(b, "g1".into()).visible_from(&a));
    }

    #[test]
    fn fingerprint_normalizes_whitespace_and_case() {
        assert_eq!(
            fingerprint("Title", "Some   content\nhere"),
            fingerprint("title", "some content here")
        );
        assert_ne!(fingerprint("a", "b"), fingerprint("a", "c"));
    }

    #[test]
    fn new_item_is_active() {
        let item = MemoryItem::new(
            MemoryLayer::Episodic,
            MemoryType::Decision,
            "use tokio",
            "decided to use tokio for the runtime",
            MemoryScope::Session(identity()),
        );
        assert_eq!(item.status, MemoryStatus::Active);
        assert!(!item.fingerprint.is_empty());
        assert!(item.superseded_by_id.is_none());
    }

    #[test]
    fn ttl_expiry() {
        let mut item = MemoryItem::new(
            MemoryLayer::Working,
            MemoryType::TaskState,
            "step",
            "half-done",
            MemoryScope::Task("t1".into()),
        );
        item.ttl_days = Some(1);
        assert!(!item.expired(Utc::now()));
        assert!(item.expired(Utc::now() + chrono::Duration::days(2)));
    }

    #[test]
    fn durable_types() {
        assert!(MemoryType::Preference.is_durable());
        assert!(MemoryType::ProjectFact.is_durable());
        assert!(!MemoryType::CommandResult.is_durable());
        assert!(!MemoryType::TaskState.is_durable());
    }

    #[test]
    fn item_serde_roundtrip() {
        let item = MemoryItem::new(
            MemoryLayer::Semantic,
            MemoryType::Preference,
            "tone",
            "prefers short answers",
            MemoryScope::Global,
        );
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"scope\":\"global\""));
        assert!(json.contains("\"type\":\"preference\""));
        let restored: MemoryItem = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, item.id);
        assert_eq!(restored.scope, MemoryScope::Global);
        assert_eq!(restored.fingerprint, item.fingerprint);
    }
}
