//! Inbound transport messages and runtime events.
//!
//! [`InboundMessage`] is what a transport hands to the session router.
//! [`RuntimeEvent`] is the observability stream: turn lifecycle,
//! compaction, tool execution, and retry markers, broadcast to observers
//! that must never influence turn execution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TurnLimitReason;

/// A message arriving from a transport, before session resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel type (e.g. `"telegram"`, `"web"`, `"webhook"`).
    pub channel: String,

    /// Sender identifier within the channel.
    pub sender_id: String,

    /// Physical chat / delivery address on the transport.
    pub transport_chat_id: String,

    /// Message text content.
    pub content: String,

    /// When the message was received.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Arbitrary channel-specific metadata (auto-mode markers, client
    /// instance ids, voice flags).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// Build a plain inbound message.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        transport_chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            transport_chat_id: transport_chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry, returning self for chaining.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this is an auto-mode synthetic message.
    pub fn is_auto_mode(&self) -> bool {
        self.metadata
            .get("auto_mode")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Structured details emitted with `CompactionFinished`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionReport {
    /// Report schema version.
    pub schema_version: u32,

    /// Why compaction ran (e.g. `"token_budget_exceeded"`).
    pub reason: String,

    /// How many messages were folded into the summary.
    pub summarized_count: usize,

    /// How many messages were kept verbatim.
    pub kept_count: usize,

    /// Whether the LLM produced the summary.
    pub used_llm_summary: bool,

    /// Whether the cut point was shifted to keep a tool turn intact.
    pub split_turn_detected: bool,

    /// Whether the deterministic fallback summary was used.
    pub fallback_used: bool,

    /// Wall-clock duration of the compaction.
    pub duration_ms: u64,

    /// Tool names invoked in the compacted range.
    #[serde(default)]
    pub tool_names: Vec<String>,

    /// Files read in the compacted range (from tool metadata).
    #[serde(default)]
    pub read_files: Vec<String>,

    /// Files modified in the compacted range (from tool metadata).
    #[serde(default)]
    pub modified_files: Vec<String>,
}

/// Runtime events broadcast for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A turn began executing.
    TurnStarted {
        /// Session id of the turn.
        session_id: String,
    },
    /// A turn finished (response prepared, routing done).
    TurnFinished {
        /// Session id of the turn.
        session_id: String,
        /// Why the tool loop stopped.
        reason: TurnLimitReason,
    },
    /// A turn failed at the orchestrator level.
    TurnFailed {
        /// Session id of the turn.
        session_id: String,
        /// Failure description.
        message: String,
    },
    /// Compaction began for a session.
    CompactionStarted {
        /// Session id being compacted.
        session_id: String,
    },
    /// Compaction finished.
    CompactionFinished {
        /// Session id that was compacted.
        session_id: String,
        /// Structured compaction details.
        report: CompactionReport,
    },
    /// A tool execution began.
    ToolStarted {
        /// Session id of the turn.
        session_id: String,
        /// Tool being executed.
        tool: String,
    },
    /// A tool execution finished.
    ToolFinished {
        /// Session id of the turn.
        session_id: String,
        /// Tool that executed.
        tool: String,
        /// Whether it succeeded.
        success: bool,
    },
    /// An LLM call retry began.
    RetryStarted {
        /// Session id of the turn.
        session_id: String,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// The retry sequence finished.
    RetryFinished {
        /// Session id of the turn.
        session_id: String,
        /// Total attempts made.
        attempts: u32,
        /// Whether a call eventually succeeded.
        success: bool,
    },
}
