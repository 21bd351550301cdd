//! History compaction.
//!
//! When a session's token estimate exceeds the context budget, the
//! compactor replaces an older prefix of the history with exactly one
//! system-role summary message. The summary comes from the LLM when
//! possible and from a deterministic fallback otherwise. Compaction
//! never reorders messages and keeps tool turns intact across the cut.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use lantern_llm::LlmPort;
use lantern_llm::types::{ChatRequest, ViewMessage};
use lantern_types::config::CompactionConfig;
use lantern_types::error::Result;
use lantern_types::event::CompactionReport;
use lantern_types::message::{Message, MessageRole};
use lantern_types::session::Session;

use crate::sessions::SessionStore;

/// Marker opening every compaction summary message.
pub const SUMMARY_MARKER: &str = "[Conversation summary]";

/// Compacts session histories under a token budget.
pub struct Compactor {
    config: CompactionConfig,
    sessions: Arc<SessionStore>,
    /// Summarization model; deterministic fallback when absent or failing.
    llm: Option<Arc<dyn LlmPort>>,
    summary_model: String,
}

impl Compactor {
    /// Create a compactor.
    pub fn new(
        config: CompactionConfig,
        sessions: Arc<SessionStore>,
        llm: Option<Arc<dyn LlmPort>>,
        summary_model: impl Into<String>,
    ) -> Self {
        Self {
            config,
            sessions,
            llm,
            summary_model: summary_model.into(),
        }
    }

    /// Estimate the token footprint of a message list.
    ///
    /// `chars / chars_per_token + system_prompt_overhead`, plus the
    /// largest tool result counted once more: one oversized result is
    /// what usually breaks a provider limit.
    pub fn estimate_tokens(&self, messages: &[Message]) -> usize {
        let chars: usize = messages.iter().map(|m| m.content.len()).sum();
        let largest_tool = messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| m.content.len())
            .max()
            .unwrap_or(0);
        let estimated = (chars + largest_tool) as f64 / self.config.chars_per_token;
        estimated.ceil() as usize + self.config.system_prompt_overhead
    }

    /// Whether the session currently exceeds the budget.
    pub fn needs_compaction(&self, session: &Session) -> bool {
        self.estimate_tokens(&session.messages) > self.config.max_context_tokens
    }

    /// Compact the session in place and persist it.
    ///
    /// Returns `None` when the session is already under budget (the
    /// operation is idempotent) or too short to compact.
    pub async fn compact(&self, session: &mut Session) -> Result<Option<CompactionReport>> {
        let started = std::time::Instant::now();
        if !self.needs_compaction(session) {
            return Ok(None);
        }

        let keep = self.config.keep_last_messages;
        if session.messages.len() <= keep {
            return Ok(None);
        }
        let mut cut = session.messages.len() - keep;

        // Keep tool turns intact: never split an assistant message from
        // its tool results across the cut.
        let mut split_turn_detected = false;
        while cut > 0 {
            let first_kept_is_tool = session
                .messages
                .get(cut)
                .map(|m| m.role == MessageRole::Tool)
                .unwrap_or(false);
            let last_compacted_has_calls = session.messages[cut - 1].has_tool_calls();
            if first_kept_is_tool || last_compacted_has_calls {
                cut -= 1;
                split_turn_detected = true;
            } else {
                break;
            }
        }
        if cut == 0 {
            return Ok(None);
        }

        let compacted = &session.messages[..cut];
        let mut tool_names: Vec<String> = Vec::new();
        let mut read_files: Vec<String> = Vec::new();
        let mut modified_files: Vec<String> = Vec::new();
        for msg in compacted {
            if let Some(name) = msg.tool_name.as_deref() {
                if !tool_names.iter().any(|n| n == name) {
                    tool_names.push(name.to_string());
                }
            }
            for (key, bucket) in [
                ("read_files", &mut read_files),
                ("modified_files", &mut modified_files),
            ] {
                if let Some(files) = msg.metadata.get(key).and_then(|v| v.as_array()) {
                    for file in files.iter().filter_map(|v| v.as_str()) {
                        if !bucket.iter().any(|f| f == file) {
                            bucket.push(file.to_string());
                        }
                    }
                }
            }
        }

        let (summary, used_llm) = match self.summarize_with_llm(compacted).await {
            Some(text) => (text, true),
            None => (
                fallback_summary(compacted, &tool_names, &read_files, &modified_files),
                false,
            ),
        };

        let mut summary_msg = Message::system(format!("{SUMMARY_MARKER}\n{summary}"));
        summary_msg
            .metadata
            .insert("compaction".into(), serde_json::json!(true));

        let summarized_count = cut;
        let kept: Vec<Message> = session.messages.split_off(cut);
        session.messages.clear();
        session.messages.push(summary_msg);
        session.messages.extend(kept);
        session.updated_at = Utc::now();

        self.sessions.save(session).await?;

        let report = CompactionReport {
            schema_version: 1,
            reason: "token_budget_exceeded".into(),
            summarized_count,
            kept_count: session.messages.len() - 1,
            used_llm_summary: used_llm,
            split_turn_detected,
            fallback_used: !used_llm,
            duration_ms: started.elapsed().as_millis() as u64,
            tool_names,
            read_files,
            modified_files,
        };
        info!(
            session = %session.identity,
            summarized = report.summarized_count,
            kept = report.kept_count,
            fallback = report.fallback_used,
            "compacted session history"
        );
        Ok(Some(report))
    }

    async fn summarize_with_llm(&self, messages: &[Message]) -> Option<String> {
        let llm = self.llm.as_ref()?;
        let transcript: String = messages
            .iter()
            .map(|m| {
                format!(
                    "{}: {}\n",
                    match m.role {
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                        MessageRole::System => "system",
                        MessageRole::Tool => "tool",
                    },
                    m.content
                )
            })
            .collect();

        let mut request = ChatRequest::new(
            &self.summary_model,
            vec![ViewMessage::new("user", transcript)],
        );
        request.system = Some(
            "Summarize the following conversation excerpt in a compact paragraph. \
             Preserve decisions, open questions, file names, and tool outcomes."
                .to_string(),
        );
        match llm.chat(&request).await {
            Ok(response) => {
                let text = response.text();
                if text.trim().is_empty() { None } else { Some(text) }
            }
            Err(e) => {
                warn!(error = %e, "summary model failed, using fallback summary");
                None
            }
        }
    }
}

/// Deterministic summary used when no LLM summary is available.
fn fallback_summary(
    messages: &[Message],
    tool_names: &[String],
    read_files: &[String],
    modified_files: &[String],
) -> String {
    let user_count = messages.iter().filter(|m| m.role == MessageRole::User).count();
    let assistant_count = messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .count();
    let tool_count = messages.iter().filter(|m| m.role == MessageRole::Tool).count();

    let mut lines = vec![format!(
        "Earlier conversation compacted: {user_count} user, {assistant_count} assistant, \
         {tool_count} tool messages."
    )];
    if !tool_names.is_empty() {
        lines.push(format!("Tools invoked: {}.", tool_names.join(", ")));
    }
    if !read_files.is_empty() {
        lines.push(format!("Files read: {}.", read_files.join(", ")));
    }
    if !modified_files.is_empty() {
        lines.push(format!("Files modified: {}.", modified_files.join(", ")));
    }
    lines.join("\n")
}
