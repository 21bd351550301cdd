//! Memory persistence (order 50) and RAG indexing (order 55).
//!
//! Both run after the tool loop and never block response delivery:
//! failures are logged and recorded, the pipeline continues.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use lantern_types::auto::RunKind;
use lantern_types::error::Result;
use lantern_types::memory::{MemoryItem, MemoryLayer, MemoryScope, MemoryType};
use lantern_types::message::MessageRole;

use crate::memory::MemoryStore;
use crate::pipeline::{System, order};
use crate::ports::{RagDocument, RagPort};
use crate::turn::TurnContext;

/// Confidence at which durable items are promoted to the semantic layer.
const PROMOTION_CONFIDENCE: f64 = 0.8;

/// Extracts structured memory from the completed turn.
pub struct MemoryPersist {
    memory: Arc<MemoryStore>,
}

impl MemoryPersist {
    /// Create the system.
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }

    /// Scope for this turn's writes.
    ///
    /// `GOAL_RUN` writes task-scoped state plus goal-scoped insights;
    /// `TASK_RUN` writes task plus session; interactive turns write
    /// session scope. Promotion to `global` only happens through the
    /// explicit promotion path, never here.
    fn write_scopes(ctx: &TurnContext) -> Vec<MemoryScope> {
        let identity = ctx.session.identity.clone();
        if !ctx.is_auto_mode() {
            return vec![MemoryScope::Session(identity)];
        }
        let task_id = ctx
            .incoming
            .metadata
            .get("task_id")
            .and_then(|v| v.as_str());
        let goal_id = ctx
            .incoming
            .metadata
            .get("goal_id")
            .and_then(|v| v.as_str());
        let run_kind = ctx
            .incoming
            .metadata
            .get("run_kind")
            .and_then(|v| serde_json::from_value::<RunKind>(v.clone()).ok());

        let mut scopes = Vec::new();
        if let Some(task_id) = task_id {
            scopes.push(MemoryScope::Task(task_id.to_string()));
        }
        match run_kind {
            Some(RunKind::GoalRun) => {
                if let Some(goal_id) = goal_id {
                    scopes.push(MemoryScope::Goal(identity, goal_id.to_string()));
                }
            }
            _ => scopes.push(MemoryScope::Session(identity)),
        }
        scopes
    }

    /// Classify the exchange into a memory type with a confidence.
    fn classify(user_text: &str, answer: &str) -> (MemoryType, f64) {
        let combined = format!("{user_text} {answer}").to_lowercase();
        let explicit = combined.contains("remember") || combined.contains("from now on");
        if combined.contains("prefer") || combined.contains("always use") {
            (MemoryType::Preference, if explicit { 0.9 } else { 0.7 })
        } else if combined.contains("decided") || combined.contains("decision") {
            (MemoryType::Decision, if explicit { 0.9 } else { 0.75 })
        } else if combined.contains("fixed") || combined.contains("the fix") {
            (MemoryType::Fix, 0.7)
        } else if combined.contains("must not") || combined.contains("constraint") {
            (MemoryType::Constraint, if explicit { 0.9 } else { 0.7 })
        } else {
            (MemoryType::ProjectFact, if explicit { 0.85 } else { 0.6 })
        }
    }

    fn title_of(text: &str) -> String {
        let mut title: String = text.split_whitespace().take(8).collect::<Vec<_>>().join(" ");
        if title.len() > 80 {
            title.truncate(80);
        }
        if title.is_empty() {
            title = "exchange".into();
        }
        title
    }
}

#[async_trait]
impl System for MemoryPersist {
    fn name(&self) -> &str {
        "memory_persist"
    }

    fn order(&self) -> u32 {
        order::MEMORY_PERSIST
    }

    fn should_process(&self, ctx: &TurnContext) -> bool {
        ctx.final_text.is_some()
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        let answer = ctx.final_text.clone().unwrap_or_default();
        let user_text = ctx.incoming.content.clone();
        let scopes = Self::write_scopes(ctx);
        let (item_type, confidence) = Self::classify(&user_text, &answer);

        for scope in &scopes {
            // Episodic record of the exchange.
            let mut item = MemoryItem::new(
                MemoryLayer::Episodic,
                item_type,
                Self::title_of(&user_text),
                format!("user: {user_text}\nassistant: {answer}"),
                scope.clone(),
            );
            item.confidence = confidence;
            item.source = format!("turn:{}", ctx.session_id());
            if let Err(e) = self.memory.write(item).await {
                warn!(error = %e, "episodic memory write failed");
            }

            // Promote confident durable facts to the semantic layer;
            // supersede detection runs inside the store.
            if item_type.is_durable() && confidence >= PROMOTION_CONFIDENCE {
                let mut semantic = MemoryItem::new(
                    MemoryLayer::Semantic,
                    item_type,
                    Self::title_of(&user_text),
                    answer.clone(),
                    scope.clone(),
                );
                semantic.confidence = confidence;
                semantic.source = format!("turn:{}", ctx.session_id());
                if let Err(e) = self.memory.write(semantic).await {
                    warn!(error = %e, "semantic memory write failed");
                }
            }
        }

        // Failed tools become failure records for later retrieval.
        for msg in &ctx.session.messages {
            if msg.role == MessageRole::Tool && msg.content.contains("\"failure_kind\"") {
                if let Some(scope) = scopes.first() {
                    let tool = msg.tool_name.clone().unwrap_or_default();
                    let mut item = MemoryItem::new(
                        MemoryLayer::Episodic,
                        MemoryType::Failure,
                        format!("tool failure: {tool}"),
                        msg.content.clone(),
                        scope.clone(),
                    );
                    item.confidence = 0.9;
                    item.ttl_days = Some(30);
                    if let Err(e) = self.memory.write(item).await {
                        warn!(error = %e, "failure memory write failed");
                    }
                }
            }
        }

        debug!(session = %ctx.session_id(), scopes = scopes.len(), "memory persisted");
        Ok(())
    }
}

/// Submits the exchange for external indexing, fire-and-forget.
pub struct RagIndexing {
    rag: Option<Arc<dyn RagPort>>,
}

impl RagIndexing {
    /// Create the system.
    pub fn new(rag: Option<Arc<dyn RagPort>>) -> Self {
        Self { rag }
    }
}

#[async_trait]
impl System for RagIndexing {
    fn name(&self) -> &str {
        "rag_indexing"
    }

    fn order(&self) -> u32 {
        order::RAG_INDEXING
    }

    fn is_enabled(&self) -> bool {
        self.rag.is_some()
    }

    fn should_process(&self, ctx: &TurnContext) -> bool {
        ctx.final_text.is_some()
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        let Some(rag) = self.rag.clone() else {
            return Ok(());
        };
        let doc = RagDocument {
            id: uuid::Uuid::new_v4().to_string(),
            text: format!(
                "user: {}\nassistant: {}",
                ctx.incoming.content,
                ctx.final_text.clone().unwrap_or_default()
            ),
            source: ctx.session_id(),
        };
        // Fire and forget: indexing latency never delays delivery.
        tokio::spawn(async move {
            if let Err(e) = rag.index(doc).await {
                warn!(error = %e, "rag indexing failed");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use lantern_types::config::MemoryBudgets;
    use lantern_types::event::InboundMessage;
    use lantern_types::identity::SessionIdentity;
    use lantern_types::message::Message;
    use lantern_types::session::Session;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn fixture() -> (Arc<MemoryStore>, MemoryPersist) {
        let memory = Arc::new(MemoryStore::new(
            Arc::new(MemStorage::new()),
            MemoryBudgets::default(),
        ));
        (memory.clone(), MemoryPersist::new(memory))
    }

    fn ctx(user: &str, answer: Option<&str>) -> TurnContext {
        let mut ctx = TurnContext::new(
            Session::new(SessionIdentity::new("web", "abcd1234").unwrap(), "42"),
            InboundMessage::new("web", "u1", "42", user),
            Duration::from_secs(60),
            CancellationToken::new(),
        );
        ctx.final_text = answer.map(String::from);
        ctx
    }

    #[tokio::test]
    async fn skipped_without_final_text() {
        let (_, system) = fixture();
        let ctx = ctx("hello", None);
        assert!(!system.should_process(&ctx));
    }

    #[tokio::test]
    async fn writes_episodic_exchange_to_session_scope() {
        let (memory, system) = fixture();
        let mut ctx = ctx("how does the build work?", Some("it uses cargo"));
        system.process(&mut ctx).await.unwrap();

        let identity = SessionIdentity::new("web", "abcd1234").unwrap();
        let items = memory
            .retrieve(&[MemoryScope::Session(identity)], "build", 10)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].content.contains("it uses cargo"));
        assert_eq!(items[0].layer, MemoryLayer::Episodic);
    }

    #[tokio::test]
    async fn explicit_preference_promoted_to_semantic() {
        let (memory, system) = fixture();
        let mut ctx = ctx(
            "remember that I prefer short answers",
            Some("noted, keeping answers short"),
        );
        system.process(&mut ctx).await.unwrap();

        let identity = SessionIdentity::new("web", "abcd1234").unwrap();
        let items = memory
            .retrieve(&[MemoryScope::Session(identity)], "short answers", 10)
            .await
            .unwrap();
        assert!(
            items.iter().any(|i| i.layer == MemoryLayer::Semantic
                && i.item_type == MemoryType::Preference),
            "expected a promoted semantic preference, got {items:?}"
        );
    }

    #[tokio::test]
    async fn goal_run_writes_task_and_goal_scopes() {
        let (memory, system) = fixture();
        let mut ctx = ctx("work the task", Some("made progress"));
        ctx.incoming = InboundMessage::new("auto", "scheduler", "auto", "work the task")
            .with_metadata("auto_mode", serde_json::json!(true))
            .with_metadata("goal_id", serde_json::json!("g1"))
            .with_metadata("task_id", serde_json::json!("t1"))
            .with_metadata("run_kind", serde_json::json!("GOAL_RUN"));
        system.process(&mut ctx).await.unwrap();

        let identity = SessionIdentity::new("web", "abcd1234").unwrap();
        let task_items = memory
            .retrieve(&[MemoryScope::Task("t1".into())], "", 10)
            .await
            .unwrap();
        assert_eq!(task_items.len(), 1);
        let goal_items = memory
            .retrieve(&[MemoryScope::Goal(identity, "g1".into())], "", 10)
            .await
            .unwrap();
        assert_eq!(goal_items.len(), 1);
        // Nothing written globally.
        let global = memory.retrieve(&[MemoryScope::Global], "", 10).await.unwrap();
        assert!(global.is_empty());
    }

    #[tokio::test]
    async fn failed_tool_recorded_as_failure_item() {
        let (memory, system) = fixture();
        let mut ctx = ctx("run the thing", Some("the tool failed"));
        ctx.session.push_message(Message::tool_result(
            "tc1",
            "shell",
            r#"{"error":"disk offline","failure_kind":"execution_failed"}"#,
        ));
        system.process(&mut ctx).await.unwrap();

        let identity = SessionIdentity::new("web", "abcd1234").unwrap();
        let items = memory
            .retrieve(&[MemoryScope::Session(identity)], "tool failure", 10)
            .await
            .unwrap();
        assert!(
            items.iter().any(|i| i.item_type == MemoryType::Failure),
            "expected a failure record"
        );
    }

    #[tokio::test]
    async fn rag_indexing_submits_document() {
        struct RecordingRag {
            docs: StdMutex<Vec<String>>,
        }
        #[async_trait]
        impl RagPort for RecordingRag {
            async fn query(
                &self,
                _text: &str,
                _mode: &str,
            ) -> lantern_types::error::Result<Option<String>> {
                Ok(None)
            }
            async fn index(&self, doc: RagDocument) -> lantern_types::error::Result<()> {
                self.docs.lock().unwrap().push(doc.text);
                Ok(())
            }
        }

        let rag = Arc::new(RecordingRag {
            docs: StdMutex::new(Vec::new()),
        });
        let system = RagIndexing::new(Some(rag.clone()));
        let mut ctx = ctx("question", Some("answer"));
        system.process(&mut ctx).await.unwrap();

        // The spawn is fire-and-forget; give it a beat.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let docs = rag.docs.lock().unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].contains("question"));
        assert!(docs[0].contains("answer"));
    }

    #[test]
    fn rag_indexing_disabled_without_port() {
        let system = RagIndexing::new(None);
        assert!(!system.is_enabled());
    }
}
