//! Context building (order 20).
//!
//! Assembles the system prompt, resolves the model tier from user
//! preference, retrieves and packs scoped memory, optionally queries
//! the RAG port (blocking, ahead of the LLM call), exposes the tool
//! catalogue, and injects goal/task/diary context for auto-mode turns.
//!
//! Memory is *read* here, strictly before the memory-persist system
//! writes, so a turn never retrieves from itself.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use lantern_types::auto::RunKind;
use lantern_types::error::Result;
use lantern_types::memory::MemoryScope;
use lantern_types::routing::ModelTier;

use crate::auto::{DiaryStore, GoalStore};
use crate::memory::MemoryStore;
use crate::pipeline::{System, order};
use crate::ports::RagPort;
use crate::tools::ToolRegistry;
use crate::turn::TurnContext;

/// Retrieval limit before packing.
const RETRIEVE_LIMIT: usize = 25;

/// Diary entries injected for auto turns.
const DIARY_TAIL: usize = 5;

/// Builds the per-turn prompt context.
pub struct ContextBuilding {
    prompt_sections: Vec<String>,
    memory: Arc<MemoryStore>,
    registry: Arc<ToolRegistry>,
    rag: Option<Arc<dyn RagPort>>,
    goals: Arc<GoalStore>,
    diary: Arc<DiaryStore>,
}

impl ContextBuilding {
    /// Create the system.
    pub fn new(
        prompt_sections: Vec<String>,
        memory: Arc<MemoryStore>,
        registry: Arc<ToolRegistry>,
        rag: Option<Arc<dyn RagPort>>,
        goals: Arc<GoalStore>,
        diary: Arc<DiaryStore>,
    ) -> Self {
        Self {
            prompt_sections,
            memory,
            registry,
            rag,
            goals,
            diary,
        }
    }

    /// Memory scope precedence for this turn.
    ///
    /// `GOAL_RUN`: task → goal → session → global.
    /// `TASK_RUN`: task → session → global.
    /// Interactive turns: session → global.
    fn scope_chain(ctx: &TurnContext) -> Vec<MemoryScope> {
        let identity = ctx.session.identity.clone();
        let mut chain = Vec::new();
        if ctx.is_auto_mode() {
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

            if let Some(task_id) = task_id {
                chain.push(MemoryScope::Task(task_id.to_string()));
            }
            if run_kind == Some(RunKind::GoalRun) {
                if let Some(goal_id) = goal_id {
                    chain.push(MemoryScope::Goal(identity.clone(), goal_id.to_string()));
                }
            }
        }
        chain.push(MemoryScope::Session(identity));
        chain.push(MemoryScope::Global);
        chain
    }

    async fn auto_context(&self, ctx: &TurnContext) -> Option<String> {
        if !ctx.is_auto_mode() {
            return None;
        }
        let goal_id = ctx
            .incoming
            .metadata
            .get("goal_id")
            .and_then(|v| v.as_str())?;

        let mut sections = Vec::new();
        match self.goals.load().await {
            Ok(goals) => {
                if let Some(goal) = goals.iter().find(|g| g.id == goal_id) {
                    let mut lines = vec![format!("## Current goal\n{}", goal.title)];
                    for task in &goal.tasks {
                        lines.push(format!(
                            "- [{}] {}",
                            serde_json::to_value(task.status)
                                .ok()
                                .and_then(|v| v.as_str().map(String::from))
                                .unwrap_or_default(),
                            task.title
                        ));
                    }
                    sections.push(lines.join("\n"));
                }
            }
            Err(e) => warn!(error = %e, "failed to load goals for auto context"),
        }
        match self.diary.recent(DIARY_TAIL).await {
            Ok(entries) if !entries.is_empty() => {
                let mut lines = vec!["## Recent diary".to_string()];
                for entry in entries {
                    lines.push(format!("- {}", entry.summary));
                }
                sections.push(lines.join("\n"));
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to load diary for auto context"),
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }
}

#[async_trait]
impl System for ContextBuilding {
    fn name(&self) -> &str {
        "context_building"
    }

    fn order(&self) -> u32 {
        order::CONTEXT_BUILDING
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        // System prompt from configured sections.
        ctx.system_prompt = self.prompt_sections.join("\n\n");

        // Tier: user preference from session metadata, default balanced.
        if let Some(tier) = ctx
            .session
            .metadata
            .get("tier")
            .and_then(|v| v.as_str())
            .and_then(ModelTier::parse)
        {
            ctx.model_tier = tier;
        }
        ctx.tier_locked = ctx
            .session
            .metadata
            .get("tier_locked")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        // Scoped memory pack.
        let chain = Self::scope_chain(ctx);
        match self
            .memory
            .retrieve(&chain, &ctx.incoming.content, RETRIEVE_LIMIT)
            .await
        {
            Ok(items) => ctx.memory_pack = self.memory.pack(&items),
            Err(e) => warn!(error = %e, "memory retrieval failed, continuing without pack"),
        }

        // Blocking RAG query ahead of the LLM call.
        if let Some(rag) = &self.rag {
            match rag.query(&ctx.incoming.content, "conversation").await {
                Ok(Some(context)) if !context.is_empty() => {
                    ctx.rag_context = Some(format!("## Long-term context\n{context}"));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "rag query failed, continuing without context"),
            }
        }

        // Auto-mode goal/task/diary injection.
        ctx.auto_context = self.auto_context(ctx).await;

        // Tool catalogue for the loop.
        ctx.available_tools = self.registry.definitions();

        debug!(
            session = %ctx.session_id(),
            tier = ?ctx.model_tier,
            tools = ctx.available_tools.len(),
            memory = ctx.memory_pack.is_some(),
            "context built"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::RagDocument;
    use crate::storage::MemStorage;
    use crate::tools::test_tools::EchoTool;
    use lantern_types::auto::{Goal, Task, TaskStatus};
    use lantern_types::config::MemoryBudgets;
    use lantern_types::event::InboundMessage;
    use lantern_types::identity::SessionIdentity;
    use lantern_types::memory::{MemoryItem, MemoryLayer, MemoryType};
    use lantern_types::session::Session;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        system: ContextBuilding,
        memory: Arc<MemoryStore>,
        goals: Arc<GoalStore>,
    }

    fn fixture(rag: Option<Arc<dyn RagPort>>) -> Fixture {
        let storage: Arc<MemStorage> = Arc::new(MemStorage::new());
        let memory = Arc::new(MemoryStore::new(storage.clone(), MemoryBudgets::default()));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(EchoTool));
        let goals = Arc::new(GoalStore::new(storage.clone()));
        let diary = Arc::new(DiaryStore::new(storage));
        Fixture {
            system: ContextBuilding::new(
                vec!["You are lantern.".into(), "Be concise.".into()],
                memory.clone(),
                registry,
                rag,
                goals.clone(),
                diary,
            ),
            memory,
            goals,
        }
    }

    fn ctx() -> TurnContext {
        TurnContext::new(
            Session::new(SessionIdentity::new("web", "abcd1234").unwrap(), "42"),
            InboundMessage::new("web", "u1", "42", "tell me about the build"),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    fn auto_ctx(run_kind: &str) -> TurnContext {
        let mut ctx = ctx();
        ctx.incoming = InboundMessage::new("auto", "scheduler", "auto", "work on the task")
            .with_metadata("auto_mode", serde_json::json!(true))
            .with_metadata("goal_id", serde_json::json!("g1"))
            .with_metadata("task_id", serde_json::json!("t1"))
            .with_metadata("run_kind", serde_json::json!(run_kind));
        ctx
    }

    #[tokio::test]
    async fn prompt_sections_concatenated() {
        let f = fixture(None);
        let mut ctx = ctx();
        f.system.process(&mut ctx).await.unwrap();
        assert_eq!(ctx.system_prompt, "You are lantern.\n\nBe concise.");
    }

    #[tokio::test]
    async fn tier_from_session_preference() {
        let f = fixture(None);
        let mut ctx = ctx();
        ctx.session
            .metadata
            .insert("tier".into(), serde_json::json!("deep"));
        ctx.session
            .metadata
            .insert("tier_locked".into(), serde_json::json!(true));
        f.system.process(&mut ctx).await.unwrap();
        assert_eq!(ctx.model_tier, ModelTier::Deep);
        assert!(ctx.tier_locked);
    }

    #[tokio::test]
    async fn memory_pack_built_from_session_scope() {
        let f = fixture(None);
        let identity = SessionIdentity::new("web", "abcd1234").unwrap();
        f.memory
            .write(MemoryItem::new(
                MemoryLayer::Episodic,
                MemoryType::ProjectFact,
                "build system",
                "the build uses cargo workspaces",
                MemoryScope::Session(identity),
            ))
            .await
            .unwrap();

        let mut ctx = ctx();
        f.system.process(&mut ctx).await.unwrap();
        let pack = ctx.memory_pack.unwrap();
        assert!(pack.contains("build system"));
    }

    #[tokio::test]
    async fn goal_run_scope_chain() {
        let ctx = auto_ctx("GOAL_RUN");
        let chain = ContextBuilding::scope_chain(&ctx);
        let rendered: Vec<String> = chain.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "task:t1",
                "goal:web:abcd1234:g1",
                "session:web:abcd1234",
                "global"
            ]
        );
    }

    #[tokio::test]
    async fn task_run_scope_chain_skips_goal() {
        let ctx = auto_ctx("TASK_RUN");
        let chain = ContextBuilding::scope_chain(&ctx);
        let rendered: Vec<String> = chain.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["task:t1", "session:web:abcd1234", "global"]
        );
    }

    #[tokio::test]
    async fn interactive_scope_chain() {
        let chain = ContextBuilding::scope_chain(&ctx());
        let rendered: Vec<String> = chain.iter().map(|s| s.to_string()).collect();
        assert_eq!(rendered, vec!["session:web:abcd1234", "global"]);
    }

    #[tokio::test]
    async fn auto_context_injects_goal_and_tasks() {
        let f = fixture(None);
        let mut goal = Goal::new("research rust runtimes");
        goal.id = "g1".into();
        goal.tasks.push(Task {
            id: "t1".into(),
            goal_id: "g1".into(),
            title: "survey async executors".into(),
            status: TaskStatus::Pending,
            order: 0,
            result: None,
        });
        f.goals.add_goal(goal).await.unwrap();

        let mut ctx = auto_ctx("GOAL_RUN");
        f.system.process(&mut ctx).await.unwrap();
        let auto = ctx.auto_context.unwrap();
        assert!(auto.contains("research rust runtimes"));
        assert!(auto.contains("survey async executors"));
    }

    #[tokio::test]
    async fn interactive_turn_has_no_auto_context() {
        let f = fixture(None);
        let mut ctx = ctx();
        f.system.process(&mut ctx).await.unwrap();
        assert!(ctx.auto_context.is_none());
    }

    #[tokio::test]
    async fn rag_context_injected_when_port_answers() {
        struct StubRag;
        #[async_trait]
        impl RagPort for StubRag {
            async fn query(
                &self,
                _text: &str,
                _mode: &str,
            ) -> lantern_types::error::Result<Option<String>> {
                Ok(Some("older related discussion".into()))
            }
            async fn index(&self, _doc: RagDocument) -> lantern_types::error::Result<()> {
                Ok(())
            }
        }

        let f = fixture(Some(Arc::new(StubRag)));
        let mut ctx = ctx();
        f.system.process(&mut ctx).await.unwrap();
        assert!(ctx.rag_context.unwrap().contains("older related discussion"));
    }

    #[tokio::test]
    async fn tool_catalogue_exposed() {
        let f = fixture(None);
        let mut ctx = ctx();
        f.system.process(&mut ctx).await.unwrap();
        assert_eq!(ctx.available_tools.len(), 1);
        assert_eq!(ctx.available_tools[0].name, "echo");
    }
}
