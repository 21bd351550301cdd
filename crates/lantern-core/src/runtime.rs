//! Runtime assembly.
//!
//! Explicit constructor wiring for the whole engine: stores, systems,
//! pipeline, orchestrator, and scheduler. No ambient statics; the
//! builder owns every dependency decision and the resulting [`Runtime`]
//! has an explicit shutdown lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lantern_channels::ChannelRegistry;
use lantern_llm::{LlmPort, LlmRouter, RetryConfig, RouterConfig};
use lantern_types::config::RuntimeConfig;
use lantern_types::error::Result;
use lantern_types::routing::ModelTier;

use crate::auto::{AutoStateStore, DiaryStore, GoalStore};
use crate::compactor::Compactor;
use crate::events::EventBus;
use crate::memory::MemoryStore;
use crate::orchestrator::TurnOrchestrator;
use crate::pipeline::compaction::AutoCompaction;
use crate::pipeline::context::ContextBuilding;
use crate::pipeline::deliver::ResponseRouting;
use crate::pipeline::execute::ToolLoopExecution;
use crate::pipeline::persist::{MemoryPersist, RagIndexing};
use crate::pipeline::prepare::{FeedbackGuarantee, OutgoingResponsePreparation};
use crate::pipeline::sanitize::InputSanitization;
use crate::pipeline::skill::{DynamicTier, SkillRouting};
use crate::pipeline::{Pipeline, System};
use crate::plan::PlanStore;
use crate::pointers::ActivePointerRegistry;
use crate::ports::{ConfirmationPort, RagPort, VoicePort};
use crate::routing::ResponseRouter;
use crate::scheduler::Scheduler;
use crate::session_router::SessionRouter;
use crate::sessions::SessionStore;
use crate::storage::Storage;
use crate::tool_loop::{ToolLoop, ToolLoopPolicy};
use crate::tools::ToolRegistry;
use crate::tools::executor::ToolExecutor;

/// Builder for a fully wired [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    storage: Arc<dyn Storage>,
    llm: Arc<dyn LlmPort>,
    router_config: RouterConfig,
    channels: Arc<ChannelRegistry>,
    tools: Arc<ToolRegistry>,
    confirmations: Option<Arc<dyn ConfirmationPort>>,
    rag: Option<Arc<dyn RagPort>>,
    voice: Option<Arc<dyn VoicePort>>,
}

impl RuntimeBuilder {
    /// Start a builder with the required dependencies.
    pub fn new(config: RuntimeConfig, storage: Arc<dyn Storage>, llm: Arc<dyn LlmPort>) -> Self {
        Self {
            config,
            storage,
            llm,
            router_config: RouterConfig::default(),
            channels: Arc::new(ChannelRegistry::new()),
            tools: Arc::new(ToolRegistry::new()),
            confirmations: None,
            rag: None,
            voice: None,
        }
    }

    /// Use a specific tier routing table.
    pub fn router_config(mut self, router_config: RouterConfig) -> Self {
        self.router_config = router_config;
        self
    }

    /// Use a pre-populated channel registry.
    pub fn channels(mut self, channels: Arc<ChannelRegistry>) -> Self {
        self.channels = channels;
        self
    }

    /// Use a pre-populated tool registry.
    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Attach a confirmation port.
    pub fn confirmations(mut self, port: Arc<dyn ConfirmationPort>) -> Self {
        self.confirmations = Some(port);
        self
    }

    /// Attach a RAG port.
    pub fn rag(mut self, port: Arc<dyn RagPort>) -> Self {
        self.rag = Some(port);
        self
    }

    /// Attach a voice port.
    pub fn voice(mut self, port: Arc<dyn VoicePort>) -> Self {
        self.voice = Some(port);
        self
    }

    /// Wire everything into a runnable [`Runtime`].
    pub fn build(self) -> Result<Runtime> {
        let shutdown = CancellationToken::new();
        let events = EventBus::default();

        let sessions = Arc::new(SessionStore::new(self.storage.clone()));
        let pointers = Arc::new(ActivePointerRegistry::new(self.storage.clone()));
        let memory = Arc::new(MemoryStore::new(
            self.storage.clone(),
            self.config.memory.clone(),
        ));
        let plans = Arc::new(PlanStore::new(self.storage.clone()));
        let auto_state = Arc::new(AutoStateStore::new(self.storage.clone()));
        let goals = Arc::new(GoalStore::new(self.storage.clone()));
        let diary = Arc::new(DiaryStore::new(self.storage.clone()));

        let llm_router = LlmRouter::new(self.router_config);
        let summary_model = llm_router.resolve(ModelTier::Balanced, None, None).model;
        let compactor = Arc::new(Compactor::new(
            self.config.compaction.clone(),
            sessions.clone(),
            Some(self.llm.clone()),
            summary_model,
        ));

        let executor = Arc::new(ToolExecutor::new(
            self.confirmations.clone(),
            Duration::from_secs(self.config.budgets.tool_timeout_secs),
            events.clone(),
        ));
        let tool_loop = Arc::new(ToolLoop::new(
            self.llm.clone(),
            llm_router,
            self.tools.clone(),
            executor,
            plans.clone(),
            events.clone(),
            self.config.budgets.clone(),
            RetryConfig::default(),
            ToolLoopPolicy::default(),
        ));

        let response_router = Arc::new(ResponseRouter::new(self.channels.clone(), self.voice));

        let systems: Vec<Arc<dyn System>> = vec![
            Arc::new(InputSanitization::new()),
            Arc::new(SkillRouting),
            Arc::new(AutoCompaction::new(compactor, events.clone())),
            Arc::new(ContextBuilding::new(
                self.config.prompt_sections.clone(),
                memory.clone(),
                self.tools.clone(),
                self.rag.clone(),
                goals.clone(),
                diary.clone(),
            )),
            Arc::new(DynamicTier::new()),
            Arc::new(ToolLoopExecution::new(tool_loop)),
            Arc::new(MemoryPersist::new(memory.clone())),
            Arc::new(RagIndexing::new(self.rag)),
            Arc::new(OutgoingResponsePreparation),
            Arc::new(FeedbackGuarantee),
            Arc::new(ResponseRouting::new(response_router)),
        ];
        let pipeline = Arc::new(Pipeline::new(systems)?);

        let session_router = SessionRouter::new(pointers.clone(), sessions.clone());
        let orchestrator = TurnOrchestrator::new(
            session_router,
            sessions.clone(),
            pipeline,
            events.clone(),
            self.config.budgets.clone(),
            shutdown.clone(),
        );

        let scheduler = Arc::new(Scheduler::new(
            auto_state.clone(),
            goals.clone(),
            diary,
            orchestrator.clone(),
            self.channels.clone(),
            self.config.scheduler.clone(),
        ));

        Ok(Runtime {
            orchestrator,
            scheduler,
            events,
            sessions,
            pointers,
            memory,
            plans,
            auto_state,
            goals,
            shutdown,
        })
    }
}

/// A fully wired engine.
pub struct Runtime {
    /// Entry point for inbound messages.
    pub orchestrator: TurnOrchestrator,
    /// Autonomous tick loop; run with [`Scheduler::run`].
    pub scheduler: Arc<Scheduler>,
    /// Runtime event stream.
    pub events: EventBus,
    /// Session persistence.
    pub sessions: Arc<SessionStore>,
    /// Active pointer registry.
    pub pointers: Arc<ActivePointerRegistry>,
    /// Structured memory.
    pub memory: Arc<MemoryStore>,
    /// Plan store.
    pub plans: Arc<PlanStore>,
    /// Auto-mode switch.
    pub auto_state: Arc<AutoStateStore>,
    /// Goal store.
    pub goals: Arc<GoalStore>,
    /// Root cancellation token.
    pub shutdown: CancellationToken,
}

impl Runtime {
    /// Cancel all in-flight work and stop accepting new messages.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
