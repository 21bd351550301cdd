//! Plan-mode store and execution.
//!
//! Plans are persisted one JSON file per plan under `plans/`. The tool
//! loop appends proposed steps while a session is in plan mode; the
//! user approves or cancels; approved plans execute sequentially with
//! stop-on-failure. While a plan is collecting, no tool `execute` runs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use lantern_types::error::{LanternError, Result};
use lantern_types::message::ToolCall;
use lantern_types::plan::{Plan, PlanStatus, PlanStepStatus};

use crate::storage::Storage;
use crate::tools::ToolRegistry;
use crate::tools::executor::ToolExecutor;

const PLANS_DIR: &str = "plans";

/// Session metadata key that switches a session into plan mode.
pub const PLAN_MODE_KEY: &str = "plan_mode";

/// Content of the synthetic tool result returned while collecting.
pub const PLANNED_MARKER: &str = "[Planned]";

/// Tool name whose call finalizes a collecting plan explicitly.
pub const PLAN_SET_CONTENT_TOOL: &str = "plan_set_content";

/// Persists and executes plans. Writes are serialized per plan id.
pub struct PlanStore {
    storage: Arc<dyn Storage>,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PlanStore {
    /// Create a store over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn write_lock(&self, plan_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(plan_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist a plan atomically.
    pub async fn save(&self, plan: &Plan) -> Result<()> {
        let lock = self.write_lock(&plan.id).await;
        let _guard = lock.lock().await;
        let content = serde_json::to_string_pretty(plan)?;
        self.storage
            .put_text(PLANS_DIR, &format!("{}.json", plan.id), &content)
            .await
    }

    /// Load a plan by id.
    pub async fn load(&self, plan_id: &str) -> Result<Option<Plan>> {
        match self
            .storage
            .get_text(PLANS_DIR, &format!("{plan_id}.json"))
            .await?
        {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    /// The in-flight plan for a session, if any (collecting, ready,
    /// approved, or executing).
    pub async fn active_for_session(&self, session_id: &str) -> Result<Option<Plan>> {
        for key in self.storage.list(PLANS_DIR, "").await? {
            let Some(content) = self
                .storage
                .get_text(PLANS_DIR, &key)
                .await?
            else {
                continue;
            };
            let Ok(plan) = serde_json::from_str::<Plan>(&content) else {
                continue;
            };
            if plan.session_id == session_id
                && matches!(
                    plan.status,
                    PlanStatus::Collecting
                        | PlanStatus::Ready
                        | PlanStatus::Approved
                        | PlanStatus::Executing
                )
            {
                return Ok(Some(plan));
            }
        }
        Ok(None)
    }

    /// Get the collecting plan for a session, creating one if needed.
    pub async fn collecting_for_session(&self, session_id: &str) -> Result<Plan> {
        if let Some(plan) = self.active_for_session(session_id).await? {
            if plan.status == PlanStatus::Collecting {
                return Ok(plan);
            }
        }
        let plan = Plan::new(session_id);
        self.save(&plan).await?;
        debug!(plan = %plan.id, session = session_id, "started collecting plan");
        Ok(plan)
    }

    /// Append a proposed tool call to a collecting plan.
    pub async fn push_step(&self, plan_id: &str, call: ToolCall) -> Result<Plan> {
        let mut plan = self.require(plan_id).await?;
        if plan.status != PlanStatus::Collecting {
            return Err(LanternError::Validation {
                reason: format!("plan {plan_id} is not collecting"),
            });
        }
        plan.push_step(call);
        self.save(&plan).await?;
        Ok(plan)
    }

    /// Finalize a collecting plan: `Collecting → Ready`.
    pub async fn finalize(&self, plan_id: &str, content: Option<String>) -> Result<Plan> {
        let mut plan = self.require(plan_id).await?;
        if plan.status != PlanStatus::Collecting {
            return Ok(plan);
        }
        if let Some(content) = content {
            plan.content = content;
        }
        plan.status = PlanStatus::Ready;
        plan.updated_at = Utc::now();
        self.save(&plan).await?;
        info!(plan = %plan.id, steps = plan.steps.len(), "plan ready for approval");
        Ok(plan)
    }

    /// User approval: `Ready → Approved`.
    pub async fn approve(&self, plan_id: &str) -> Result<Plan> {
        let mut plan = self.require(plan_id).await?;
        if plan.status != PlanStatus::Ready {
            return Err(LanternError::Validation {
                reason: format!("plan {plan_id} is not ready for approval"),
            });
        }
        plan.status = PlanStatus::Approved;
        plan.updated_at = Utc::now();
        self.save(&plan).await?;
        Ok(plan)
    }

    /// User cancellation from any non-terminal state.
    pub async fn cancel(&self, plan_id: &str) -> Result<Plan> {
        let mut plan = self.require(plan_id).await?;
        if matches!(
            plan.status,
            PlanStatus::Completed | PlanStatus::PartiallyCompleted | PlanStatus::Cancelled
        ) {
            return Ok(plan);
        }
        plan.status = PlanStatus::Cancelled;
        plan.updated_at = Utc::now();
        self.save(&plan).await?;
        Ok(plan)
    }

    /// Execute an approved plan sequentially with stop-on-failure.
    ///
    /// Each step's outcome is persisted as it lands. A failed step marks
    /// the remaining steps `Skipped` and the plan `PartiallyCompleted`.
    pub async fn execute(
        &self,
        plan_id: &str,
        registry: &ToolRegistry,
        executor: &ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<Plan> {
        let mut plan = self.require(plan_id).await?;
        if plan.status != PlanStatus::Approved {
            return Err(LanternError::Validation {
                reason: format!("plan {plan_id} is not approved"),
            });
        }
        plan.status = PlanStatus::Executing;
        plan.updated_at = Utc::now();
        self.save(&plan).await?;

        let session_id = plan.session_id.clone();
        let mut failed = false;
        for index in 0..plan.steps.len() {
            if failed || cancel.is_cancelled() {
                plan.steps[index].status = PlanStepStatus::Skipped;
                continue;
            }
            let call = plan.steps[index].call.clone();
            let result = executor.execute(registry, &session_id, &call, cancel).await;
            if result.success {
                plan.steps[index].status = PlanStepStatus::Completed;
                plan.steps[index].result = Some(result.to_content());
            } else {
                plan.steps[index].status = PlanStepStatus::Failed;
                plan.steps[index].result = result.error.clone();
                failed = true;
            }
            plan.updated_at = Utc::now();
            self.save(&plan).await?;
        }

        plan.status = if failed || cancel.is_cancelled() {
            PlanStatus::PartiallyCompleted
        } else {
            PlanStatus::Completed
        };
        plan.updated_at = Utc::now();
        self.save(&plan).await?;
        info!(plan = %plan.id, status = ?plan.status, "plan execution finished");
        Ok(plan)
    }

    async fn require(&self, plan_id: &str) -> Result<Plan> {
        self.load(plan_id).await?.ok_or_else(|| LanternError::NotFound {
            what: format!("plan {plan_id}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::storage::MemStorage;
    use crate::tools::Tool;
    use crate::tools::test_tools::EchoTool;
    use async_trait::async_trait;
    use lantern_types::tool::{ToolDefinition, ToolFailureKind, ToolResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn store() -> PlanStore {
        PlanStore::new(Arc::new(MemStorage::new()))
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: format!("tc-{name}"),
            name: name.into(),
            arguments: serde_json::json!({"text": name}),
        }
    }

    fn executor() -> ToolExecutor {
        ToolExecutor::new(None, Duration::from_secs(5), EventBus::default())
    }

    /// Tool that counts executions; used to prove collecting plans never
    /// run tools.
    struct CountingTool(Arc<AtomicUsize>);

    #[async_trait]
    impl Tool for CountingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(
                "counting",
                "Counts executions",
                serde_json::json!({"type": "object", "properties": {}}),
            )
        }
        async fn execute(&self, _arguments: serde_json::Value) -> ToolResult {
            self.0.fetch_add(1, Ordering::Relaxed);
            ToolResult::success(serde_json::json!("ran"))
        }
    }

    /// Tool that always fails.
    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(
                "fails",
                "Always fails",
                serde_json::json!({"type": "object", "properties": {}}),
            )
        }
        async fn execute(&self, _arguments: serde_json::Value) -> ToolResult {
            ToolResult::failure(ToolFailureKind::ExecutionFailed, "boom")
        }
    }

    #[tokio::test]
    async fn collecting_accrues_steps_without_executing() {
        let store = store();
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::new();
        registry.register(Arc::new(CountingTool(counter.clone())));

        let plan = store.collecting_for_session("web:abcd1234").await.unwrap();
        store.push_step(&plan.id, call("counting")).await.unwrap();
        store.push_step(&plan.id, call("counting")).await.unwrap();

        let loaded = store.load(&plan.id).await.unwrap().unwrap();
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.status, PlanStatus::Collecting);
        // No tool executed while collecting.
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn collecting_for_session_reuses_open_plan() {
        let store = store();
        let first = store.collecting_for_session("web:abcd1234").await.unwrap();
        let second = store.collecting_for_session("web:abcd1234").await.unwrap();
        assert_eq!(first.id, second.id);

        // A different session gets its own plan.
        let other = store.collecting_for_session("web:zzzz9999").await.unwrap();
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn lifecycle_collecting_ready_approved() {
        let store = store();
        let plan = store.collecting_for_session("web:abcd1234").await.unwrap();
        store.push_step(&plan.id, call("echo")).await.unwrap();

        let ready = store
            .finalize(&plan.id, Some("list then read".into()))
            .await
            .unwrap();
        assert_eq!(ready.status, PlanStatus::Ready);
        assert_eq!(ready.content, "list then read");

        // Steps can no longer be appended.
        assert!(store.push_step(&plan.id, call("echo")).await.is_err());

        let approved = store.approve(&plan.id).await.unwrap();
        assert_eq!(approved.status, PlanStatus::Approved);
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let store = store();
        let plan = store.collecting_for_session("web:abcd1234").await.unwrap();
        store.finalize(&plan.id, None).await.unwrap();
        let again = store.finalize(&plan.id, None).await.unwrap();
        assert_eq!(again.status, PlanStatus::Ready);
    }

    #[tokio::test]
    async fn approve_requires_ready() {
        let store = store();
        let plan = store.collecting_for_session("web:abcd1234").await.unwrap();
        assert!(store.approve(&plan.id).await.is_err());
    }

    #[tokio::test]
    async fn execute_runs_steps_sequentially() {
        let store = store();
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let plan = store.collecting_for_session("web:abcd1234").await.unwrap();
        store.push_step(&plan.id, call("echo")).await.unwrap();
        store.push_step(&plan.id, call("echo")).await.unwrap();
        store.finalize(&plan.id, None).await.unwrap();
        store.approve(&plan.id).await.unwrap();

        let done = store
            .execute(&plan.id, &registry, &executor(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.status, PlanStatus::Completed);
        assert!(done
            .steps
            .iter()
            .all(|s| s.status == PlanStepStatus::Completed));
    }

    #[tokio::test]
    async fn step_failure_stops_and_skips_rest() {
        let store = store();
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailTool));

        let plan = store.collecting_for_session("web:abcd1234").await.unwrap();
        store.push_step(&plan.id, call("echo")).await.unwrap();
        store.push_step(&plan.id, call("fails")).await.unwrap();
        store.push_step(&plan.id, call("echo")).await.unwrap();
        store.finalize(&plan.id, None).await.unwrap();
        store.approve(&plan.id).await.unwrap();

        let done = store
            .execute(&plan.id, &registry, &executor(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.status, PlanStatus::PartiallyCompleted);
        assert_eq!(done.steps[0].status, PlanStepStatus::Completed);
        assert_eq!(done.steps[1].status, PlanStepStatus::Failed);
        assert_eq!(done.steps[2].status, PlanStepStatus::Skipped);
    }

    #[tokio::test]
    async fn cancel_from_ready() {
        let store = store();
        let plan = store.collecting_for_session("web:abcd1234").await.unwrap();
        store.finalize(&plan.id, None).await.unwrap();
        let cancelled = store.cancel(&plan.id).await.unwrap();
        assert_eq!(cancelled.status, PlanStatus::Cancelled);
        // No longer the session's active plan.
        assert!(store
            .active_for_session("web:abcd1234")
            .await
            .unwrap()
            .is_none());
    }
}
