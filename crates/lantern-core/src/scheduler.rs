//! Autonomous scheduler.
//!
//! A daemon loop that periodically turns goal/task state into synthetic
//! agent turns. Each tick picks at most one unit of work, dispatches it
//! through the normal orchestrator path, and watches it with an
//! independent watchdog: an overrunning turn is logged and left to
//! finish, never cancelled by the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lantern_channels::ChannelRegistry;
use lantern_types::auto::{Goal, RunKind, Task, TaskStatus};
use lantern_types::config::SchedulerConfig;
use lantern_types::error::Result;
use lantern_types::event::InboundMessage;

use crate::auto::{AutoStateStore, AutoWork, DiaryStore, GoalStore};
use crate::orchestrator::TurnOrchestrator;

use lantern_types::auto::DiaryEntry;

/// What one tick did, for observability and tests.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Unique run id attached to the synthetic message.
    pub run_id: String,
    /// Goal the run served.
    pub goal_id: Option<String>,
    /// Task the run served, when task work was picked.
    pub task_id: Option<String>,
    /// Kind of run dispatched.
    pub run_kind: RunKind,
    /// Milestone notifications sent after the run.
    pub milestones: Vec<String>,
    /// Whether the run finished within the tick watchdog.
    pub finished_in_time: bool,
}

/// The autonomous tick loop.
pub struct Scheduler {
    state: Arc<AutoStateStore>,
    goals: Arc<GoalStore>,
    diary: Arc<DiaryStore>,
    orchestrator: TurnOrchestrator,
    channels: Arc<ChannelRegistry>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(
        state: Arc<AutoStateStore>,
        goals: Arc<GoalStore>,
        diary: Arc<DiaryStore>,
        orchestrator: TurnOrchestrator,
        channels: Arc<ChannelRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            state,
            goals,
            diary,
            orchestrator,
            channels,
            config,
        }
    }

    /// Run the tick loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = Duration::from_secs(self.config.tick_interval_secs);
        info!(interval_secs = period.as_secs(), "scheduler started");
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; skip it so autonomous work
        // starts one full interval after boot.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
    }

    /// Execute one tick. Public for embedding and tests.
    pub async fn tick(&self) -> Result<Option<TickReport>> {
        let state = self.state.load().await?;
        if !state.enabled {
            return Ok(None);
        }
        let Some(work) = self.goals.pick_work().await? else {
            debug!("no autonomous work pending");
            return Ok(None);
        };

        let run_id = Uuid::new_v4().to_string();
        let (msg, goal_id, task_id, run_kind) = match &work {
            AutoWork::Task { goal, task } => {
                self.goals
                    .update_task(&goal.id, &task.id, TaskStatus::InProgress, None)
                    .await?;
                let run_kind = if task.goal_id.is_empty() {
                    RunKind::TaskRun
                } else {
                    RunKind::GoalRun
                };
                (
                    self.synthetic_message(goal, Some(task), run_kind, &run_id),
                    Some(goal.id.clone()),
                    Some(task.id.clone()),
                    run_kind,
                )
            }
            AutoWork::PlanGoal { goal } => (
                self.synthetic_message(goal, None, RunKind::GoalRun, &run_id),
                Some(goal.id.clone()),
                None,
                RunKind::GoalRun,
            ),
        };

        // Snapshot statuses so completions by goal-management tools can
        // be detected after the run.
        let before = self.status_snapshot().await?;

        info!(run_id, ?run_kind, goal = ?goal_id, task = ?task_id, "dispatching autonomous run");
        let rx = self.orchestrator.submit(msg).await?;
        let watchdog = Duration::from_secs(self.config.tick_watchdog_secs);
        let finished_in_time = match tokio::time::timeout(watchdog, rx).await {
            Ok(outcome) => {
                debug!(run_id, ?outcome, "autonomous run finished");
                true
            }
            Err(_) => {
                // The run keeps going; only this tick stops watching.
                warn!(run_id, "autonomous run exceeded tick watchdog, proceeding");
                false
            }
        };

        let mut milestones = Vec::new();
        if finished_in_time {
            milestones = self.detect_milestones(&before).await?;
            for text in &milestones {
                self.notify(&state.notify_channel, &state.notify_chat_id, text)
                    .await;
            }
            self.diary
                .append(&DiaryEntry {
                    timestamp: Utc::now(),
                    run_id: run_id.clone(),
                    goal_id: goal_id.clone(),
                    task_id: task_id.clone(),
                    summary: match &work {
                        AutoWork::Task { task, .. } => format!("worked task '{}'", task.title),
                        AutoWork::PlanGoal { goal } => {
                            format!("planned tasks for goal '{}'", goal.title)
                        }
                    },
                })
                .await?;
        }

        Ok(Some(TickReport {
            run_id,
            goal_id,
            task_id,
            run_kind,
            milestones,
            finished_in_time,
        }))
    }

    fn synthetic_message(
        &self,
        goal: &Goal,
        task: Option<&Task>,
        run_kind: RunKind,
        run_id: &str,
    ) -> InboundMessage {
        let content = match task {
            Some(task) => format!(
                "Work on the task: {}\nThis task belongs to the goal: {}",
                task.title, goal.title
            ),
            None => format!(
                "The goal '{}' has no tasks yet. Break it down into concrete, \
                 ordered tasks using the goal management tools.",
                goal.title
            ),
        };
        let mut msg = InboundMessage::new("auto", "scheduler", &goal.id, content)
            .with_metadata("auto_mode", serde_json::json!(true))
            .with_metadata("run_kind", serde_json::json!(run_kind))
            .with_metadata("run_id", serde_json::json!(run_id))
            .with_metadata("goal_id", serde_json::json!(goal.id));
        if let Some(task) = task {
            msg = msg.with_metadata("task_id", serde_json::json!(task.id));
        }
        msg
    }

    async fn status_snapshot(&self) -> Result<Vec<(String, String, bool)>> {
        let goals = self.goals.load().await?;
        let mut snapshot = Vec::new();
        for goal in goals {
            let done = goal.status == lantern_types::auto::GoalStatus::Completed;
            snapshot.push((goal.id.clone(), goal.title.clone(), done));
            for task in goal.tasks {
                snapshot.push((
                    task.id.clone(),
                    task.title.clone(),
                    task.status == TaskStatus::Completed,
                ));
            }
        }
        Ok(snapshot)
    }

    async fn detect_milestones(
        &self,
        before: &[(String, String, bool)],
    ) -> Result<Vec<String>> {
        let after = self.status_snapshot().await?;
        let mut milestones = Vec::new();
        for (id, title, done) in &after {
            if !done {
                continue;
            }
            let was_done = before
                .iter()
                .find(|(bid, _, _)| bid == id)
                .map(|(_, _, was)| *was)
                .unwrap_or(false);
            if !was_done {
                milestones.push(format!("Milestone reached: '{title}' completed"));
            }
        }
        Ok(milestones)
    }

    async fn notify(&self, channel: &Option<String>, chat_id: &Option<String>, text: &str) {
        let (Some(channel), Some(chat_id)) = (channel, chat_id) else {
            return;
        };
        match self.channels.get(channel) {
            Ok(port) => {
                if let Err(e) = port.send_message(chat_id, text).await {
                    warn!(channel, error = %e, "milestone notification failed");
                }
            }
            Err(e) => warn!(channel, error = %e, "milestone channel missing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::pipeline::{Pipeline, System};
    use crate::pointers::ActivePointerRegistry;
    use crate::session_router::SessionRouter;
    use crate::sessions::SessionStore;
    use crate::storage::MemStorage;
    use crate::turn::TurnContext;
    use async_trait::async_trait;
    use lantern_channels::{ChannelError, ChannelPort};
    use lantern_types::config::TurnBudgets;
    use lantern_types::response::RoutingOutcome;
    use std::sync::Mutex as StdMutex;

    /// Captures the synthetic messages reaching the pipeline and can
    /// complete a task the way goal-management tools would.
    struct Capture {
        seen: Arc<StdMutex<Vec<InboundMessage>>>,
        goals: Arc<GoalStore>,
        complete: Option<(String, String)>,
    }

    #[async_trait]
    impl System for Capture {
        fn name(&self) -> &str {
            "capture"
        }
        fn order(&self) -> u32 {
            10
        }
        async fn process(&self, ctx: &mut TurnContext) -> lantern_types::error::Result<()> {
            self.seen.lock().unwrap().push(ctx.incoming.clone());
            if let Some((goal_id, task_id)) = &self.complete {
                self.goals
                    .update_task(goal_id, task_id, TaskStatus::Completed, Some("done".into()))
                    .await?;
            }
            ctx.routing_outcome = Some(RoutingOutcome::default());
            ctx.stop_reason = Some(lantern_types::error::TurnLimitReason::Success);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        sent: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ChannelPort for RecordingChannel {
        fn name(&self) -> &str {
            "telegram"
        }
        fn is_authorized(&self, _sender_id: &str) -> bool {
            true
        }
        async fn send_message(
            &self,
            _chat: &str,
            text: &str,
        ) -> std::result::Result<(), ChannelError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Fixture {
        scheduler: Scheduler,
        state: Arc<AutoStateStore>,
        goals: Arc<GoalStore>,
        seen: Arc<StdMutex<Vec<InboundMessage>>>,
        channel: Arc<RecordingChannel>,
    }

    fn fixture(complete: Option<(String, String)>) -> Fixture {
        let storage: Arc<MemStorage> = Arc::new(MemStorage::new());
        let sessions = Arc::new(SessionStore::new(storage.clone()));
        let pointers = Arc::new(ActivePointerRegistry::new(storage.clone()));
        let router = SessionRouter::new(pointers, sessions.clone());

        let state = Arc::new(AutoStateStore::new(storage.clone()));
        let goals = Arc::new(GoalStore::new(storage.clone()));
        let diary = Arc::new(DiaryStore::new(storage));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let pipeline = Arc::new(
            Pipeline::new(vec![Arc::new(Capture {
                seen: seen.clone(),
                goals: goals.clone(),
                complete,
            }) as Arc<dyn System>])
            .unwrap(),
        );

        let orchestrator = TurnOrchestrator::new(
            router,
            sessions,
            pipeline,
            EventBus::default(),
            TurnBudgets::default(),
            CancellationToken::new(),
        );

        let channel = Arc::new(RecordingChannel::default());
        let channels = Arc::new(ChannelRegistry::new());
        channels.register(channel.clone());

        Fixture {
            scheduler: Scheduler::new(
                state.clone(),
                goals.clone(),
                diary,
                orchestrator,
                channels,
                SchedulerConfig {
                    tick_interval_secs: 900,
                    tick_watchdog_secs: 5,
                },
            ),
            state,
            goals,
            seen,
            channel,
        }
    }

    fn goal_with_task() -> (Goal, String, String) {
        let mut goal = Goal::new("Search papers");
        let task = Task {
            id: "t1".into(),
            goal_id: goal.id.clone(),
            title: "Search papers".into(),
            status: TaskStatus::Pending,
            order: 0,
            result: None,
        };
        goal.tasks.push(task);
        let goal_id = goal.id.clone();
        (goal, goal_id, "t1".into())
    }

    #[tokio::test]
    async fn disabled_auto_mode_is_a_noop() {
        let f = fixture(None);
        let (goal, _, _) = goal_with_task();
        f.goals.add_goal(goal).await.unwrap();

        assert!(f.scheduler.tick().await.unwrap().is_none());
        assert!(f.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_to_do_is_a_noop() {
        let f = fixture(None);
        f.state.enable("telegram", "42").await.unwrap();
        assert!(f.scheduler.tick().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tick_dispatches_goal_run_with_metadata() {
        let f = fixture(None);
        f.state.enable("telegram", "42").await.unwrap();
        let (goal, goal_id, task_id) = goal_with_task();
        f.goals.add_goal(goal).await.unwrap();

        let report = f.scheduler.tick().await.unwrap().unwrap();
        assert_eq!(report.run_kind, RunKind::GoalRun);
        assert_eq!(report.goal_id.as_deref(), Some(goal_id.as_str()));
        assert_eq!(report.task_id.as_deref(), Some(task_id.as_str()));
        assert!(report.finished_in_time);

        let seen = f.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let msg = &seen[0];
        assert!(msg.is_auto_mode());
        assert_eq!(msg.metadata["goal_id"], serde_json::json!(goal_id));
        assert_eq!(msg.metadata["task_id"], serde_json::json!("t1"));
        assert_eq!(msg.metadata["run_kind"], serde_json::json!("GOAL_RUN"));
        assert!(msg.metadata.contains_key("run_id"));
        assert!(msg.content.contains("Search papers"));

        // The task was claimed before dispatch.
        let goals = f.goals.load().await.unwrap();
        assert_eq!(goals[0].tasks[0].status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn taskless_goal_gets_planning_run() {
        let f = fixture(None);
        f.state.enable("telegram", "42").await.unwrap();
        f.goals.add_goal(Goal::new("empty goal")).await.unwrap();

        let report = f.scheduler.tick().await.unwrap().unwrap();
        assert!(report.task_id.is_none());

        let seen = f.seen.lock().unwrap();
        assert!(seen[0].content.contains("has no tasks yet"));
        assert!(!seen[0].metadata.contains_key("task_id"));
    }

    #[tokio::test]
    async fn completion_during_run_triggers_milestone() {
        let (goal, goal_id, task_id) = goal_with_task();
        let f = fixture(Some((goal_id.clone(), task_id)));
        f.state.enable("telegram", "42").await.unwrap();
        f.goals.add_goal(goal).await.unwrap();

        let report = f.scheduler.tick().await.unwrap().unwrap();
        assert!(
            !report.milestones.is_empty(),
            "expected milestone notifications, got none"
        );

        let sent = f.channel.sent.lock().unwrap();
        assert!(
            sent.iter().any(|m| m.contains("Milestone reached")),
            "notification not sent: {sent:?}"
        );
    }

    #[tokio::test]
    async fn run_ids_are_unique_per_tick() {
        let f = fixture(None);
        f.state.enable("telegram", "42").await.unwrap();
        let (goal, goal_id, _) = goal_with_task();
        f.goals.add_goal(goal).await.unwrap();

        let first = f.scheduler.tick().await.unwrap().unwrap();
        // Re-arm the task for a second tick.
        f.goals
            .update_task(&goal_id, "t1", TaskStatus::Pending, None)
            .await
            .unwrap();
        let second = f.scheduler.tick().await.unwrap().unwrap();
        assert_ne!(first.run_id, second.run_id);
    }
}
