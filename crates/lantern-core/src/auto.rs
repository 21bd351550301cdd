//! Autonomous-mode persistence.
//!
//! Three small stores under `auto/`: the enable switch
//! (`auto/state.json`), goals with embedded tasks (`auto/goals.json`),
//! and the append-only diary partitioned per UTC day
//! (`auto/diary/YYYY-MM-DD.jsonl`).

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use lantern_types::auto::{AutoState, DiaryEntry, Goal, GoalStatus, Task, TaskStatus};
use lantern_types::error::{LanternError, Result};

use crate::storage::Storage;

const AUTO_DIR: &str = "auto";
const DIARY_DIR: &str = "auto/diary";
const STATE_FILE: &str = "state.json";
const GOALS_FILE: &str = "goals.json";

/// Persistence for the auto-mode switch and notification target.
pub struct AutoStateStore {
    storage: Arc<dyn Storage>,
    write_lock: Mutex<()>,
}

impl AutoStateStore {
    /// Create a store over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the current state; missing file means disabled.
    pub async fn load(&self) -> Result<AutoState> {
        match self.storage.get_text(AUTO_DIR, STATE_FILE).await? {
            Some(content) => Ok(serde_json::from_str(&content).unwrap_or_default()),
            None => Ok(AutoState::default()),
        }
    }

    /// Persist the state atomically.
    pub async fn save(&self, state: &AutoState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let content = serde_json::to_string_pretty(state)?;
        self.storage.put_text(AUTO_DIR, STATE_FILE, &content).await
    }

    /// Enable auto mode with a milestone notification target.
    pub async fn enable(&self, notify_channel: &str, notify_chat_id: &str) -> Result<()> {
        self.save(&AutoState {
            enabled: true,
            notify_channel: Some(notify_channel.to_string()),
            notify_chat_id: Some(notify_chat_id.to_string()),
        })
        .await
    }

    /// Disable auto mode, keeping the notification target.
    pub async fn disable(&self) -> Result<()> {
        let mut state = self.load().await?;
        state.enabled = false;
        self.save(&state).await
    }
}

/// Persistence for goals and their embedded tasks.
pub struct GoalStore {
    storage: Arc<dyn Storage>,
    write_lock: Mutex<()>,
}

impl GoalStore {
    /// Create a store over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Load all goals; a missing file is an empty list.
    pub async fn load(&self) -> Result<Vec<Goal>> {
        match self.storage.get_text(AUTO_DIR, GOALS_FILE).await? {
            Some(content) => match serde_json::from_str(&content) {
                Ok(goals) => Ok(goals),
                Err(e) => {
                    warn!(error = %e, "goals file malformed, starting empty");
                    Ok(Vec::new())
                }
            },
            None => Ok(Vec::new()),
        }
    }

    /// Persist the whole goal list atomically.
    pub async fn save(&self, goals: &[Goal]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let content = serde_json::to_string_pretty(goals)?;
        self.storage.put_text(AUTO_DIR, GOALS_FILE, &content).await
    }

    /// Append a goal.
    pub async fn add_goal(&self, goal: Goal) -> Result<()> {
        let mut goals = self.load().await?;
        goals.push(goal);
        self.save(&goals).await
    }

    /// Update one task's status and result.
    pub async fn update_task(
        &self,
        goal_id: &str,
        task_id: &str,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<()> {
        let mut goals = self.load().await?;
        let goal = goals
            .iter_mut()
            .find(|g| g.id == goal_id)
            .ok_or_else(|| LanternError::NotFound {
                what: format!("goal {goal_id}"),
            })?;
        let task = goal
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| LanternError::NotFound {
                what: format!("task {task_id}"),
            })?;
        task.status = status;
        if result.is_some() {
            task.result = result;
        }
        goal.updated_at = Utc::now();
        // A goal with all tasks completed is completed itself.
        if !goal.tasks.is_empty()
            && goal
                .tasks
                .iter()
                .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
        {
            goal.status = GoalStatus::Completed;
        }
        self.save(&goals).await
    }

    /// Pick the next unit of autonomous work.
    ///
    /// The first `Pending` task across active goals, oldest goal first,
    /// then lowest task order. When no pending task exists but some
    /// active goal has no tasks at all, that goal is returned for
    /// planning.
    pub async fn pick_work(&self) -> Result<Option<AutoWork>> {
        let mut goals = self.load().await?;
        goals.retain(|g| g.status == GoalStatus::Active);
        goals.sort_by_key(|g| g.created_at);

        for goal in &goals {
            if let Some(task) = goal.next_pending_task() {
                return Ok(Some(AutoWork::Task {
                    goal: goal.clone(),
                    task: task.clone(),
                }));
            }
        }
        for goal in goals {
            if goal.tasks.is_empty() {
                return Ok(Some(AutoWork::PlanGoal { goal }));
            }
        }
        Ok(None)
    }
}

/// One unit of work picked by the scheduler.
#[derive(Debug, Clone)]
pub enum AutoWork {
    /// Execute a pending task.
    Task {
        /// The goal owning the task.
        goal: Goal,
        /// The task to run.
        task: Task,
    },
    /// Ask the model to plan tasks for a task-less goal.
    PlanGoal {
        /// The goal needing a task breakdown.
        goal: Goal,
    },
}

/// Append-only diary, one file per UTC day.
pub struct DiaryStore {
    storage: Arc<dyn Storage>,
    write_lock: Mutex<()>,
}

impl DiaryStore {
    /// Create a store over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an entry to today's diary file.
    pub async fn append(&self, entry: &DiaryEntry) -> Result<()> {
        let key = format!("{}.jsonl", entry.timestamp.format("%Y-%m-%d"));
        let line = serde_json::to_string(entry)?;
        let _guard = self.write_lock.lock().await;
        self.storage.append_line(DIARY_DIR, &key, &line).await
    }

    /// Load all entries for one UTC day (`YYYY-MM-DD`).
    pub async fn for_day(&self, day: &str) -> Result<Vec<DiaryEntry>> {
        let content = self
            .storage
            .get_text(DIARY_DIR, &format!("{day}.jsonl"))
            .await?;
        let Some(content) = content else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "skipping malformed diary line"),
            }
        }
        Ok(entries)
    }

    /// Recent entries for today, newest last, capped at `limit`.
    pub async fn recent(&self, limit: usize) -> Result<Vec<DiaryEntry>> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut entries = self.for_day(&today).await?;
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }
}
