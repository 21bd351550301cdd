//! Autonomous-mode state: goals, tasks, and the diary.
//!
//! Goals own an ordered list of tasks; the scheduler picks pending work
//! from active goals and synthesizes agent turns for it. Diary entries
//! are append-only, partitioned per UTC day.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Completed,
    Paused,
    Cancelled,
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// A unit of work under a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: String,

    /// Owning goal id.
    pub goal_id: String,

    /// What to do.
    pub title: String,

    /// Current status.
    pub status: TaskStatus,

    /// Execution order within the goal (lower runs first).
    pub order: u32,

    /// Result summary once the task finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// A long-lived objective the agent works toward autonomously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Unique goal id.
    pub id: String,

    /// What the goal is about.
    pub title: String,

    /// Current status.
    pub status: GoalStatus,

    /// Ordered tasks (embedded; persisted with the goal).
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last update time.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Create an active goal with no tasks.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            status: GoalStatus::Active,
            tasks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The first pending task in order, if any.
    pub fn next_pending_task(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| t.order)
    }
}

/// What kind of autonomous run a synthetic message drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunKind {
    /// The task belongs to a goal and shares the goal's memory scope.
    GoalRun,
    /// A standalone task run.
    TaskRun,
}

/// Persistent on/off switch plus notification target for auto mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoState {
    /// Whether the scheduler runs ticks.
    #[serde(default)]
    pub enabled: bool,

    /// Channel registered at enable time for milestone notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_channel: Option<String>,

    /// Transport chat id for milestone notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_chat_id: Option<String>,
}

/// One diary line, appended per autonomous run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryEntry {
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,

    /// Run id that produced the entry.
    pub run_id: String,

    /// Goal the run served, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,

    /// Task the run served, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// What happened.
    pub summary: String,
}
