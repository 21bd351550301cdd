//! Plan-mode records.
//!
//! In plan mode, tool calls the model proposes are collected into a
//! [`Plan`] instead of executing. The user approves or cancels the plan;
//! approved plans execute sequentially with stop-on-failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::ToolCall;

/// Lifecycle of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// The model is still proposing steps.
    Collecting,
    /// Finalized and awaiting user approval.
    Ready,
    /// Approved by the user; execution may start.
    Approved,
    /// Steps are executing.
    Executing,
    /// All steps executed successfully.
    Completed,
    /// Execution stopped early; some steps ran.
    PartiallyCompleted,
    /// Discarded by the user.
    Cancelled,
}

/// Execution state of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

/// One proposed tool call inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Position in the plan (0-based).
    pub index: usize,

    /// The proposed tool call.
    pub call: ToolCall,

    /// Execution state.
    pub status: PlanStepStatus,

    /// Result or error once executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// A collected plan for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan id.
    pub id: String,

    /// Session the plan belongs to (`"{channel}:{key}"`).
    pub session_id: String,

    /// Free-text plan description set by the model, if any.
    #[serde(default)]
    pub content: String,

    /// Ordered proposed steps.
    #[serde(default)]
    pub steps: Vec<PlanStep>,

    /// Lifecycle status.
    pub status: PlanStatus,

    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last update time.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Start collecting a new plan for a session.
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            content: String::new(),
            steps: Vec::new(),
            status: PlanStatus::Collecting,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a proposed tool call as the next step.
    pub fn push_step(&mut self, call: ToolCall) -> usize {
        let index = self.steps.len();
        self.steps.push(PlanStep {
            index,
            call,
            status: PlanStepStatus::Pending,
            result: None,
        });
        self.updated_at = Utc::now();
        index
    }
}
