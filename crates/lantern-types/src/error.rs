//! Error types and the turn failure taxonomy.
//!
//! [`LanternError`] is the top-level error type used across the runtime.
//! [`FailureEvent`] is the *recorded* form of a failure: systems never
//! throw across pipeline boundaries, they record events and continue
//! where possible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the lantern runtime.
///
/// Variants are grouped into recoverable (timeout, rate-limit, provider)
/// and fatal (config, storage, validation) categories to guide callers on
/// whether retrying is worthwhile.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LanternError {
    // ── Recoverable ──────────────────────────────────────────────────

    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Human-readable name of the operation that timed out.
        operation: String,
    },

    /// An LLM provider returned an error.
    #[error("provider error: {message}")]
    Provider {
        /// Provider-supplied error message.
        message: String,
    },

    /// The provider is throttling requests.
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time in milliseconds before retrying.
        retry_after_ms: u64,
    },

    /// The turn was cancelled cooperatively.
    #[error("cancelled: {operation}")]
    Cancelled {
        /// The operation that observed the cancellation.
        operation: String,
    },

    // ── Fatal ────────────────────────────────────────────────────────

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// An identifier or payload failed validation.
    #[error("validation failed: {reason}")]
    Validation {
        /// What rule was violated.
        reason: String,
    },

    /// An inbound payload exceeded the configured size cap.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual payload size in bytes.
        size: usize,
        /// Configured maximum in bytes.
        max: usize,
    },

    /// A requested record does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing record.
        what: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A channel-layer error bubbled up.
    #[error("channel error: {0}")]
    Channel(String),

    /// A security boundary was violated (path traversal, control bytes, etc.)
    #[error("security violation: {reason}")]
    SecurityViolation {
        /// What policy was violated.
        reason: String,
    },
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LanternError>;

/// Where a recorded failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    /// A pipeline system body faulted.
    System,
    /// The LLM provider call failed.
    Llm,
    /// A tool execution failed.
    Tool,
    /// Transport delivery failed.
    Transport,
}

/// The kind of a recorded failure, independent of any exception type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An uncaught fault.
    Exception,
    /// A deadline or per-call timeout elapsed.
    Timeout,
    /// Input failed validation.
    Validation,
    /// A policy (tool allow-list, confirmation) denied the operation.
    Policy,
    /// The upstream service throttled the request.
    RateLimit,
    /// Anything that does not fit the other kinds.
    Unknown,
}

/// A failure recorded during a turn.
///
/// Failures are values appended to the turn context, never exceptions
/// thrown across system boundaries. The orchestrator logs them; the
/// response-preparation system may surface them to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    /// Which layer produced the failure.
    pub source: FailureSource,

    /// Component name (system name, tool name, channel name).
    pub component: String,

    /// Classified failure kind.
    pub kind: FailureKind,

    /// Human-readable description.
    pub message: String,

    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureEvent {
    /// Record a failure now.
    pub fn new(
        source: FailureSource,
        component: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            component: component.into(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Why the tool loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnLimitReason {
    /// The LLM produced a final text answer.
    Success,
    /// The per-turn LLM call budget was exhausted.
    IterationLimit,
    /// The turn deadline elapsed.
    Deadline,
    /// A tool failed and the stop-on-failure policy held.
    ToolFailure,
    /// A required confirmation was denied.
    ConfirmationDenied,
    /// A tool was denied by policy.
    PolicyDenied,
    /// The turn was cancelled by the user.
    Cancelled,
}
