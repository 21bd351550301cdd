//! Tool contracts: definitions and results.
//!
//! The [`ToolDefinition`] is the JSON-Schema-shaped contract advertised
//! to the LLM; [`ToolResult`] is the classified outcome of an execution.
//! Failure classification is explicit in the result, never inferred from
//! error strings.

use serde::{Deserialize, Serialize};

/// Why a tool call did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// The user (or a confirmation timeout) denied the call.
    ConfirmationDenied,
    /// The registry or policy layer refused the call.
    PolicyDenied,
    /// The tool ran and failed (exception, timeout, bad output).
    ExecutionFailed,
}

/// Outcome of a single tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the execution succeeded.
    pub success: bool,

    /// Tool output on success (JSON value; often a string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error description on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Failure classification, present on every failed result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<ToolFailureKind>,
}

impl ToolResult {
    /// A successful result with the given output.
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            failure_kind: None,
        }
    }

    /// A failed result with an explicit classification.
    pub fn failure(kind: ToolFailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            failure_kind: Some(kind),
        }
    }

    /// Render this result as tool-message content for the raw history.
    pub fn to_content(&self) -> String {
        if self.success {
            match &self.output {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(v) => serde_json::to_string(v).unwrap_or_default(),
                None => String::new(),
            }
        } else {
            serde_json::json!({
                "error": self.error.clone().unwrap_or_default(),
                "failure_kind": self.failure_kind,
            })
            .to_string()
        }
    }
}

/// The contract a tool advertises to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique within the registry).
    pub name: String,

    /// Human/model-readable description.
    pub description: String,

    /// JSON-Schema object describing the accepted arguments.
    pub parameters: serde_json::Value,

    /// Whether executing this tool requires explicit user confirmation.
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl ToolDefinition {
    /// Convenience constructor for a tool with no confirmation requirement.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            requires_confirmation: false,
        }
    }
}
