//! Tool execution with timeout, confirmation, and classification.
//!
//! The executor is the only place a tool's `execute` runs. It enforces
//! the per-tool timeout, asks the confirmation port for gated tools,
//! caps result size before anything enters raw history, and classifies
//! every failure explicitly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lantern_types::message::ToolCall;
use lantern_types::tool::{ToolFailureKind, ToolResult};

use crate::events::EventBus;
use crate::ports::ConfirmationPort;
use crate::tools::{Tool, ToolRegistry};

use lantern_types::event::RuntimeEvent;

/// Maximum size in bytes for a single tool result entering history.
pub const MAX_TOOL_RESULT_BYTES: usize = 65_536;

/// Executes resolved tool calls under runtime policies.
pub struct ToolExecutor {
    confirmations: Option<Arc<dyn ConfirmationPort>>,
    timeout: Duration,
    events: EventBus,
}

impl ToolExecutor {
    /// Create an executor.
    pub fn new(
        confirmations: Option<Arc<dyn ConfirmationPort>>,
        timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            confirmations,
            timeout,
            events,
        }
    }

    /// Resolve and execute one tool call.
    ///
    /// Never panics and never blocks past the per-tool timeout. The
    /// returned result always carries a `failure_kind` on failure.
    pub async fn execute(
        &self,
        registry: &ToolRegistry,
        session_id: &str,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let tool = match registry.resolve(&call.name) {
            Ok(tool) => tool,
            Err(denied) => return denied,
        };
        let definition = tool.definition();

        if definition.requires_confirmation {
            let approved = self.confirm(&call.id, &definition.name).await;
            if !approved {
                return ToolResult::failure(
                    ToolFailureKind::ConfirmationDenied,
                    format!("confirmation denied for tool '{}'", definition.name),
                );
            }
        }

        self.events.emit(RuntimeEvent::ToolStarted {
            session_id: session_id.to_string(),
            tool: definition.name.clone(),
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResult::failure(
                ToolFailureKind::ExecutionFailed,
                format!("tool '{}' cancelled", definition.name),
            ),
            outcome = tokio::time::timeout(self.timeout, tool.execute(call.arguments.clone())) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => ToolResult::failure(
                        ToolFailureKind::ExecutionFailed,
                        format!(
                            "tool '{}' timed out after {}s",
                            definition.name,
                            self.timeout.as_secs()
                        ),
                    ),
                }
            }
        };

        let result = cap_result(result);
        self.events.emit(RuntimeEvent::ToolFinished {
            session_id: session_id.to_string(),
            tool: definition.name.clone(),
            success: result.success,
        });
        debug!(tool = %definition.name, success = result.success, "tool executed");
        result
    }

    async fn confirm(&self, call_id: &str, tool_name: &str) -> bool {
        let Some(port) = self.confirmations.as_ref() else {
            warn!(tool = tool_name, "confirmation required but no port configured");
            return false;
        };
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::seconds(60));
        match port
            .request(call_id, &format!("Execute tool '{tool_name}'?"), expires_at)
            .await
        {
            Ok(approved) => approved,
            Err(e) => {
                warn!(tool = tool_name, error = %e, "confirmation request failed, denying");
                false
            }
        }
    }
}

/// Cap an oversized tool result so a single output cannot blow the
/// context budget.
fn cap_result(mut result: ToolResult) -> ToolResult {
    let Some(output) = result.output.as_ref() else {
        return result;
    };
    let serialized = serde_json::to_string(output).unwrap_or_default();
    if serialized.len() <= MAX_TOOL_RESULT_BYTES {
        return result;
    }
    let original = serialized.len();
    let suffix = format!("... [truncated, original size: {original} bytes]");
    let keep = MAX_TOOL_RESULT_BYTES.saturating_sub(suffix.len() + 2);
    let prefix: String = serialized.chars().take(keep).collect();
    result.output = Some(serde_json::Value::String(format!("{prefix}{suffix}")));
    result
}
