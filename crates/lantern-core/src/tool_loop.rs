//! The bounded LLM ↔ tool iteration.
//!
//! One loop run drives a turn from the incoming user message to a final
//! assistant answer (or a documented stop): call the model, execute any
//! requested tools, append results to raw history, repeat. Budgets,
//! deadline, and cancellation are checked before every blocking step.
//!
//! The critical invariant lives here: whenever the loop stops while the
//! last assistant message still has unanswered tool calls, synthetic
//! tool results are appended first. History is never persisted with a
//! dangling tool-call state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use lantern_llm::retry::{RetryConfig, compute_delay, is_retryable};
use lantern_llm::types::{ChatRequest, ChatResponse};
use lantern_llm::{LlmPort, LlmRouter, ProviderError};
use lantern_types::config::TurnBudgets;
use lantern_types::error::{FailureKind, FailureSource, TurnLimitReason};
use lantern_types::event::RuntimeEvent;
use lantern_types::message::{Message, ToolCall};
use lantern_types::plan::PlanStatus;
use lantern_types::tool::{ToolFailureKind, ToolResult};

use crate::events::EventBus;
use crate::plan::{PLAN_MODE_KEY, PLAN_SET_CONTENT_TOOL, PLANNED_MARKER, PlanStore};
use crate::tools::ToolRegistry;
use crate::tools::executor::ToolExecutor;
use crate::turn::TurnContext;
use crate::view::{FlattenReason, build_view};

/// Stop-on-failure policy for a turn.
#[derive(Debug, Clone, Copy)]
pub struct ToolLoopPolicy {
    /// Stop after a policy or confirmation denial (default true).
    pub stop_on_failure: bool,
    /// Stop after any tool failure, including execution errors.
    pub stop_on_any_failure: bool,
}

impl Default for ToolLoopPolicy {
    fn default() -> Self {
        Self {
            stop_on_failure: true,
            stop_on_any_failure: false,
        }
    }
}

/// The inner LLM/tool iteration.
pub struct ToolLoop {
    llm: Arc<dyn LlmPort>,
    router: LlmRouter,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    plans: Arc<PlanStore>,
    events: EventBus,
    budgets: TurnBudgets,
    retry: RetryConfig,
    policy: ToolLoopPolicy,
}

impl ToolLoop {
    /// Create a loop with all dependencies wired.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmPort>,
        router: LlmRouter,
        registry: Arc<ToolRegistry>,
        executor: Arc<ToolExecutor>,
        plans: Arc<PlanStore>,
        events: EventBus,
        budgets: TurnBudgets,
        retry: RetryConfig,
        policy: ToolLoopPolicy,
    ) -> Self {
        Self {
            llm,
            router,
            registry,
            executor,
            plans,
            events,
            budgets,
            retry,
            policy,
        }
    }

    /// Run the loop for one turn.
    ///
    /// Appends to `ctx.session.messages` and sets `ctx.final_text`,
    /// `ctx.stop_reason`, and failure events. Never returns with the
    /// last assistant message dangling.
    pub async fn run(&self, ctx: &mut TurnContext) {
        let user_override = ctx
            .session
            .metadata
            .get("llm.model_override")
            .and_then(|v| v.as_str())
            .map(String::from);
        let choice = self.router.resolve(
            ctx.model_tier,
            None,
            user_override.as_deref(),
        );
        ctx.reasoning_effort = choice.reasoning_effort;

        // Provider-safety: flatten the request view when the model
        // changed between turns or the provider rejects tool messages.
        let flatten_reason = if !self.llm.supports_tool_messages() {
            Some(FlattenReason::ProviderUnsupported)
        } else {
            match ctx.session.last_model() {
                Some(last) if last != choice.model => Some(FlattenReason::ModelChanged),
                _ => None,
            }
        };

        let plan_mode = ctx
            .session
            .metadata
            .get(PLAN_MODE_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        loop {
            if ctx.cancel.is_cancelled() {
                ctx.stop_reason = Some(TurnLimitReason::Cancelled);
                return;
            }
            if ctx.deadline_exceeded() {
                ctx.stop_reason = Some(TurnLimitReason::Deadline);
                return;
            }
            if ctx.llm_calls >= self.budgets.max_llm_calls {
                ctx.stop_reason = Some(TurnLimitReason::IterationLimit);
                return;
            }

            let view = build_view(&ctx.session.messages, flatten_reason);
            if view.diagnostics.flattened {
                ctx.attributes.insert(
                    "view.diagnostics".into(),
                    serde_json::to_value(&view.diagnostics).unwrap_or_default(),
                );
            }

            let mut request = ChatRequest::new(&choice.model, view.messages);
            request.system = ctx.composed_system_prompt();
            request.tools = ctx.available_tools.clone();
            request.reasoning_effort = Some(choice.reasoning_effort);

            let response = match self.call_with_retry(ctx, &request).await {
                Ok(response) => response,
                Err(stop) => {
                    ctx.stop_reason = stop;
                    return;
                }
            };
            ctx.llm_calls += 1;
            ctx.session.set_last_model(&choice.model);

            let tool_calls = response.tool_calls();
            let text = response.text();

            if tool_calls.is_empty() {
                // Plan finalization: a tool-call-free response while a
                // plan is collecting means the model is done proposing.
                if plan_mode {
                    if let Ok(Some(plan)) =
                        self.plans.active_for_session(&ctx.session_id()).await
                    {
                        if plan.status == PlanStatus::Collecting {
                            let _ = self.plans.finalize(&plan.id, None).await;
                        }
                    }
                }
                ctx.session.push_message(Message::assistant(&text));
                ctx.final_text = Some(text);
                ctx.stop_reason = Some(TurnLimitReason::Success);
                debug!(llm_calls = ctx.llm_calls, "tool loop finished with final answer");
                return;
            }

            ctx.session
                .push_message(Message::assistant_with_tool_calls(&text, tool_calls.clone()));

            if plan_mode {
                self.collect_plan_steps(ctx, &tool_calls).await;
                continue;
            }

            // Out of LLM budget: results could never reach the model, so
            // close the calls synthetically instead of executing.
            if ctx.llm_calls >= self.budgets.max_llm_calls {
                self.append_synthetic_results(
                    ctx,
                    &tool_calls,
                    ToolFailureKind::ExecutionFailed,
                    "not executed: turn iteration limit reached",
                );
                ctx.stop_reason = Some(TurnLimitReason::IterationLimit);
                return;
            }

            if let Some(reason) = self.execute_tool_calls(ctx, &tool_calls).await {
                ctx.stop_reason = Some(reason);
                return;
            }
        }
    }

    /// Execute the calls of one assistant message.
    ///
    /// Returns a stop reason when the loop must halt; in that case every
    /// call has already received a result (real or synthetic).
    async fn execute_tool_calls(
        &self,
        ctx: &mut TurnContext,
        calls: &[ToolCall],
    ) -> Option<TurnLimitReason> {
        let session_id = ctx.session_id();
        let mut stop: Option<TurnLimitReason> = None;

        for call in calls {
            if let Some(reason) = stop {
                // A previous call decided to halt: remaining calls are
                // skipped with the matching failure kind.
                let kind = synthetic_kind(reason);
                self.append_synthetic_results(
                    ctx,
                    std::slice::from_ref(call),
                    kind,
                    "skipped: a previous tool call stopped the turn",
                );
                continue;
            }

            if ctx.cancel.is_cancelled() {
                stop = Some(TurnLimitReason::Cancelled);
                self.append_synthetic_results(
                    ctx,
                    std::slice::from_ref(call),
                    ToolFailureKind::ExecutionFailed,
                    "not executed: turn cancelled",
                );
                continue;
            }
            if ctx.deadline_exceeded() {
                stop = Some(TurnLimitReason::Deadline);
                self.append_synthetic_results(
                    ctx,
                    std::slice::from_ref(call),
                    ToolFailureKind::ExecutionFailed,
                    "not executed: turn deadline exceeded",
                );
                continue;
            }
            if ctx.tool_executions >= self.budgets.max_tool_executions {
                stop = Some(TurnLimitReason::IterationLimit);
                self.append_synthetic_results(
                    ctx,
                    std::slice::from_ref(call),
                    ToolFailureKind::ExecutionFailed,
                    "not executed: tool execution budget exhausted",
                );
                continue;
            }

            let result = self
                .executor
                .execute(&self.registry, &session_id, call, &ctx.cancel)
                .await;
            ctx.tool_executions += 1;
            self.append_result(ctx, call, &result);

            match result.failure_kind {
                Some(ToolFailureKind::PolicyDenied) if self.policy.stop_on_failure => {
                    stop = Some(TurnLimitReason::PolicyDenied);
                }
                Some(ToolFailureKind::ConfirmationDenied) if self.policy.stop_on_failure => {
                    stop = Some(TurnLimitReason::ConfirmationDenied);
                }
                Some(_) if self.policy.stop_on_any_failure => {
                    stop = Some(TurnLimitReason::ToolFailure);
                }
                _ => {}
            }
        }
        stop
    }

    /// Plan mode: record proposed calls instead of executing them.
    async fn collect_plan_steps(&self, ctx: &mut TurnContext, calls: &[ToolCall]) {
        let session_id = ctx.session_id();
        let plan = match self.plans.collecting_for_session(&session_id).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "failed to open collecting plan");
                ctx.record_failure(
                    FailureSource::System,
                    "plan_mode",
                    FailureKind::Exception,
                    e.to_string(),
                );
                self.append_synthetic_results(
                    ctx,
                    calls,
                    ToolFailureKind::ExecutionFailed,
                    "plan store unavailable",
                );
                return;
            }
        };

        for call in calls {
            if call.name == PLAN_SET_CONTENT_TOOL {
                let content = call
                    .arguments
                    .get("content")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                if let Err(e) = self.plans.finalize(&plan.id, content).await {
                    warn!(error = %e, "plan finalize failed");
                }
            } else if let Err(e) = self.plans.push_step(&plan.id, call.clone()).await {
                // Plan already finalized this turn; the proposal is
                // acknowledged but not recorded.
                debug!(error = %e, "step after finalize ignored");
            }
            ctx.session.push_message(Message::tool_result(
                &call.id,
                &call.name,
                PLANNED_MARKER,
            ));
        }
    }

    fn append_result(&self, ctx: &mut TurnContext, call: &ToolCall, result: &ToolResult) {
        ctx.session
            .push_message(Message::tool_result(&call.id, &call.name, result.to_content()));
    }

    fn append_synthetic_results(
        &self,
        ctx: &mut TurnContext,
        calls: &[ToolCall],
        kind: ToolFailureKind,
        message: &str,
    ) {
        for call in calls {
            let result = ToolResult::failure(kind, message);
            let mut msg = Message::tool_result(&call.id, &call.name, result.to_content());
            msg.metadata
                .insert("synthetic".into(), serde_json::json!(true));
            ctx.session.push_message(msg);
        }
    }

    /// One logical LLM call with bounded retries.
    ///
    /// `Err(stop)` means the loop must halt; the stop reason is `None`
    /// for permanent provider errors (the turn surfaces them through
    /// failure events rather than a loop limit).
    async fn call_with_retry(
        &self,
        ctx: &mut TurnContext,
        request: &ChatRequest,
    ) -> Result<ChatResponse, Option<TurnLimitReason>> {
        let session_id = ctx.session_id();
        let mut attempts = 0;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(Some(TurnLimitReason::Cancelled));
            }
            let remaining = ctx
                .deadline
                .saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(Some(TurnLimitReason::Deadline));
            }
            let call_timeout = Duration::from_secs(self.budgets.llm_timeout_secs).min(remaining);

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(ProviderError::Cancelled),
                result = tokio::time::timeout(call_timeout, self.llm.chat(request)) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(ProviderError::Timeout),
                    }
                }
            };
            attempts += 1;

            match outcome {
                Ok(response) => {
                    if attempts > 1 {
                        self.events.emit(RuntimeEvent::RetryFinished {
                            session_id,
                            attempts,
                            success: true,
                        });
                    }
                    return Ok(response);
                }
                Err(ProviderError::Cancelled) => {
                    return Err(Some(TurnLimitReason::Cancelled));
                }
                Err(e) if is_retryable(&e) && attempts < self.retry.max_attempts => {
                    warn!(attempt = attempts, error = %e, "transient LLM error, retrying");
                    self.events.emit(RuntimeEvent::RetryStarted {
                        session_id: session_id.clone(),
                        attempt: attempts + 1,
                    });
                    tokio::time::sleep(compute_delay(&self.retry, attempts - 1)).await;
                }
                Err(e) => {
                    if attempts > 1 {
                        self.events.emit(RuntimeEvent::RetryFinished {
                            session_id: session_id.clone(),
                            attempts,
                            success: false,
                        });
                    }
                    let kind = match &e {
                        ProviderError::RateLimited { .. } => FailureKind::RateLimit,
                        ProviderError::Timeout => FailureKind::Timeout,
                        _ => FailureKind::Exception,
                    };
                    ctx.record_failure(FailureSource::Llm, self.llm.name(), kind, e.to_string());
                    // A timed-out call that also exhausted the turn
                    // deadline stops as DEADLINE.
                    if matches!(e, ProviderError::Timeout) && ctx.deadline_exceeded() {
                        return Err(Some(TurnLimitReason::Deadline));
                    }
                    return Err(None);
                }
            }
        }
    }
}

/// The failure kind carried by synthetic results for a given stop.
fn synthetic_kind(reason: TurnLimitReason) -> ToolFailureKind {
    match reason {
        TurnLimitReason::ConfirmationDenied => ToolFailureKind::ConfirmationDenied,
        TurnLimitReason::PolicyDenied => ToolFailureKind::PolicyDenied,
        _ => ToolFailureKind::ExecutionFailed,
    }
}
