//! The ordered processing pipeline.
//!
//! A turn is the sequential application of [`System`]s to one
//! [`TurnContext`]. Systems are small and isolated: a system that fails
//! is recorded as a failure event and the pipeline continues with
//! whatever can still run, so the feedback guarantee always gets its
//! chance at the end.

pub mod compaction;
pub mod context;
pub mod deliver;
pub mod execute;
pub mod persist;
pub mod prepare;
pub mod sanitize;
pub mod skill;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use lantern_types::error::{FailureKind, FailureSource, LanternError, Result};

use crate::turn::TurnContext;

/// Canonical orders for the required systems.
pub mod order {
    /// InputSanitization.
    pub const INPUT_SANITIZATION: u32 = 10;
    /// SkillRouting.
    pub const SKILL_ROUTING: u32 = 15;
    /// AutoCompaction.
    pub const AUTO_COMPACTION: u32 = 18;
    /// ContextBuilding.
    pub const CONTEXT_BUILDING: u32 = 20;
    /// DynamicTier.
    pub const DYNAMIC_TIER: u32 = 25;
    /// ToolLoopExecution.
    pub const TOOL_LOOP: u32 = 30;
    /// MemoryPersist.
    pub const MEMORY_PERSIST: u32 = 50;
    /// RagIndexing.
    pub const RAG_INDEXING: u32 = 55;
    /// OutgoingResponsePreparation.
    pub const RESPONSE_PREPARATION: u32 = 58;
    /// FeedbackGuarantee.
    pub const FEEDBACK_GUARANTEE: u32 = 59;
    /// ResponseRouting.
    pub const RESPONSE_ROUTING: u32 = 60;
}

/// One unit of turn processing.
#[async_trait]
pub trait System: Send + Sync {
    /// Stable system name, used in failure events and logs.
    fn name(&self) -> &str;

    /// Position in the pipeline; lower runs first. Orders must be
    /// unique across a pipeline.
    fn order(&self) -> u32;

    /// Runtime enable switch. Disabled systems are skipped without a
    /// `should_process` call.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Whether this system applies to the given turn.
    fn should_process(&self, _ctx: &TurnContext) -> bool {
        true
    }

    /// Apply the system to the turn.
    async fn process(&self, ctx: &mut TurnContext) -> Result<()>;
}

/// The ordered sequence of systems for a turn.
pub struct Pipeline {
    systems: Vec<Arc<dyn System>>,
}

impl Pipeline {
    /// Build a pipeline, sorting by order and rejecting duplicates.
    pub fn new(mut systems: Vec<Arc<dyn System>>) -> Result<Self> {
        systems.sort_by_key(|s| s.order());
        for pair in systems.windows(2) {
            if pair[0].order() == pair[1].order() {
                return Err(LanternError::ConfigInvalid {
                    reason: format!(
                        "duplicate system order {}: '{}' and '{}'",
                        pair[0].order(),
                        pair[0].name(),
                        pair[1].name()
                    ),
                });
            }
        }
        Ok(Self { systems })
    }

    /// Run all applicable systems in order.
    ///
    /// A system error is recorded on the context and the pipeline
    /// continues; it never aborts the turn.
    pub async fn run(&self, ctx: &mut TurnContext) {
        for system in &self.systems {
            if !system.is_enabled() || !system.should_process(ctx) {
                continue;
            }
            debug!(system = system.name(), order = system.order(), "running system");
            if let Err(e) = system.process(ctx).await {
                error!(system = system.name(), error = %e, "system failed, continuing");
                ctx.record_failure(
                    FailureSource::System,
                    system.name().to_string(),
                    classify(&e),
                    e.to_string(),
                );
            }
        }
    }

    /// Names of the systems in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name()).collect()
    }
}

fn classify(error: &LanternError) -> FailureKind {
    match error {
        LanternError::Timeout { .. } => FailureKind::Timeout,
        LanternError::Validation { .. } | LanternError::PayloadTooLarge { .. } => {
            FailureKind::Validation
        }
        LanternError::RateLimited { .. } => FailureKind::RateLimit,
        LanternError::SecurityViolation { .. } => FailureKind::Policy,
        _ => FailureKind::Exception,
    }
}
