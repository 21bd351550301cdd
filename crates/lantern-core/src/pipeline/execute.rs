//! Tool-loop execution (order 30).
//!
//! Thin pipeline wrapper: the actual iteration lives in
//! [`ToolLoop`](crate::tool_loop::ToolLoop).

use std::sync::Arc;

use async_trait::async_trait;

use lantern_types::error::Result;

use crate::pipeline::{System, order};
use crate::tool_loop::ToolLoop;
use crate::turn::TurnContext;

/// Runs the bounded LLM/tool iteration for the turn.
pub struct ToolLoopExecution {
    tool_loop: Arc<ToolLoop>,
}

impl ToolLoopExecution {
    /// Create the system.
    pub fn new(tool_loop: Arc<ToolLoop>) -> Self {
        Self { tool_loop }
    }
}

#[async_trait]
impl System for ToolLoopExecution {
    fn name(&self) -> &str {
        "tool_loop_execution"
    }

    fn order(&self) -> u32 {
        order::TOOL_LOOP
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        self.tool_loop.run(ctx).await;
        Ok(())
    }
}
