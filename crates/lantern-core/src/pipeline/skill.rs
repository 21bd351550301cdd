//! Skill routing (order 15) and dynamic tier upgrade (order 25).

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use lantern_types::error::Result;
use lantern_types::message::MessageRole;
use lantern_types::routing::ModelTier;

use crate::pipeline::{System, order};
use crate::turn::TurnContext;

/// Selects the active skill for a turn.
///
/// Only explicit requests are honored: a `skill` metadata entry on the
/// inbound message, or a leading `/skill <name>` command. Auto-mode
/// turns skip skill routing entirely.
pub struct SkillRouting;

#[async_trait]
impl System for SkillRouting {
    fn name(&self) -> &str {
        "skill_routing"
    }

    fn order(&self) -> u32 {
        order::SKILL_ROUTING
    }

    fn should_process(&self, ctx: &TurnContext) -> bool {
        !ctx.is_auto_mode()
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        if let Some(skill) = ctx.incoming.metadata.get("skill").and_then(|v| v.as_str()) {
            ctx.active_skill = Some(skill.to_string());
        } else if let Some(rest) = ctx.incoming.content.strip_prefix("/skill ") {
            if let Some(name) = rest.split_whitespace().next() {
                ctx.active_skill = Some(name.to_string());
            }
        }
        if let Some(skill) = &ctx.active_skill {
            debug!(skill, "skill selected for turn");
        }
        Ok(())
    }
}

/// Number of recent messages scanned for code-activity signals.
const SIGNAL_WINDOW: usize = 10;

/// File-operation tools whose path arguments count as code activity.
const FILE_TOOLS: [&str; 4] = ["read_file", "write_file", "edit_file", "list_directory"];

/// Upgrades the tier to `coding` when recent traffic looks like code
/// work and the user has not locked the tier.
pub struct DynamicTier {
    code_extension: Regex,
    shell_command: Regex,
    stack_trace: Regex,
}

impl DynamicTier {
    /// Create the system with the built-in signal patterns.
    pub fn new() -> Self {
        Self {
            code_extension: Regex::new(
                r"\.(rs|py|ts|tsx|js|jsx|go|java|kt|c|cc|cpp|h|hpp|rb|cs|swift|toml|gradle)\b",
            )
            .expect("pattern compiles"),
            shell_command: Regex::new(
                r"\b(cargo|rustc|pytest|pip|npm|npx|yarn|tsc|javac|gradle|mvn|go\s+(build|test|run)|git\s+(diff|apply|rebase))\b",
            )
            .expect("pattern compiles"),
            stack_trace: Regex::new(
                r"(Traceback \(most recent call last\)|panicked at|at .+\.java:\d+|goroutine \d+ \[|TypeError:|SyntaxError:)",
            )
            .expect("pattern compiles"),
        }
    }

    fn has_code_signal(&self, ctx: &TurnContext) -> bool {
        let start = ctx.session.messages.len().saturating_sub(SIGNAL_WINDOW);
        for msg in &ctx.session.messages[start..] {
            for call in &msg.tool_calls {
                if FILE_TOOLS.contains(&call.name.as_str()) {
                    let path = call
                        .arguments
                        .get("path")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    if self.code_extension.is_match(path) {
                        return true;
                    }
                }
                if call.name == "shell" || call.name == "run_command" {
                    let command = call
                        .arguments
                        .get("command")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    if self.shell_command.is_match(command) {
                        return true;
                    }
                }
            }
            if msg.role == MessageRole::Tool && self.stack_trace.is_match(&msg.content) {
                return true;
            }
        }
        self.shell_command.is_match(&ctx.incoming.content)
            || self.stack_trace.is_match(&ctx.incoming.content)
    }
}

impl Default for DynamicTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl System for DynamicTier {
    fn name(&self) -> &str {
        "dynamic_tier"
    }

    fn order(&self) -> u32 {
        order::DYNAMIC_TIER
    }

    fn should_process(&self, ctx: &TurnContext) -> bool {
        !ctx.tier_locked && ctx.model_tier == ModelTier::Balanced
    }

    async fn process(&self, ctx: &mut TurnContext) -> Result<()> {
        if self.has_code_signal(ctx) {
            info!(session = %ctx.session_id(), "code activity detected, upgrading tier to coding");
            ctx.model_tier = ModelTier::Coding;
        }
        Ok(())
    }
}
