//! Runtime configuration.
//!
//! Deserialized from the daemon's TOML config file. Every field has a
//! serde default so a partial (or empty) file yields a working runtime.

use serde::{Deserialize, Serialize};

/// Per-turn execution budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnBudgets {
    /// Maximum LLM calls per turn.
    #[serde(default = "default_max_llm_calls")]
    pub max_llm_calls: u32,

    /// Maximum tool executions per turn.
    #[serde(default = "default_max_tool_executions")]
    pub max_tool_executions: u32,

    /// Turn deadline in seconds.
    #[serde(default = "default_turn_deadline_secs")]
    pub turn_deadline_secs: u64,

    /// Per-tool execution timeout in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Per-LLM-call timeout in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
}

fn default_max_llm_calls() -> u32 {
    200
}
fn default_max_tool_executions() -> u32 {
    500
}
fn default_turn_deadline_secs() -> u64 {
    3600
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_llm_timeout_secs() -> u64 {
    300
}

impl Default for TurnBudgets {
    fn default() -> Self {
        Self {
            max_llm_calls: default_max_llm_calls(),
            max_tool_executions: default_max_tool_executions(),
            turn_deadline_secs: default_turn_deadline_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            llm_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Compaction thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Context budget in tokens.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Messages kept verbatim at the tail.
    #[serde(default = "default_keep_last_messages")]
    pub keep_last_messages: usize,

    /// Characters per token for the estimate.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,

    /// Token overhead assumed for the system prompt.
    #[serde(default = "default_system_prompt_overhead")]
    pub system_prompt_overhead: usize,
}

fn default_max_context_tokens() -> usize {
    100_000
}
fn default_keep_last_messages() -> usize {
    20
}
fn default_chars_per_token() -> f64 {
    3.5
}
fn default_system_prompt_overhead() -> usize {
    2_000
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            keep_last_messages: default_keep_last_messages(),
            chars_per_token: default_chars_per_token(),
            system_prompt_overhead: default_system_prompt_overhead(),
        }
    }
}

/// Memory pack budgets for prompt assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBudgets {
    /// Preferred pack size in tokens.
    #[serde(default = "default_memory_soft_tokens")]
    pub soft_tokens: usize,

    /// Hard cap on pack size in tokens.
    #[serde(default = "default_memory_max_tokens")]
    pub max_tokens: usize,

    /// Maximum items retrieved before packing.
    #[serde(default = "default_memory_max_items")]
    pub max_items: usize,
}

fn default_memory_soft_tokens() -> usize {
    1_500
}
fn default_memory_max_tokens() -> usize {
    3_000
}
fn default_memory_max_items() -> usize {
    50
}

impl Default for MemoryBudgets {
    fn default() -> Self {
        Self {
            soft_tokens: default_memory_soft_tokens(),
            max_tokens: default_memory_max_tokens(),
            max_items: default_memory_max_items(),
        }
    }
}

/// Autonomous scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval in seconds.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Per-tick watchdog in seconds; overruns log and proceed.
    #[serde(default = "default_tick_watchdog_secs")]
    pub tick_watchdog_secs: u64,
}

fn default_tick_interval_secs() -> u64 {
    900
}
fn default_tick_watchdog_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            tick_watchdog_secs: default_tick_watchdog_secs(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Workspace root for all persistent state.
    #[serde(default)]
    pub workspace: Option<String>,

    /// Per-turn budgets.
    #[serde(default)]
    pub budgets: TurnBudgets,

    /// Compaction thresholds.
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Memory pack budgets.
    #[serde(default)]
    pub memory: MemoryBudgets,

    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// System prompt sections, concatenated in order at context building.
    #[serde(default)]
    pub prompt_sections: Vec<String>,

    /// Maximum accepted webhook payload size in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_max_payload_bytes() -> usize {
    262_144
}
