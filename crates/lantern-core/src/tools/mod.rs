//! Tool contracts and registry.
//!
//! Tool implementations (shell, filesystem, browser, ...) live outside
//! this workspace; they implement the [`Tool`] trait. The
//! [`ToolRegistry`] owns name lookup plus the enable/policy filters
//! consulted before any execution.

pub mod executor;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use lantern_types::tool::{ToolDefinition, ToolFailureKind, ToolResult};

/// A tool the LLM can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The contract advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Execute with validated-by-schema arguments.
    ///
    /// Implementations report failures through the result's
    /// `failure_kind`, not by panicking.
    async fn execute(&self, arguments: serde_json::Value) -> ToolResult;
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.definition().name)
            .finish()
    }
}

/// Policy hook deciding whether a tool may be offered and executed.
pub type ToolPolicy = dyn Fn(&ToolDefinition) -> bool + Send + Sync;

/// Name → tool lookup with enable and policy filtering.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    disabled: RwLock<HashSet<String>>,
    policy: RwLock<Option<Arc<ToolPolicy>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            disabled: RwLock::new(HashSet::new()),
            policy: RwLock::new(None),
        }
    }

    /// Register a tool under its definition name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        debug!(tool = %name, "registering tool");
        self.tools.write().unwrap().insert(name, tool);
    }

    /// Disable a tool without unregistering it.
    pub fn disable(&self, name: &str) {
        self.disabled.write().unwrap().insert(name.to_string());
    }

    /// Re-enable a previously disabled tool.
    pub fn enable(&self, name: &str) {
        self.disabled.write().unwrap().remove(name);
    }

    /// Install a policy filter applied to offering and resolution.
    pub fn set_policy(&self, policy: Arc<ToolPolicy>) {
        *self.policy.write().unwrap() = Some(policy);
    }

    fn allowed(&self, definition: &ToolDefinition) -> bool {
        if self.disabled.read().unwrap().contains(&definition.name) {
            return false;
        }
        match self.policy.read().unwrap().as_ref() {
            Some(policy) => policy(definition),
            None => true,
        }
    }

    /// Definitions of all currently offered tools, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().unwrap();
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|t| t.definition())
            .filter(|d| self.allowed(d))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Resolve a tool for execution.
    ///
    /// Unknown, disabled, and policy-filtered tools all resolve to a
    /// policy denial so the LLM receives a uniform failure result.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolResult> {
        let tool = {
            let tools = self.tools.read().unwrap();
            tools.get(name).cloned()
        };
        match tool {
            Some(tool) if self.allowed(&tool.definition()) => Ok(tool),
            Some(_) => Err(ToolResult::failure(
                ToolFailureKind::PolicyDenied,
                format!("tool '{name}' is disabled"),
            )),
            None => Err(ToolResult::failure(
                ToolFailureKind::PolicyDenied,
                format!("unknown tool: {name}"),
            )),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
