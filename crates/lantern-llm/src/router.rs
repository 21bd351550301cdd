//! Tier-based model routing.
//!
//! The [`LlmRouter`] resolves `(tier, skill override, user override)`
//! into a concrete [`ModelChoice`]. Precedence, highest first: user
//! override, skill override, tier table, default tier.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use lantern_types::routing::{ModelTier, ReasoningEffort};

/// A resolved model selection for one LLM call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChoice {
    /// Concrete model identifier.
    pub model: String,

    /// Reasoning effort to request.
    pub reasoning_effort: ReasoningEffort,
}

/// One tier's entry in the routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModel {
    /// Model identifier for this tier.
    pub model: String,

    /// Reasoning effort for this tier.
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
}

/// Routing table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Model per tier.
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<ModelTier, TierModel>,
}

fn default_tiers() -> HashMap<ModelTier, TierModel> {
    HashMap::from([
        (
            ModelTier::Balanced,
            TierModel {
                model: "openai/gpt-4o".into(),
                reasoning_effort: ReasoningEffort::Medium,
            },
        ),
        (
            ModelTier::Smart,
            TierModel {
                model: "anthropic/claude-sonnet-4-5-20250514".into(),
                reasoning_effort: ReasoningEffort::High,
            },
        ),
        (
            ModelTier::Coding,
            TierModel {
                model: "anthropic/claude-sonnet-4-5-20250514".into(),
                reasoning_effort: ReasoningEffort::Medium,
            },
        ),
        (
            ModelTier::Deep,
            TierModel {
                model: "openai/o3".into(),
                reasoning_effort: ReasoningEffort::High,
            },
        ),
    ])
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
        }
    }
}

/// Resolves tiers and overrides into concrete model choices.
#[derive(Debug, Clone)]
pub struct LlmRouter {
    config: RouterConfig,
}

impl LlmRouter {
    /// Create a router from a routing table.
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Resolve a model for the given tier and overrides.
    ///
    /// A user override (session preference) wins over a skill override,
    /// which wins over the tier table. Overrides keep the tier's
    /// reasoning effort. An unknown tier falls back to `balanced`.
    pub fn resolve(
        &self,
        tier: ModelTier,
        skill_override: Option<&str>,
        user_override: Option<&str>,
    ) -> ModelChoice {
        let tier_entry = self
            .config
            .tiers
            .get(&tier)
            .or_else(|| self.config.tiers.get(&ModelTier::Balanced));

        let (tier_model, effort) = match tier_entry {
            Some(entry) => (entry.model.as_str(), entry.reasoning_effort),
            None => ("openai/gpt-4o", ReasoningEffort::Medium),
        };

        let model = user_override
            .filter(|m| !m.is_empty())
            .or(skill_override.filter(|m| !m.is_empty()))
            .unwrap_or(tier_model);

        debug!(?tier, model, "resolved model choice");
        ModelChoice {
            model: model.to_string(),
            reasoning_effort: effort,
        }
    }
}

impl Default for LlmRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_table_used_without_overrides() {
        let router = LlmRouter::default();
        let choice = router.resolve(ModelTier::Smart, None, None);
        assert_eq!(choice.model, "anthropic/claude-sonnet-4-5-20250514");
        assert_eq!(choice.reasoning_effort, ReasoningEffort::High);
    }

    #[test]
    fn skill_override_beats_tier() {
        let router = LlmRouter::default();
        let choice = router.resolve(ModelTier::Balanced, Some("openai/o3"), None);
        assert_eq!(choice.model, "openai/o3");
    }

    #[test]
    fn user_override_beats_skill() {
        let router = LlmRouter::default();
        let choice = router.resolve(
            ModelTier::Balanced,
            Some("openai/o3"),
            Some("anthropic/claude-opus-4"),
        );
        assert_eq!(choice.model, "anthropic/claude-opus-4");
    }

    #[test]
    fn empty_override_ignored() {
        let router = LlmRouter::default();
        let choice = router.resolve(ModelTier::Balanced, Some(""), Some(""));
        assert_eq!(choice.model, "openai/gpt-4o");
    }

    #[test]
    fn missing_tier_falls_back_to_balanced() {
        let mut config = RouterConfig::default();
        config.tiers.remove(&ModelTier::Deep);
        let router = LlmRouter::new(config);
        let choice = router.resolve(ModelTier::Deep, None, None);
        assert_eq!(choice.model, "openai/gpt-4o");
    }

    #[test]
    fn router_config_serde_defaults() {
        let config: RouterConfig = serde_json::from_str("{}").unwrap();
        assert!(config.tiers.contains_key(&ModelTier::Balanced));
        assert!(config.tiers.contains_key(&ModelTier::Deep));
    }
}
