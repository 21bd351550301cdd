//! Model tiers and reasoning effort.

use serde::{Deserialize, Serialize};

/// Named model capability bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Everyday conversational work.
    Balanced,
    /// Harder reasoning at higher cost.
    Smart,
    /// Code-heavy work.
    Coding,
    /// Long-horizon analysis.
    Deep,
}

impl Default for ModelTier {
    fn default() -> Self {
        Self::Balanced
    }
}

impl ModelTier {
    /// Parse a tier name as it appears in user preferences.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "balanced" => Some(Self::Balanced),
            "smart" => Some(Self::Smart),
            "coding" => Some(Self::Coding),
            "deep" => Some(Self::Deep),
            _ => None,
        }
    }
}

/// How much reasoning the provider should spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl Default for ReasoningEffort {
    fn default() -> Self {
        Self::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parse() {
        assert_eq!(ModelTier::parse("balanced"), Some(ModelTier::Balanced));
        assert_eq!(ModelTier::parse("coding"), Some(ModelTier::Coding));
        assert_eq!(ModelTier::parse("turbo"), None);
    }

    #[test]
    fn defaults() {
        assert_eq!(ModelTier::default(), ModelTier::Balanced);
        assert_eq!(ReasoningEffort::default(), ReasoningEffort::Medium);
    }

    #[test]
    fn serde_snake_case() {
        assert_eq!(serde_json::to_string(&ModelTier::Deep).unwrap(), "\"deep\"");
        assert_eq!(
            serde_json::to_string(&ReasoningEffort::High).unwrap(),
            "\"high\""
        );
    }
}
