//! Routing policy: tiers, route table and escalation ladder

use crate::error::{AdmissionResult, ConfigError, RoutingError};
use crate::router::classifier::TaskCategory;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Cost/capability class of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTier {
    /// No resource is consumed
    None,
    Cheap,
    Mid,
    High,
}

impl ResourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Cheap => "cheap",
            Self::Mid => "mid",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(Self::None),
            "cheap" => Ok(Self::Cheap),
            "mid" => Ok(Self::Mid),
            "high" => Ok(Self::High),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Which failure signals may trigger escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationTriggers {
    pub validation_failure: bool,
    /// Tool errors only count once they repeat (2 or more)
    pub tool_error_repeated: bool,
    pub uncertainty_signal: bool,
}

impl Default for EscalationTriggers {
    fn default() -> Self {
        Self {
            validation_failure: true,
            tool_error_repeated: true,
            uncertainty_signal: true,
        }
    }
}

pub const DEFAULT_CHEAP_RESOURCE: &str = "openai/gpt-4o";
pub const DEFAULT_MID_RESOURCE: &str = "anthropic/claude-sonnet-4-5";
pub const DEFAULT_HIGH_RESOURCE: &str = "anthropic/claude-opus-4-5";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

fn default_tier_resources() -> BTreeMap<ResourceTier, String> {
    BTreeMap::from([
        (ResourceTier::Cheap, DEFAULT_CHEAP_RESOURCE.to_string()),
        (ResourceTier::Mid, DEFAULT_MID_RESOURCE.to_string()),
        (ResourceTier::High, DEFAULT_HIGH_RESOURCE.to_string()),
    ])
}

fn default_routes() -> BTreeMap<TaskCategory, ResourceTier> {
    TaskCategory::ALL
        .iter()
        .map(|c| (*c, c.recommended_tier()))
        .collect()
}

fn default_ladder() -> Vec<ResourceTier> {
    vec![ResourceTier::Cheap, ResourceTier::Mid, ResourceTier::High]
}

// Partial maps in config files merge over the defaults instead of replacing them.
fn merge_tier_resources<'de, D>(deserializer: D) -> Result<BTreeMap<ResourceTier, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<ResourceTier, String>::deserialize(deserializer)?;
    let mut merged = default_tier_resources();
    merged.extend(overrides);
    Ok(merged)
}

fn merge_routes<'de, D>(deserializer: D) -> Result<BTreeMap<TaskCategory, ResourceTier>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<TaskCategory, ResourceTier>::deserialize(deserializer)?;
    let mut merged = default_routes();
    merged.extend(overrides);
    Ok(merged)
}

/// Routing configuration. Immutable for the lifetime of a routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPolicy {
    /// Tier → resource identifier
    #[serde(deserialize_with = "merge_tier_resources")]
    pub defaults: BTreeMap<ResourceTier, String>,
    /// Category → tier
    #[serde(deserialize_with = "merge_routes")]
    pub routes: BTreeMap<TaskCategory, ResourceTier>,
    /// Escalation ladder, cheapest first
    pub escalation: Vec<ResourceTier>,
    /// Attempts allowed per task (attempt numbers are 0-indexed)
    pub max_attempts: u32,
    pub escalation_triggers: EscalationTriggers,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            defaults: default_tier_resources(),
            routes: default_routes(),
            escalation: default_ladder(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            escalation_triggers: EscalationTriggers::default(),
        }
    }
}

impl RoutingPolicy {
    /// Base tier for a category; categories missing from the table route to `mid`
    pub fn tier_for(&self, category: TaskCategory) -> ResourceTier {
        self.routes
            .get(&category)
            .copied()
            .unwrap_or(ResourceTier::Mid)
    }

    /// Resource identifier configured for a tier
    pub fn resource_for(&self, tier: ResourceTier) -> Option<&str> {
        self.defaults.get(&tier).map(String::as_str)
    }

    /// Position of a tier on the escalation ladder
    pub fn ladder_index(&self, tier: ResourceTier) -> Option<usize> {
        self.escalation.iter().position(|t| *t == tier)
    }

    /// Reverse lookup: which tier a resource identifier is configured for
    pub fn tier_of(&self, resource: &str) -> Option<ResourceTier> {
        self.defaults
            .iter()
            .find(|(_, id)| id.as_str() == resource)
            .map(|(tier, _)| *tier)
    }

    /// Validate once at load time. Returns non-fatal warnings.
    ///
    /// Any tier a task can be routed or escalated to must resolve to a
    /// resource; a missing mapping fails with `UnconfiguredTier`.
    pub fn validate(&self) -> AdmissionResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("routing.max_attempts", "must be at least 1").into());
        }
        if self.escalation.is_empty() {
            return Err(
                ConfigError::invalid("routing.escalation", "ladder must not be empty").into(),
            );
        }
        if self.escalation.contains(&ResourceTier::None) {
            return Err(ConfigError::invalid(
                "routing.escalation",
                "ladder must not contain the `none` tier",
            )
            .into());
        }

        for (i, tier) in self.escalation.iter().enumerate() {
            if self.escalation[..i].contains(tier) {
                warnings.push(format!("escalation ladder lists `{}` more than once", tier));
            }
        }
        for pair in self.escalation.windows(2) {
            if pair[1] < pair[0] {
                warnings.push(format!(
                    "escalation ladder steps down from `{}` to `{}`",
                    pair[0], pair[1]
                ));
            }
        }

        let routed = TaskCategory::ALL.iter().map(|c| self.tier_for(*c));
        for tier in routed.chain(self.escalation.iter().copied()) {
            if tier != ResourceTier::None && self.resource_for(tier).is_none() {
                return Err(RoutingError::UnconfiguredTier { tier }.into());
            }
        }

        for (tier, resource) in &self.defaults {
            if resource.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("routing.defaults.{}", tier),
                    "resource identifier must not be empty",
                )
                .into());
            }
        }

        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdmissionError;

    #[test]
    fn test_default_policy() {
        let policy = RoutingPolicy::default();
        assert_eq!(policy.tier_for(TaskCategory::Heartbeat), ResourceTier::None);
        assert_eq!(policy.tier_for(TaskCategory::FileOps), ResourceTier::Cheap);
        assert_eq!(policy.tier_for(TaskCategory::Extract), ResourceTier::Cheap);
        assert_eq!(policy.tier_for(TaskCategory::Summarize), ResourceTier::Cheap);
        assert_eq!(policy.tier_for(TaskCategory::Write), ResourceTier::Mid);
        assert_eq!(policy.tier_for(TaskCategory::Code), ResourceTier::Mid);
        assert_eq!(policy.tier_for(TaskCategory::Strategy), ResourceTier::High);
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.validate().unwrap().is_empty());
    }

    #[test]
    fn test_missing_route_defaults_to_mid() {
        let mut policy = RoutingPolicy::default();
        policy.routes.remove(&TaskCategory::Summarize);
        assert_eq!(policy.tier_for(TaskCategory::Summarize), ResourceTier::Mid);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(ResourceTier::Cheap < ResourceTier::Mid);
        assert!(ResourceTier::Mid < ResourceTier::High);
    }

    #[test]
    fn test_tier_of_reverse_lookup() {
        let policy = RoutingPolicy::default();
        assert_eq!(policy.tier_of(DEFAULT_HIGH_RESOURCE), Some(ResourceTier::High));
        assert_eq!(policy.tier_of("local/llama"), None);
    }

    #[test]
    fn test_validate_unconfigured_tier() {
        let mut policy = RoutingPolicy::default();
        policy.defaults.remove(&ResourceTier::High);
        let err = policy.validate().unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::Routing(RoutingError::UnconfiguredTier {
                tier: ResourceTier::High
            })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_ladder() {
        let mut policy = RoutingPolicy::default();
        policy.escalation.clear();
        assert!(policy.validate().is_err());

        let mut policy = RoutingPolicy::default();
        policy.escalation.push(ResourceTier::None);
        assert!(policy.validate().is_err());

        let mut policy = RoutingPolicy::default();
        policy.max_attempts = 0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validate_warns_on_descending_ladder() {
        let mut policy = RoutingPolicy::default();
        policy.escalation = vec![ResourceTier::High, ResourceTier::Cheap];
        let warnings = policy.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("steps down"));
    }

    #[test]
    fn test_partial_config_merges_over_defaults() {
        let policy: RoutingPolicy = toml::from_str(
            r#"
            max_attempts = 5

            [defaults]
            cheap = "anthropic/claude-haiku-4"

            [routes]
            summarize = "mid"

            [escalation_triggers]
            uncertainty_signal = false
            "#,
        )
        .unwrap();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(
            policy.resource_for(ResourceTier::Cheap),
            Some("anthropic/claude-haiku-4")
        );
        assert_eq!(policy.resource_for(ResourceTier::High), Some(DEFAULT_HIGH_RESOURCE));
        assert_eq!(policy.tier_for(TaskCategory::Summarize), ResourceTier::Mid);
        assert_eq!(policy.tier_for(TaskCategory::Strategy), ResourceTier::High);
        assert!(!policy.escalation_triggers.uncertainty_signal);
        assert!(policy.escalation_triggers.validation_failure);
        assert_eq!(policy.escalation, default_ladder());
    }
}
