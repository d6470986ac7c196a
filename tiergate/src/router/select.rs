//! Resource selection with failure-driven escalation
//!
//! Pure functions: the same category, attempt, failure and policy always
//! produce the same selection.
//!
//! # Escalation
//!
//! ```text
//! attempt 0            → base tier from the route table
//! attempt n > 0, no    → base tier
//!   escalating failure
//! attempt n > 0, with  → ladder[min(index(base) + n, len - 1)]
//!   escalating failure
//! attempt >= max       → AttemptsExceeded
//! ```
//!
//! Escalation scales with the attempt number rather than stepping one tier
//! per retry: two failures on a cheap-tier task jump straight to the top of
//! the default ladder.

use crate::error::RoutingError;
use crate::router::classifier::TaskCategory;
use crate::router::policy::{ResourceTier, RoutingPolicy};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Kind of failure observed on the previous attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Output failed validation
    #[serde(alias = "validation_failure")]
    Validation,
    /// A tool call errored
    #[serde(alias = "tool_error_repeated")]
    ToolError,
    /// The model signalled it was unsure
    #[serde(alias = "uncertainty_signal")]
    Uncertainty,
    /// Anything unrecognised; never escalates
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::ToolError => write!(f, "tool_error"),
            Self::Uncertainty => write!(f, "uncertainty"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "validation" | "validation_failure" => Ok(Self::Validation),
            "tool_error" | "tool_error_repeated" => Ok(Self::ToolError),
            "uncertainty" | "uncertainty_signal" => Ok(Self::Uncertainty),
            other => Err(format!("unknown failure kind: {}", other)),
        }
    }
}

/// Outcome of the previous attempt at the same task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    pub kind: FailureKind,
    /// How many times this failure has occurred for the task
    #[serde(default, alias = "count")]
    pub occurrence_count: u32,
}

impl FailureDescriptor {
    pub fn new(kind: FailureKind, occurrence_count: u32) -> Self {
        Self {
            kind,
            occurrence_count,
        }
    }

    pub fn validation() -> Self {
        Self::new(FailureKind::Validation, 1)
    }

    pub fn tool_error(occurrence_count: u32) -> Self {
        Self::new(FailureKind::ToolError, occurrence_count)
    }

    pub fn uncertainty() -> Self {
        Self::new(FailureKind::Uncertainty, 1)
    }
}

/// Whether the previous failure warrants escalating to a higher tier
pub fn should_escalate(last_failure: Option<&FailureDescriptor>, policy: &RoutingPolicy) -> bool {
    let Some(failure) = last_failure else {
        return false;
    };
    let triggers = &policy.escalation_triggers;

    match failure.kind {
        FailureKind::Validation => triggers.validation_failure,
        FailureKind::ToolError => triggers.tool_error_repeated && failure.occurrence_count >= 2,
        FailureKind::Uncertainty => triggers.uncertainty_signal,
        FailureKind::Unknown => false,
    }
}

/// Result of a routing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub category: TaskCategory,
    /// Tier from the route table
    pub base_tier: ResourceTier,
    /// Tier after escalation
    pub tier: ResourceTier,
    /// `None` when the task needs no resource
    pub resource: Option<String>,
    pub attempt: u32,
    pub escalated: bool,
    pub reason: String,
}

impl Selection {
    fn no_resource(category: TaskCategory, attempt: u32) -> Self {
        Self {
            category,
            base_tier: ResourceTier::None,
            tier: ResourceTier::None,
            resource: None,
            attempt,
            escalated: false,
            reason: format!("{} needs no model", category),
        }
    }

    /// Whether a resource will be consumed
    pub fn needs_resource(&self) -> bool {
        self.resource.is_some()
    }
}

/// Effective tier for an attempt, before resolving it to a resource.
///
/// Returns `None` for categories that consume no resource.
pub fn effective_tier(
    category: TaskCategory,
    attempt: u32,
    last_failure: Option<&FailureDescriptor>,
    policy: &RoutingPolicy,
) -> Option<ResourceTier> {
    let base = policy.tier_for(category);
    if category == TaskCategory::Heartbeat || base == ResourceTier::None {
        return None;
    }

    if attempt == 0 || policy.escalation.is_empty() || !should_escalate(last_failure, policy) {
        return Some(base);
    }

    let base_index = policy.ladder_index(base).unwrap_or(0);
    let target = base_index
        .saturating_add(attempt as usize)
        .min(policy.escalation.len() - 1);
    Some(policy.escalation[target])
}

/// Select the resource for a task attempt
pub fn select(
    category: TaskCategory,
    attempt: u32,
    last_failure: Option<&FailureDescriptor>,
    policy: &RoutingPolicy,
) -> Result<Selection, RoutingError> {
    let base_tier = policy.tier_for(category);
    if category == TaskCategory::Heartbeat || base_tier == ResourceTier::None {
        debug!(%category, attempt, "No resource needed");
        return Ok(Selection::no_resource(category, attempt));
    }

    if attempt >= policy.max_attempts {
        return Err(RoutingError::AttemptsExceeded {
            category,
            attempt,
            max_attempts: policy.max_attempts,
        });
    }

    let tier = effective_tier(category, attempt, last_failure, policy).unwrap_or(base_tier);
    let resource = policy
        .resource_for(tier)
        .ok_or(RoutingError::UnconfiguredTier { tier })?
        .to_string();

    let escalated = tier != base_tier;
    let reason = match last_failure {
        Some(failure) if escalated => format!(
            "Task type: {} → {} tier (escalated from {} after {} on attempt {})",
            category, tier, base_tier, failure.kind, attempt
        ),
        _ => format!("Task type: {} → {} tier", category, tier),
    };

    debug!(
        %category,
        %tier,
        %resource,
        attempt,
        escalated,
        "Selected resource"
    );

    Ok(Selection {
        category,
        base_tier,
        tier,
        resource: Some(resource),
        attempt,
        escalated,
        reason,
    })
}

/// Select just the resource identifier; `None` means no resource is needed
pub fn select_resource(
    category: TaskCategory,
    attempt: u32,
    last_failure: Option<&FailureDescriptor>,
    policy: &RoutingPolicy,
) -> Result<Option<String>, RoutingError> {
    select(category, attempt, last_failure, policy).map(|s| s.resource)
}
