//! Error types for routing and admission
//!
//! Separates configuration defects (alert an operator) from ordinary
//! admission denials (retry with different parameters) and exhausted
//! attempts (abort the task). Recovery and persistence failures are logged
//! by the budget gate and only surface through explicit calls.

use crate::router::classifier::TaskCategory;
use crate::router::policy::ResourceTier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for admission operations
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// How a caller should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Downgrade, defer or shrink the task and try again
    RetryWithDifferentParameters,
    /// Stop working on this task
    AbortTask,
    /// Configuration or storage defect that needs a human
    AlertOperator,
}

/// Errors produced while selecting a resource for a task
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// Attempt counter reached the configured ceiling
    #[error("Max attempts ({max_attempts}) exceeded for task type: {category} (attempt {attempt})")]
    AttemptsExceeded {
        category: TaskCategory,
        attempt: u32,
        max_attempts: u32,
    },

    /// Policy references a tier with no resource mapping
    #[error("No model configured for tier: {tier}")]
    UnconfiguredTier { tier: ResourceTier },
}

/// Which budget limit denied a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    UnitsPerTask,
    CostPerTask,
    DailyCost,
}

impl std::fmt::Display for DenialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnitsPerTask => write!(f, "max_units_per_task"),
            Self::CostPerTask => write!(f, "max_cost_per_task_usd"),
            Self::DailyCost => write!(f, "max_daily_cost_usd"),
        }
    }
}

/// Errors loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config field `{field}`: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors reading or writing the budget snapshot
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors appending to or reading from the audit sink
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode audit record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Umbrella error for the admission engine
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Admission check failed one of its limits
    #[error("Budget denied ({kind}): {reason}")]
    BudgetDenied {
        kind: DenialKind,
        reason: String,
        estimated_cost_usd: f64,
        estimated_units: u64,
    },

    /// Audit sink unreadable during state reconstruction
    #[error("Failed to recover spend from audit log: {message}")]
    RecoveryReadFailure { message: String },

    /// Snapshot write failed or timed out
    #[error("Failed to persist budget state: {message}")]
    PersistFailure { message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AdmissionError {
    /// Classify the error for caller branching
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Routing(RoutingError::AttemptsExceeded { .. }) => ErrorClass::AbortTask,
            Self::Routing(RoutingError::UnconfiguredTier { .. }) => ErrorClass::AlertOperator,
            Self::BudgetDenied { .. } => ErrorClass::RetryWithDifferentParameters,
            Self::RecoveryReadFailure { .. } | Self::PersistFailure { .. } | Self::Config(_) => {
                ErrorClass::AlertOperator
            }
        }
    }

    /// Whether this error points at a configuration defect
    pub fn is_config_defect(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Routing(RoutingError::UnconfiguredTier { .. })
        )
    }

    /// Actionable instruction for whoever receives the error
    pub fn recovery_action(&self) -> String {
        match self {
            Self::Routing(RoutingError::AttemptsExceeded { max_attempts, .. }) => format!(
                "Stop retrying; the task failed {} attempts. Report the failure upstream.",
                max_attempts
            ),
            Self::Routing(RoutingError::UnconfiguredTier { tier }) => format!(
                "Add a resource for tier `{}` under [routing.defaults] and reload the policy.",
                tier
            ),
            Self::BudgetDenied { kind, .. } => match kind {
                DenialKind::UnitsPerTask | DenialKind::CostPerTask => {
                    "Shrink the task or route it to a cheaper tier before retrying.".to_string()
                }
                DenialKind::DailyCost => {
                    "Defer the task to the next period or ask an operator to raise the daily limit."
                        .to_string()
                }
            },
            Self::RecoveryReadFailure { .. } => {
                "Check the audit log path and permissions; spend was assumed to be zero."
                    .to_string()
            }
            Self::PersistFailure { .. } => {
                "Check the budget state path; in-memory spend is still authoritative.".to_string()
            }
            Self::Config(_) => "Fix the configuration file and restart.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let exceeded = AdmissionError::from(RoutingError::AttemptsExceeded {
            category: TaskCategory::Code,
            attempt: 3,
            max_attempts: 3,
        });
        assert_eq!(exceeded.class(), ErrorClass::AbortTask);
        assert!(!exceeded.is_config_defect());

        let unconfigured = AdmissionError::from(RoutingError::UnconfiguredTier {
            tier: ResourceTier::High,
        });
        assert_eq!(unconfigured.class(), ErrorClass::AlertOperator);
        assert!(unconfigured.is_config_defect());
        assert!(unconfigured.recovery_action().contains("high"));

        let denied = AdmissionError::BudgetDenied {
            kind: DenialKind::DailyCost,
            reason: "over".into(),
            estimated_cost_usd: 1.0,
            estimated_units: 10,
        };
        assert_eq!(denied.class(), ErrorClass::RetryWithDifferentParameters);
        assert!(denied.recovery_action().contains("next period"));
    }

    #[test]
    fn test_attempts_exceeded_message() {
        let err = RoutingError::AttemptsExceeded {
            category: TaskCategory::Strategy,
            attempt: 4,
            max_attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Max attempts (3) exceeded for task type: strategy (attempt 4)"
        );
    }
}
