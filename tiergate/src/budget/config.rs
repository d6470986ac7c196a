//! Budget limits and alert thresholds

use crate::error::{AdmissionResult, ConfigError};
use serde::{Deserialize, Serialize};

/// What the surrounding system does when a task is denied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum OnExceed {
    /// Hold the task and report the denial to an operator
    #[default]
    PauseAndReport,
}

impl std::fmt::Display for OnExceed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PauseAndReport => write!(f, "pause_and_report"),
        }
    }
}

/// Non-blocking alert levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    #[serde(alias = "taskCostUSD")]
    pub task_cost_usd: f64,
    #[serde(alias = "dailyCostUSD")]
    pub daily_cost_usd: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            task_cost_usd: 2.0,
            daily_cost_usd: 20.0,
        }
    }
}

/// Admission limits, loaded once and validated at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    #[serde(alias = "maxTokensPerTask")]
    pub max_units_per_task: u64,
    #[serde(alias = "maxCostPerTaskUSD")]
    pub max_cost_per_task_usd: f64,
    #[serde(alias = "maxDailyCostUSD")]
    pub max_daily_cost_usd: f64,
    #[serde(alias = "onExceed")]
    pub on_exceed: OnExceed,
    #[serde(alias = "alertThresholds")]
    pub alert_thresholds: AlertThresholds,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_units_per_task: 120_000,
            max_cost_per_task_usd: 5.0,
            max_daily_cost_usd: 25.0,
            on_exceed: OnExceed::default(),
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

fn check_threshold(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::invalid(field, "must be a finite number"));
    }
    if value < 0.0 {
        return Err(ConfigError::invalid(field, format!("must be >= 0, got {}", value)));
    }
    Ok(())
}

impl BudgetConfig {
    /// Validate thresholds. Returns warnings for suspicious but legal combinations.
    pub fn validate(&self) -> AdmissionResult<Vec<String>> {
        check_threshold("budgets.max_cost_per_task_usd", self.max_cost_per_task_usd)?;
        check_threshold("budgets.max_daily_cost_usd", self.max_daily_cost_usd)?;
        check_threshold(
            "budgets.alert_thresholds.task_cost_usd",
            self.alert_thresholds.task_cost_usd,
        )?;
        check_threshold(
            "budgets.alert_thresholds.daily_cost_usd",
            self.alert_thresholds.daily_cost_usd,
        )?;

        let mut warnings = Vec::new();
        if self.max_cost_per_task_usd > self.max_daily_cost_usd {
            warnings.push(format!(
                "max_cost_per_task_usd (${}) is above max_daily_cost_usd (${}); the daily limit will deny first",
                self.max_cost_per_task_usd, self.max_daily_cost_usd
            ));
        }
        if self.alert_thresholds.task_cost_usd > self.max_cost_per_task_usd {
            warnings.push(format!(
                "task alert threshold (${}) is above max_cost_per_task_usd (${}) and will never fire",
                self.alert_thresholds.task_cost_usd, self.max_cost_per_task_usd
            ));
        }
        if self.alert_thresholds.daily_cost_usd > self.max_daily_cost_usd {
            warnings.push(format!(
                "daily alert threshold (${}) is above max_daily_cost_usd (${}) and will never fire",
                self.alert_thresholds.daily_cost_usd, self.max_daily_cost_usd
            ));
        }
        if self.max_units_per_task == 0 {
            warnings.push("max_units_per_task is 0; every priced task will be denied".to_string());
        }
        Ok(warnings)
    }
}
