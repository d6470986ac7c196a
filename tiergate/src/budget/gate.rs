//! Budget gate: admission control over same-period spend
//!
//! The gate owns the only mutable shared state in the engine. Every read
//! and write goes through one lock. Check and record are separate calls, so
//! concurrent admissions can overshoot the daily limit by the sum of
//! in-flight estimates.

use crate::audit::{replay_spend, AuditSink};
use crate::budget::config::BudgetConfig;
use crate::budget::state::{
    BudgetState, Clock, MemorySnapshotStore, SnapshotStore, SystemClock,
};
use crate::error::{AdmissionError, AdmissionResult, DenialKind};
use crate::pricing::{PricingTable, Usage};
use crate::router::classifier::TaskCategory;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_millis(2000);

/// Result of an admission check. Deny paths still carry the estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub estimated_cost_usd: f64,
    pub estimated_units: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialKind>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Spend already recorded this period
    pub cumulative_spend_usd: f64,
    /// Spend if this task runs at its estimate
    pub projected_spend_usd: f64,
}

impl BudgetCheck {
    /// Turn a denial into `AdmissionError::BudgetDenied`
    pub fn into_result(self) -> AdmissionResult<Self> {
        if self.allowed {
            return Ok(self);
        }
        Err(AdmissionError::BudgetDenied {
            kind: self.denial.unwrap_or(DenialKind::DailyCost),
            reason: self.reason.unwrap_or_default(),
            estimated_cost_usd: self.estimated_cost_usd,
            estimated_units: self.estimated_units,
        })
    }
}

/// Configured limits, echoed in status reports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub max_units_per_task: u64,
    pub max_cost_per_task_usd: f64,
    pub max_daily_cost_usd: f64,
}

/// Coarse reading of daily usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetHealth {
    Healthy,
    /// At or above 80% of the daily limit
    Caution,
    /// At or above 90% of the daily limit
    Warning,
}

impl std::fmt::Display for BudgetHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Caution => write!(f, "caution"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// Read-only view of the current period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub period_key: String,
    pub cumulative_spend_usd: f64,
    pub daily_limit: f64,
    /// Never negative
    pub remaining: f64,
    pub percent_used: f64,
    pub limits: BudgetLimits,
}

impl BudgetStatus {
    pub fn health(&self) -> BudgetHealth {
        if self.percent_used >= 90.0 {
            BudgetHealth::Warning
        } else if self.percent_used >= 80.0 {
            BudgetHealth::Caution
        } else {
            BudgetHealth::Healthy
        }
    }
}

/// Where the starting spend came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    /// A snapshot for the current period
    Snapshot,
    /// Summed from the audit sink
    AuditReplay,
    /// Nothing usable; started from zero
    Fresh,
}

/// What happened during startup recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub source: RecoverySource,
    pub period_key: String,
    pub spend_usd: f64,
    pub records_counted: usize,
    pub lines_skipped: usize,
    /// Set when the sink could not be read at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Builder for [`BudgetGate`]
pub struct BudgetGateBuilder {
    config: BudgetConfig,
    pricing: PricingTable,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    persist_timeout: Duration,
}

impl BudgetGateBuilder {
    pub fn pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = store;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = timeout;
        self
    }

    /// Rebuild the current period's spend and open the gate.
    ///
    /// A snapshot for the current period wins. Otherwise the sink is
    /// replayed. A missing or unreadable sink means zero spend.
    pub async fn open(self, sink: Option<&dyn AuditSink>) -> BudgetGate {
        let today = self.clock.period_key();
        let mut gate = BudgetGate {
            config: self.config,
            pricing: self.pricing,
            state: Mutex::new(BudgetState::fresh(today.clone())),
            store: self.store,
            clock: self.clock,
            persist_timeout: self.persist_timeout,
            recovery: RecoveryReport {
                source: RecoverySource::Fresh,
                period_key: today.clone(),
                spend_usd: 0.0,
                records_counted: 0,
                lines_skipped: 0,
                failure: None,
            },
        };

        let loaded = tokio::time::timeout(gate.persist_timeout, gate.store.load()).await;
        match loaded {
            Ok(Ok(Some(snapshot))) if snapshot.period_key == today => {
                let spend = snapshot.spend();
                info!(period = %today, spend_usd = spend, "Budget state restored from snapshot");
                gate.state.get_mut().cumulative_spend_usd = spend;
                gate.recovery.source = RecoverySource::Snapshot;
                gate.recovery.spend_usd = spend;
                return gate;
            }
            Ok(Ok(Some(snapshot))) => {
                debug!(
                    stale = %snapshot.period_key,
                    period = %today,
                    "Ignoring snapshot from another period"
                );
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(error = %e, "Budget snapshot unreadable, replaying audit log"),
            Err(_) => warn!("Timed out loading budget snapshot, replaying audit log"),
        }

        if let Some(sink) = sink {
            match sink.read_lines().await {
                Ok(lines) => {
                    let totals = replay_spend(&lines, &today);
                    if totals.lines_skipped > 0 {
                        warn!(
                            skipped = totals.lines_skipped,
                            "Skipped malformed audit log lines during recovery"
                        );
                    }
                    info!(
                        period = %today,
                        spend_usd = totals.spend_usd,
                        records = totals.records_counted,
                        "Budget state replayed from audit log"
                    );
                    gate.state.get_mut().cumulative_spend_usd = totals.spend_usd;
                    gate.recovery.source = RecoverySource::AuditReplay;
                    gate.recovery.spend_usd = totals.spend_usd;
                    gate.recovery.records_counted = totals.records_counted;
                    gate.recovery.lines_skipped = totals.lines_skipped;
                }
                Err(e) => {
                    let err = AdmissionError::RecoveryReadFailure {
                        message: e.to_string(),
                    };
                    warn!(error = %err, "Assuming zero spend for the current period");
                    gate.recovery.failure = Some(err.to_string());
                }
            }
        }

        let state = gate.state.get_mut().clone();
        gate.persist(&state).await;
        gate
    }
}

/// Stateful admission control over cumulative same-period spend
pub struct BudgetGate {
    config: BudgetConfig,
    pricing: PricingTable,
    state: Mutex<BudgetState>,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    persist_timeout: Duration,
    recovery: RecoveryReport,
}

impl BudgetGate {
    /// Start building a gate with an in-memory store and the system clock
    pub fn builder(config: BudgetConfig) -> BudgetGateBuilder {
        BudgetGateBuilder {
            config,
            pricing: PricingTable::default(),
            store: Arc::new(MemorySnapshotStore::new()),
            clock: Arc::new(SystemClock),
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Copy of the live state, after applying any pending rollover
    pub async fn state(&self) -> BudgetState {
        let mut state = self.state.lock().await;
        self.rollover(&mut state).await;
        state.clone()
    }

    /// Decide whether a task may run.
    ///
    /// Limits are checked in order: units per task, cost per task, daily
    /// cost. Each denies only when strictly exceeded.
    pub async fn check_budget(
        &self,
        category: TaskCategory,
        resource: &str,
        estimated_units: u64,
    ) -> BudgetCheck {
        let mut state = self.state.lock().await;
        self.rollover(&mut state).await;

        let usage = Usage::from_estimate(estimated_units);
        let estimated_cost_usd = self.pricing.cost(resource, &usage);
        let spend = state.cumulative_spend_usd;
        let projected = spend + estimated_cost_usd;

        let mut check = BudgetCheck {
            allowed: true,
            estimated_cost_usd,
            estimated_units,
            reason: None,
            denial: None,
            warnings: Vec::new(),
            cumulative_spend_usd: spend,
            projected_spend_usd: projected,
        };

        let denial = if estimated_units > self.config.max_units_per_task {
            Some((
                DenialKind::UnitsPerTask,
                format!(
                    "Task would exceed max_units_per_task ({}). Estimated: {}",
                    self.config.max_units_per_task, estimated_units
                ),
            ))
        } else if estimated_cost_usd > self.config.max_cost_per_task_usd {
            Some((
                DenialKind::CostPerTask,
                format!(
                    "Task would exceed max_cost_per_task_usd (${}). Estimated: ${:.4}",
                    self.config.max_cost_per_task_usd, estimated_cost_usd
                ),
            ))
        } else if projected > self.config.max_daily_cost_usd {
            Some((
                DenialKind::DailyCost,
                format!(
                    "Would exceed max_daily_cost_usd (${}). Current: ${:.2}, Estimated task: ${:.4}",
                    self.config.max_daily_cost_usd, spend, estimated_cost_usd
                ),
            ))
        } else {
            None
        };

        if let Some((kind, reason)) = denial {
            warn!(
                %category,
                resource,
                estimated_units,
                estimated_cost_usd,
                limit = %kind,
                on_exceed = %self.config.on_exceed,
                "Budget denied: {}",
                reason
            );
            check.allowed = false;
            check.denial = Some(kind);
            check.reason = Some(reason);
            return check;
        }

        let alerts = &self.config.alert_thresholds;
        if estimated_cost_usd >= alerts.task_cost_usd {
            check.warnings.push(format!(
                "Task cost (${:.4}) exceeds alert threshold (${})",
                estimated_cost_usd, alerts.task_cost_usd
            ));
        }
        if projected >= alerts.daily_cost_usd {
            check.warnings.push(format!(
                "Daily spend would reach ${:.2} (threshold: ${})",
                projected, alerts.daily_cost_usd
            ));
        }

        debug!(
            %category,
            resource,
            estimated_units,
            estimated_cost_usd,
            projected_spend_usd = projected,
            warnings = check.warnings.len(),
            "Budget check passed"
        );
        check
    }

    /// Add the actual cost of a completed task and persist.
    ///
    /// Call once per completed task. Returns the new cumulative spend.
    pub async fn record_spend(&self, actual_cost_usd: f64) -> f64 {
        let mut state = self.state.lock().await;
        self.rollover(&mut state).await;

        if !actual_cost_usd.is_finite() || actual_cost_usd < 0.0 {
            warn!(actual_cost_usd, "Ignoring invalid spend amount");
            return state.cumulative_spend_usd;
        }

        state.cumulative_spend_usd += actual_cost_usd;
        debug!(
            actual_cost_usd,
            cumulative_spend_usd = state.cumulative_spend_usd,
            "Recorded spend"
        );
        self.persist(&state).await;
        state.cumulative_spend_usd
    }

    pub async fn status(&self) -> BudgetStatus {
        let state = self.state().await;
        let limit = self.config.max_daily_cost_usd;
        let spend = state.cumulative_spend_usd;
        let percent_used = if limit > 0.0 {
            spend / limit * 100.0
        } else if spend > 0.0 {
            100.0
        } else {
            0.0
        };

        BudgetStatus {
            period_key: state.period_key,
            cumulative_spend_usd: spend,
            daily_limit: limit,
            remaining: (limit - spend).max(0.0),
            percent_used,
            limits: BudgetLimits {
                max_units_per_task: self.config.max_units_per_task,
                max_cost_per_task_usd: self.config.max_cost_per_task_usd,
                max_daily_cost_usd: limit,
            },
        }
    }

    /// Daily alerts that should make an operational check fail
    pub async fn threshold_alerts(&self) -> Vec<String> {
        let status = self.status().await;
        let threshold = self.config.alert_thresholds.daily_cost_usd;
        let mut alerts = Vec::new();

        if status.cumulative_spend_usd >= threshold {
            alerts.push(format!(
                "Daily spend (${:.2}) exceeds alert threshold (${})",
                status.cumulative_spend_usd, threshold
            ));
        }
        if status.cumulative_spend_usd >= status.daily_limit {
            alerts.push(format!(
                "BUDGET EXCEEDED! Daily spend (${:.2}) over limit (${})",
                status.cumulative_spend_usd, status.daily_limit
            ));
        }
        alerts
    }

    /// Zero the spend for the current period and persist
    pub async fn reset_daily(&self) {
        let mut state = self.state.lock().await;
        *state = BudgetState::fresh(self.clock.period_key());
        info!(period = %state.period_key, "Daily budget reset");
        self.persist(&state).await;
    }

    async fn rollover(&self, state: &mut BudgetState) {
        let today = self.clock.period_key();
        if state.period_key == today {
            return;
        }
        info!(
            from = %state.period_key,
            to = %today,
            closing_spend_usd = state.cumulative_spend_usd,
            "Budget period rolled over"
        );
        *state = BudgetState::fresh(today);
        self.persist(state).await;
    }

    // Persistence failure never rolls back in-memory spend.
    async fn persist(&self, state: &BudgetState) {
        let snapshot = state.snapshot(self.clock.now());
        let failure = match tokio::time::timeout(self.persist_timeout, self.store.save(&snapshot))
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.persist_timeout),
        };
        let err = AdmissionError::PersistFailure { message: failure };
        warn!(error = %err, "Continuing with in-memory budget state");
    }
}
