//! Admission engine
//!
//! Runs the full decision for one task: classify the text, select a
//! resource for the attempt, and ask the budget gate for approval. After
//! the task runs, [`AdmissionEngine::complete`] records actual spend and
//! appends an audit record.

use crate::audit::{AuditRecord, AuditSink, JsonlAuditSink, DEFAULT_AGENT_ID};
use crate::budget::gate::{BudgetCheck, BudgetGate};
use crate::budget::state::{
    Clock, JsonSnapshotStore, MemorySnapshotStore, SnapshotStore, SystemClock,
};
use crate::config::EngineConfig;
use crate::error::{AdmissionResult, RoutingError};
use crate::estimate::{CharCountEstimator, TokenEstimator};
use crate::pricing::Usage;
use crate::router::classifier::{classify, TaskCategory, TaskMeta};
use crate::router::policy::RoutingPolicy;
use crate::router::select::{select, FailureDescriptor, Selection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Resource name written to the audit log for tasks that used none
pub const NO_RESOURCE: &str = "none";

/// Supplies the size of context the surrounding system will attach to a task
pub trait ContextProvider: Send + Sync {
    fn context_units(&self, category: TaskCategory) -> u64;
}

/// Attaches no context
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn context_units(&self, _category: TaskCategory) -> u64 {
        0
    }
}

/// A task submitted for admission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub text: String,
    #[serde(default)]
    pub meta: TaskMeta,
    /// 0 for the first attempt
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub last_failure: Option<FailureDescriptor>,
    /// Caller's own usage estimate; estimated from the text when absent
    #[serde(default)]
    pub estimated_units: Option<u64>,
    /// Shared by every attempt at the same task
    #[serde(default)]
    pub task_id: Option<Uuid>,
}

impl TaskRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_meta(mut self, meta: TaskMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_estimate(mut self, units: u64) -> Self {
        self.estimated_units = Some(units);
        self
    }

    pub fn with_attempt(mut self, attempt: u32, last_failure: Option<FailureDescriptor>) -> Self {
        self.attempt = attempt;
        self.last_failure = last_failure;
        self
    }

    /// The same task, one attempt later, after `failure`
    pub fn retry(&self, admission: &Admission, failure: FailureDescriptor) -> Self {
        Self {
            attempt: admission.selection.attempt + 1,
            last_failure: Some(failure),
            task_id: Some(admission.task_id),
            ..self.clone()
        }
    }
}

/// An approved task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub task_id: Uuid,
    pub selection: Selection,
    /// `None` when the task needs no resource and skipped the gate
    pub check: Option<BudgetCheck>,
    pub trigger_source: Option<String>,
    pub session_key: Option<String>,
    pub admitted_at: DateTime<Utc>,
}

impl Admission {
    pub fn category(&self) -> TaskCategory {
        self.selection.category
    }

    pub fn resource(&self) -> Option<&str> {
        self.selection.resource.as_deref()
    }

    pub fn estimated_cost_usd(&self) -> f64 {
        self.check.as_ref().map_or(0.0, |c| c.estimated_cost_usd)
    }

    pub fn warnings(&self) -> &[String] {
        self.check
            .as_ref()
            .map(|c| c.warnings.as_slice())
            .unwrap_or_default()
    }
}

/// What actually happened when an admitted task ran
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Missing usage records zero cost
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub cache_read_units: u64,
    #[serde(default)]
    pub cache_write_units: u64,
    /// Measured from admission when absent
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

impl TaskOutcome {
    pub fn succeeded(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(usage: Option<Usage>, error: impl Into<String>) -> Self {
        Self {
            usage,
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_cache_units(mut self, read: u64, write: u64) -> Self {
        self.cache_read_units = read;
        self.cache_write_units = write;
        self
    }
}

/// Classify, route and admit tasks against one budget gate
pub struct AdmissionEngine {
    policy: RwLock<Arc<RoutingPolicy>>,
    gate: Arc<BudgetGate>,
    sink: Option<Arc<dyn AuditSink>>,
    context: Arc<dyn ContextProvider>,
    estimator: Box<dyn TokenEstimator>,
    clock: Arc<dyn Clock>,
}

impl AdmissionEngine {
    pub fn new(policy: RoutingPolicy, gate: Arc<BudgetGate>) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            gate,
            sink: None,
            context: Arc::new(NoContext),
            estimator: Box::new(CharCountEstimator::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    pub fn with_estimator(mut self, estimator: Box<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Clock used for audit timestamps; the gate keeps its own
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate a config and open the engine with file-backed storage
    pub async fn from_config(config: &EngineConfig) -> AdmissionResult<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn from_config_with_clock(
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> AdmissionResult<Self> {
        for warning in config.validate()? {
            warn!("Config: {}", warning);
        }

        let sink: Option<Arc<dyn AuditSink>> = config
            .audit_log_path
            .as_ref()
            .map(|path| Arc::new(JsonlAuditSink::new(path)) as Arc<dyn AuditSink>);
        let store: Arc<dyn SnapshotStore> = match &config.state_path {
            Some(path) => Arc::new(JsonSnapshotStore::new(path)),
            None => Arc::new(MemorySnapshotStore::new()),
        };

        let gate = BudgetGate::builder(config.budgets.clone())
            .pricing(config.pricing_table())
            .store(store)
            .clock(clock.clone())
            .persist_timeout(config.persist_timeout())
            .open(sink.as_deref())
            .await;

        let mut engine = Self::new(config.routing.clone(), Arc::new(gate))
            .with_clock(clock)
            .with_estimator(config.estimator.build());
        engine.sink = sink;
        Ok(engine)
    }

    /// Current policy. Each decision holds one snapshot for its whole run.
    pub fn policy(&self) -> Arc<RoutingPolicy> {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and swap in a new policy between decisions
    pub fn reload_policy(&self, policy: RoutingPolicy) -> AdmissionResult<Vec<String>> {
        let warnings = policy.validate()?;
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
        info!("Routing policy reloaded");
        Ok(warnings)
    }

    pub fn gate(&self) -> &BudgetGate {
        &self.gate
    }

    /// Classify and route without consulting the budget
    pub fn route(
        &self,
        text: &str,
        meta: &TaskMeta,
        attempt: u32,
        last_failure: Option<&FailureDescriptor>,
    ) -> Result<Selection, RoutingError> {
        let policy = self.policy();
        select(classify(text, meta), attempt, last_failure, &policy)
    }

    /// Units the gate is asked about for a request
    pub fn estimate_units(&self, request: &TaskRequest, category: TaskCategory) -> u64 {
        let base = request.estimated_units.unwrap_or_else(|| {
            let units = self.estimator.estimate(&request.text);
            debug!(estimator = self.estimator.name(), units, "Estimated task units");
            units
        });
        base.saturating_add(self.context.context_units(category))
    }

    /// Decide whether a task may run and on which resource
    pub async fn admit(&self, request: &TaskRequest) -> AdmissionResult<Admission> {
        let policy = self.policy();
        let category = classify(&request.text, &request.meta);
        let selection = select(
            category,
            request.attempt,
            request.last_failure.as_ref(),
            &policy,
        )?;

        let check = match selection.resource.as_deref() {
            Some(resource) => {
                let units = self.estimate_units(request, category);
                let check = self
                    .gate
                    .check_budget(category, resource, units)
                    .await
                    .into_result()?;
                Some(check)
            }
            None => None,
        };

        let admission = Admission {
            task_id: request.task_id.unwrap_or_else(Uuid::new_v4),
            selection,
            check,
            trigger_source: request.meta.trigger_source.clone(),
            session_key: request.meta.session_key.clone(),
            admitted_at: self.clock.now(),
        };

        info!(
            task_id = %admission.task_id,
            %category,
            tier = %admission.selection.tier,
            resource = admission.resource().unwrap_or(NO_RESOURCE),
            attempt = admission.selection.attempt,
            escalated = admission.selection.escalated,
            estimated_cost_usd = admission.estimated_cost_usd(),
            "Task admitted"
        );
        for warning in admission.warnings() {
            warn!(task_id = %admission.task_id, "Budget alert: {}", warning);
        }

        Ok(admission)
    }

    /// Record actual spend for a finished task and append its audit record.
    ///
    /// Call exactly once per admitted attempt. Sink failures are logged,
    /// not returned.
    pub async fn complete(&self, admission: &Admission, outcome: TaskOutcome) -> AuditRecord {
        let usage = outcome.usage.map(Usage::normalized).unwrap_or_default();
        let resource = admission.resource().unwrap_or(NO_RESOURCE).to_string();

        let cost = match admission.resource() {
            Some(resource) => {
                let cost = self.gate.pricing().cost(resource, &usage);
                self.gate.record_spend(cost).await;
                cost
            }
            None => 0.0,
        };

        let now = self.clock.now();
        let duration_ms = outcome.duration_ms.unwrap_or_else(|| {
            (now - admission.admitted_at).num_milliseconds().max(0) as u64
        });

        let record = AuditRecord {
            timestamp: now,
            trigger_source: admission
                .trigger_source
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            task_category: admission.category(),
            resource,
            usage,
            cache_read_tokens: outcome.cache_read_units,
            cache_write_tokens: outcome.cache_write_units,
            estimated_cost_usd: cost,
            duration_ms,
            session_key: admission
                .session_key
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            agent_id: outcome
                .agent_id
                .unwrap_or_else(|| DEFAULT_AGENT_ID.to_string()),
            success: outcome.success,
            error_message: outcome.error,
            escalated: admission.selection.escalated,
            attempt_number: admission.selection.attempt,
            task_id: Some(admission.task_id),
        };

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&record).await {
                warn!(task_id = %admission.task_id, error = %e, "Failed to append audit record");
            }
        }

        record
    }
}
