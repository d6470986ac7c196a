//! Tiergate: routing and admission control for priced model tiers
//!
//! Decides which resource tier handles a task and whether the task may run
//! at all given its projected cost. Nothing here calls a model.
//!
//! # Flow
//!
//! ```text
//! text + meta ──► classify ──► TaskCategory
//!                                  │
//!            attempt, last failure ┤
//!                                  ▼
//!                            select (RoutingPolicy) ──► resource or none
//!                                  │
//!                 estimated units  ▼
//!                            BudgetGate::check_budget ──► allowed / denied
//!                                  │
//!                    actual usage  ▼
//!                            record_spend + AuditSink::append
//! ```
//!
//! [`engine::AdmissionEngine`] wires these steps together.

pub mod audit;
pub mod budget;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod pricing;
pub mod router;

pub use audit::{AuditRecord, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use budget::{BudgetCheck, BudgetConfig, BudgetGate, BudgetStatus};
pub use config::EngineConfig;
pub use engine::{Admission, AdmissionEngine, ContextProvider, NoContext, TaskOutcome, TaskRequest};
pub use error::{AdmissionError, AdmissionResult, ErrorClass, RoutingError};
pub use pricing::{ModelPricing, PricingTable, Usage};
pub use router::{
    classify, select, select_resource, FailureDescriptor, FailureKind, ResourceTier,
    RoutingPolicy, TaskCategory, TaskMeta,
};
