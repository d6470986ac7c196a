//! Budget enforcement
//!
//! A task must pass the [`BudgetGate`] before it consumes a resource.
//! Spend is tracked per UTC day, persisted as a snapshot, and rebuilt
//! from the audit sink when no snapshot exists for the current day.

pub mod config;
pub mod gate;
pub mod state;

pub use config::{AlertThresholds, BudgetConfig, OnExceed};
pub use gate::{
    BudgetCheck, BudgetGate, BudgetGateBuilder, BudgetHealth, BudgetLimits, BudgetStatus,
    RecoveryReport, RecoverySource, DEFAULT_PERSIST_TIMEOUT,
};
pub use state::{
    period_key, BudgetSnapshot, BudgetState, Clock, JsonSnapshotStore, ManualClock,
    MemorySnapshotStore, SnapshotStore, SystemClock,
};
