//! Task Router Module
//!
//! Classifies a task and routes it to a priced resource tier.
//!
//! # Default Routes
//!
//! ```text
//! Category   | Tier   | Escalation (validation / repeated tool error / uncertainty)
//! -----------|--------|-------------------------------------------------------------
//! heartbeat  | none   | never
//! file_ops   | cheap  | mid → high
//! extract    | cheap  | mid → high
//! summarize  | cheap  | mid → high
//! write      | mid    | high
//! code       | mid    | high
//! strategy   | high   | -
//! ```

pub mod classifier;
pub mod policy;
pub mod select;

pub use classifier::{classify, classify_value, classify_with_rule, TaskCategory, TaskMeta};
pub use policy::{EscalationTriggers, ResourceTier, RoutingPolicy};
pub use select::{
    effective_tier, select, select_resource, should_escalate, FailureDescriptor, FailureKind,
    Selection,
};
