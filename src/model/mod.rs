//! Core data model.
//!
//! Priorities and buckets, task records and their lifecycle, and the
//! append-only priority-change history.

pub mod history;
pub mod priority;
pub mod task;

pub use history::{NewPriorityChange, PriorityChange, UpgradeAction, UpgradeTarget};
pub use priority::{Bucket, Priority, classify};
pub use task::{
    Category, CorrelationId, NewTask, Outcome, Phase, Status, TaskId, TaskRecord,
    validate_transition,
};
