//! Dispatch engine: submission, priority workers, upgrades, pipeline chaining.

pub mod chain;
pub mod dispatch;
mod retry;
pub mod upgrade;
pub mod worker;

pub use chain::{PhaseCompletion, PipelineChainer};
pub use dispatch::{DispatchPayload, Dispatcher};
pub use upgrade::{UpgradeCoordinator, UpgradePolicy, UpgradeRequest, Upgraded};
pub use worker::{PollOutcome, PriorityWorker, WorkerConfig};
