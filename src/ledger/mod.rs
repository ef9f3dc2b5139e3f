//! Audit ledger port.
//!
//! The ledger is the single source of truth for task status and the
//! append-only priority history. Every status change is a conditional
//! update on the expected current status, so concurrent dispatchers,
//! upgraders, and workers never need a shared lock.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    Category, CorrelationId, NewPriorityChange, Outcome, Priority, PriorityChange, Status, TaskId,
    TaskRecord,
};

/// Filter for listing task records. Newest first.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<Status>,
    pub category: Option<Category>,
    pub limit: Option<usize>,
}

/// Task lifecycle and priority-history store.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Store a freshly submitted record.
    ///
    /// Fails with `DuplicateTask` when the id already exists.
    async fn insert(&self, record: &TaskRecord) -> Result<()>;

    /// Point lookup. Fails with `TaskNotFound`.
    async fn get(&self, task_id: TaskId) -> Result<TaskRecord>;

    /// `queued -> upgraded`, conditional on `generation`, plus the history
    /// append, as one atomic step.
    ///
    /// Fails with `TaskNotQueueable` when the record is no longer queued at
    /// that generation; nothing is written in that case.
    async fn mark_upgraded(
        &self,
        generation: u32,
        change: NewPriorityChange,
    ) -> Result<PriorityChange>;

    /// `upgraded -> queued` at `priority`, bumping the generation.
    async fn requeue(&self, task_id: TaskId, priority: Priority) -> Result<TaskRecord>;

    /// `queued -> running`, conditional on `generation`.
    ///
    /// Returns `None` when the claim is stale: the record moved on since the
    /// message was published.
    async fn claim(&self, task_id: TaskId, generation: u32) -> Result<Option<TaskRecord>>;

    /// `running -> completed` with outcome data.
    async fn complete(&self, task_id: TaskId, outcome: Outcome) -> Result<TaskRecord>;

    /// `running -> failed` with error detail.
    async fn fail(&self, task_id: TaskId, error: &str, duration_ms: u64) -> Result<TaskRecord>;

    /// `queued -> cancelled`. Fails with `TaskNotQueueable` otherwise.
    async fn cancel(&self, task_id: TaskId, reason: &str) -> Result<TaskRecord>;

    /// Priority history of one task, oldest first.
    async fn history(&self, task_id: TaskId) -> Result<Vec<PriorityChange>>;

    /// Priority changes made in `[since, until)`, oldest first.
    async fn history_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PriorityChange>>;

    /// Every record of one pipeline run, oldest first.
    async fn by_correlation(&self, correlation_id: CorrelationId) -> Result<Vec<TaskRecord>>;

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>>;
}
