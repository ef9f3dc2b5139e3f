//! In-memory ledger for tests and embedded use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{Ledger, TaskFilter};
use crate::error::{Error, Result};
use crate::model::{
    CorrelationId, NewPriorityChange, Outcome, Priority, PriorityChange, Status, TaskId,
    TaskRecord, validate_transition,
};

/// Thread-safe in-memory ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

#[derive(Debug, Default)]
struct LedgerState {
    tasks: HashMap<TaskId, TaskRecord>,
    history: Vec<PriorityChange>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerState>> {
        self.state
            .read()
            .map_err(|e| Error::Other(format!("ledger lock poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, LedgerState>> {
        self.state
            .write()
            .map_err(|e| Error::Other(format!("ledger lock poisoned: {e}")))
    }
}

impl LedgerState {
    fn task_mut(&mut self, task_id: TaskId) -> Result<&mut TaskRecord> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Move a record from `from` to `to`, failing if it is elsewhere.
    fn transition(&mut self, task_id: TaskId, from: Status, to: Status) -> Result<&mut TaskRecord> {
        validate_transition(from, to)?;
        let record = self.task_mut(task_id)?;
        if record.status != from {
            return Err(Error::InvalidTransition {
                from: record.status.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        record.status = to;
        record.updated_at = now;
        if to.is_terminal() {
            record.finished_at = Some(now);
        }
        Ok(record)
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn insert(&self, record: &TaskRecord) -> Result<()> {
        let mut state = self.write()?;
        if state.tasks.contains_key(&record.task_id) {
            return Err(Error::DuplicateTask(record.task_id.to_string()));
        }
        state.tasks.insert(record.task_id, record.clone());
        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<TaskRecord> {
        self.read()?
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    async fn mark_upgraded(
        &self,
        generation: u32,
        change: NewPriorityChange,
    ) -> Result<PriorityChange> {
        let mut state = self.write()?;
        let task_id = change.task_id;

        let record = state.task_mut(task_id)?;
        if record.status != Status::Queued || record.generation != generation {
            return Err(Error::TaskNotQueueable {
                task_id: task_id.to_string(),
                status: record.status.to_string(),
            });
        }
        record.status = Status::Upgraded;
        record.updated_at = Utc::now();

        // changed_at is strictly increasing per task.
        let mut changed_at = Utc::now();
        if let Some(last) = state.history.iter().rev().find(|c| c.task_id == task_id)
            && changed_at <= last.changed_at
        {
            changed_at = last.changed_at + chrono::Duration::microseconds(1);
        }
        let id = state.history.len() as i64 + 1;
        let entry = change.into_record(id, changed_at);
        state.history.push(entry.clone());
        Ok(entry)
    }

    async fn requeue(&self, task_id: TaskId, priority: Priority) -> Result<TaskRecord> {
        let mut state = self.write()?;
        let record = state.transition(task_id, Status::Upgraded, Status::Queued)?;
        record.priority = priority;
        record.generation += 1;
        Ok(record.clone())
    }

    async fn claim(&self, task_id: TaskId, generation: u32) -> Result<Option<TaskRecord>> {
        let mut state = self.write()?;
        let record = state.task_mut(task_id)?;
        if record.status != Status::Queued || record.generation != generation {
            return Ok(None);
        }
        let now = Utc::now();
        record.status = Status::Running;
        record.started_at = Some(now);
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn complete(&self, task_id: TaskId, outcome: Outcome) -> Result<TaskRecord> {
        let mut state = self.write()?;
        let record = state.transition(task_id, Status::Running, Status::Completed)?;
        record.outcome = Some(outcome);
        Ok(record.clone())
    }

    async fn fail(&self, task_id: TaskId, error: &str, duration_ms: u64) -> Result<TaskRecord> {
        let mut state = self.write()?;
        let record = state.transition(task_id, Status::Running, Status::Failed)?;
        record.outcome = Some(Outcome {
            success: false,
            data: None,
            error: Some(error.to_string()),
            duration_ms,
        });
        Ok(record.clone())
    }

    async fn cancel(&self, task_id: TaskId, reason: &str) -> Result<TaskRecord> {
        let mut state = self.write()?;
        let current = state.task_mut(task_id)?.status;
        if current != Status::Queued {
            return Err(Error::TaskNotQueueable {
                task_id: task_id.to_string(),
                status: current.to_string(),
            });
        }
        let record = state.transition(task_id, Status::Queued, Status::Cancelled)?;
        record.outcome = Some(Outcome {
            success: false,
            data: None,
            error: Some(reason.to_string()),
            duration_ms: 0,
        });
        Ok(record.clone())
    }

    async fn history(&self, task_id: TaskId) -> Result<Vec<PriorityChange>> {
        Ok(self
            .read()?
            .history
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn history_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PriorityChange>> {
        let mut changes: Vec<PriorityChange> = self
            .read()?
            .history
            .iter()
            .filter(|c| c.changed_at >= since && c.changed_at < until)
            .cloned()
            .collect();
        changes.sort_by_key(|c| (c.changed_at, c.id));
        Ok(changes)
    }

    async fn by_correlation(&self, correlation_id: CorrelationId) -> Result<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> = self
            .read()?
            .tasks
            .values()
            .filter(|r| r.correlation_id == correlation_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> = self
            .read()?
            .tasks
            .values()
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .filter(|r| filter.category.is_none_or(|c| r.category == c))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}
