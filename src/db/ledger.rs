//! Postgres audit ledger: task records and the priority-change history.
//!
//! Every status change is a conditional `UPDATE ... WHERE status = $expected`,
//! so concurrent actors across processes serialize on the row, not on an
//! application lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ledger::{Ledger, TaskFilter};
use crate::model::{
    CorrelationId, NewPriorityChange, Outcome, Priority, PriorityChange, Status, TaskId,
    TaskRecord, validate_transition,
};

const TASK_COLUMNS: &str = "task_id, task_name, category, phase, priority, status, correlation_id, args, generation, created_at, updated_at, started_at, finished_at, outcome_data, outcome_error, outcome_ms";

const CHANGE_COLUMNS: &str = "id, task_id, changed_at, from_priority, to_priority, from_bucket, to_bucket, action, reason, changed_by";

impl super::Db {
    async fn fetch_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM task_records WHERE task_id = $1");
        let row: Option<TaskRecordRow> = sqlx::query_as(&sql)
            .bind(task_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskRecordRow::try_into_record).transpose()
    }

    /// Guarded `running -> terminal` update shared by complete and fail.
    async fn finish(
        &self,
        task_id: TaskId,
        to: Status,
        outcome: &Outcome,
    ) -> Result<TaskRecord> {
        validate_transition(Status::Running, to)?;

        let sql = format!(
            "UPDATE task_records SET status = $1, updated_at = $2, finished_at = $2, outcome_data = $3, outcome_error = $4, outcome_ms = $5
             WHERE task_id = $6 AND status = 'running'
             RETURNING {TASK_COLUMNS}"
        );
        let row: Option<TaskRecordRow> = sqlx::query_as(&sql)
            .bind(to.as_str())
            .bind(Utc::now())
            .bind(&outcome.data)
            .bind(&outcome.error)
            .bind(outcome.duration_ms as i64)
            .bind(task_id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into_record(),
            None => {
                let current = self.get(task_id).await?;
                Err(Error::InvalidTransition {
                    from: current.status.to_string(),
                    to: to.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl Ledger for super::Db {
    async fn insert(&self, record: &TaskRecord) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO task_records (task_id, task_name, category, phase, priority, status, correlation_id, args, generation, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (task_id) DO NOTHING",
        )
        .bind(record.task_id.0)
        .bind(&record.task_name)
        .bind(record.category.as_str())
        .bind(record.phase.as_str())
        .bind(i16::from(record.priority.value()))
        .bind(record.status.as_str())
        .bind(record.correlation_id.0)
        .bind(&record.args)
        .bind(record.generation as i32)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(Error::DuplicateTask(record.task_id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<TaskRecord> {
        self.fetch_task(task_id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    async fn mark_upgraded(
        &self,
        generation: u32,
        change: NewPriorityChange,
    ) -> Result<PriorityChange> {
        let mut tx = self.pool.begin().await?;
        let task_id = change.task_id;

        let rows_affected = sqlx::query(
            "UPDATE task_records SET status = 'upgraded', updated_at = now()
             WHERE task_id = $1 AND status = 'queued' AND generation = $2",
        )
        .bind(task_id.0)
        .bind(generation as i32)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.rollback().await?;
            let current = self.get(task_id).await?;
            return Err(Error::TaskNotQueueable {
                task_id: task_id.to_string(),
                status: current.status.to_string(),
            });
        }

        // changed_at is strictly increasing per task even under clock skew
        // between writers.
        let sql = format!(
            "INSERT INTO priority_changes (task_id, changed_at, from_priority, to_priority, from_bucket, to_bucket, action, reason, changed_by)
             VALUES ($1,
                     GREATEST(clock_timestamp(),
                              COALESCE((SELECT max(changed_at) FROM priority_changes WHERE task_id = $1), '-infinity') + interval '1 microsecond'),
                     $2, $3, $4, $5, $6, $7, $8)
             RETURNING {CHANGE_COLUMNS}"
        );
        let row: PriorityChangeRow = sqlx::query_as(&sql)
            .bind(task_id.0)
            .bind(i16::from(change.from_priority.value()))
            .bind(i16::from(change.to_priority.value()))
            .bind(change.from_priority.bucket().as_str())
            .bind(change.to_priority.bucket().as_str())
            .bind(change.action.as_str())
            .bind(&change.reason)
            .bind(&change.changed_by)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        row.try_into_change()
    }

    async fn requeue(&self, task_id: TaskId, priority: Priority) -> Result<TaskRecord> {
        validate_transition(Status::Upgraded, Status::Queued)?;

        let sql = format!(
            "UPDATE task_records SET status = 'queued', priority = $1, generation = generation + 1, updated_at = now()
             WHERE task_id = $2 AND status = 'upgraded'
             RETURNING {TASK_COLUMNS}"
        );
        let row: Option<TaskRecordRow> = sqlx::query_as(&sql)
            .bind(i16::from(priority.value()))
            .bind(task_id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into_record(),
            None => {
                let current = self.get(task_id).await?;
                Err(Error::InvalidTransition {
                    from: current.status.to_string(),
                    to: Status::Queued.to_string(),
                })
            }
        }
    }

    async fn claim(&self, task_id: TaskId, generation: u32) -> Result<Option<TaskRecord>> {
        let sql = format!(
            "UPDATE task_records SET status = 'running', started_at = now(), updated_at = now()
             WHERE task_id = $1 AND status = 'queued' AND generation = $2
             RETURNING {TASK_COLUMNS}"
        );
        let row: Option<TaskRecordRow> = sqlx::query_as(&sql)
            .bind(task_id.0)
            .bind(generation as i32)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into_record().map(Some),
            None => {
                // Distinguish a stale claim from a message for an unknown task.
                self.get(task_id).await?;
                Ok(None)
            }
        }
    }

    async fn complete(&self, task_id: TaskId, outcome: Outcome) -> Result<TaskRecord> {
        self.finish(task_id, Status::Completed, &outcome).await
    }

    async fn fail(&self, task_id: TaskId, error: &str, duration_ms: u64) -> Result<TaskRecord> {
        let outcome = Outcome {
            success: false,
            data: None,
            error: Some(error.to_string()),
            duration_ms,
        };
        self.finish(task_id, Status::Failed, &outcome).await
    }

    async fn cancel(&self, task_id: TaskId, reason: &str) -> Result<TaskRecord> {
        let sql = format!(
            "UPDATE task_records SET status = 'cancelled', updated_at = now(), finished_at = now(), outcome_error = $1, outcome_ms = 0
             WHERE task_id = $2 AND status = 'queued'
             RETURNING {TASK_COLUMNS}"
        );
        let row: Option<TaskRecordRow> = sqlx::query_as(&sql)
            .bind(reason)
            .bind(task_id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into_record(),
            None => {
                let current = self.get(task_id).await?;
                Err(Error::TaskNotQueueable {
                    task_id: task_id.to_string(),
                    status: current.status.to_string(),
                })
            }
        }
    }

    async fn history(&self, task_id: TaskId) -> Result<Vec<PriorityChange>> {
        let sql = format!(
            "SELECT {CHANGE_COLUMNS} FROM priority_changes WHERE task_id = $1 ORDER BY changed_at, id"
        );
        let rows: Vec<PriorityChangeRow> = sqlx::query_as(&sql)
            .bind(task_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(PriorityChangeRow::try_into_change)
            .collect()
    }

    async fn history_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PriorityChange>> {
        let sql = format!(
            "SELECT {CHANGE_COLUMNS} FROM priority_changes
             WHERE changed_at >= $1 AND changed_at < $2
             ORDER BY changed_at, id"
        );
        let rows: Vec<PriorityChangeRow> = sqlx::query_as(&sql)
            .bind(since)
            .bind(until)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(PriorityChangeRow::try_into_change)
            .collect()
    }

    async fn by_correlation(&self, correlation_id: CorrelationId) -> Result<Vec<TaskRecord>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM task_records WHERE correlation_id = $1 ORDER BY created_at"
        );
        let rows: Vec<TaskRecordRow> = sqlx::query_as(&sql)
            .bind(correlation_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(TaskRecordRow::try_into_record)
            .collect()
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM task_records
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR category = $2)
             ORDER BY created_at DESC
             LIMIT $3"
        );
        let rows: Vec<TaskRecordRow> = sqlx::query_as(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.category.map(|c| c.as_str()))
            .bind(filter.limit.map_or(i64::MAX, |n| n as i64))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(TaskRecordRow::try_into_record)
            .collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRecordRow {
    task_id: Uuid,
    task_name: String,
    category: String,
    phase: String,
    priority: i16,
    status: String,
    correlation_id: Uuid,
    args: serde_json::Value,
    generation: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    outcome_data: Option<serde_json::Value>,
    outcome_error: Option<String>,
    outcome_ms: Option<i64>,
}

impl TaskRecordRow {
    fn try_into_record(self) -> Result<TaskRecord> {
        let status: Status = self.status.parse()?;
        let outcome = if self.outcome_data.is_some() || self.outcome_error.is_some() {
            Some(Outcome {
                success: status == Status::Completed,
                data: self.outcome_data,
                error: self.outcome_error,
                duration_ms: self.outcome_ms.unwrap_or(0) as u64,
            })
        } else {
            None
        };

        Ok(TaskRecord {
            task_id: TaskId(self.task_id),
            task_name: self.task_name,
            category: self.category.parse()?,
            phase: self.phase.parse()?,
            priority: Priority::new(i32::from(self.priority))?,
            status,
            correlation_id: CorrelationId(self.correlation_id),
            args: self.args,
            generation: self.generation as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            outcome,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PriorityChangeRow {
    id: i64,
    task_id: Uuid,
    changed_at: DateTime<Utc>,
    from_priority: i16,
    to_priority: i16,
    from_bucket: String,
    to_bucket: String,
    action: String,
    reason: String,
    changed_by: String,
}

impl PriorityChangeRow {
    fn try_into_change(self) -> Result<PriorityChange> {
        Ok(PriorityChange {
            id: self.id,
            task_id: TaskId(self.task_id),
            changed_at: self.changed_at,
            from_priority: Priority::new(i32::from(self.from_priority))?,
            to_priority: Priority::new(i32::from(self.to_priority))?,
            from_bucket: self.from_bucket.parse()?,
            to_bucket: self.to_bucket.parse()?,
            action: self.action.parse()?,
            reason: self.reason,
            changed_by: self.changed_by,
        })
    }
}
