//! Dispatcher: validate, record, publish.
//!
//! The ledger write always precedes the publish, so a crash in between
//! leaves an observable `queued` record that no worker ever saw rather
//! than a silently lost task.

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::retry::with_backoff;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::model::{CorrelationId, NewTask, Priority, Status, TaskId, TaskRecord};
use crate::telemetry::metrics;
use crate::transport::{Address, Labels, Message, Transport};

/// Message body published for every dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub task_id: TaskId,
    /// Record generation at publish time. Claims against any other
    /// generation are stale.
    pub generation: u32,
    pub task_name: String,
    pub args: serde_json::Value,
}

impl DispatchPayload {
    pub fn from_message(message: &Message) -> Result<Self> {
        serde_json::from_value(message.payload.clone())
            .map_err(|e| Error::BadPayload(format!("message {}: {e}", message.id)))
    }
}

impl From<&TaskRecord> for DispatchPayload {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            generation: record.generation,
            task_name: record.task_name.clone(),
            args: record.args.clone(),
        }
    }
}

/// Full label set published with a record.
pub fn labels_for(record: &TaskRecord) -> Labels {
    Labels::from([
        ("task_id".to_string(), record.task_id.to_string()),
        ("category".to_string(), record.category.to_string()),
        ("phase".to_string(), record.phase.to_string()),
        ("priority".to_string(), record.priority.to_string()),
        ("bucket".to_string(), record.bucket().to_string()),
        ("correlation_id".to_string(), record.correlation_id.to_string()),
    ])
}

/// Accepts submissions and hands them to the transport.
#[derive(Clone)]
pub struct Dispatcher {
    ledger: Arc<dyn Ledger>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(ledger: Arc<dyn Ledger>, transport: Arc<dyn Transport>) -> Self {
        Self { ledger, transport }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Submit a new task. Returns its id without waiting for execution.
    ///
    /// Fails with `InvalidPriority` before touching the ledger when the
    /// priority is outside `[0, 10]`.
    pub async fn submit(&self, new: NewTask) -> Result<TaskId> {
        let priority = Priority::new(new.priority)?;
        let now = Utc::now();

        let record = TaskRecord {
            task_id: TaskId::new(),
            task_name: new.task_name,
            category: new.category,
            phase: new.phase,
            priority,
            status: Status::Queued,
            correlation_id: new.correlation_id.unwrap_or_default(),
            args: new.args,
            generation: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            outcome: None,
        };

        self.ledger.insert(&record).await?;
        let published = self.publish(&record).await;

        metrics::tasks_submitted().add(
            1,
            &[
                KeyValue::new("category", record.category.as_str()),
                KeyValue::new("bucket", record.bucket().as_str()),
                KeyValue::new("result", if published.is_ok() { "ok" } else { "error" }),
            ],
        );
        published?;

        info!(
            task_id = %record.task_id,
            task_name = %record.task_name,
            category = %record.category,
            phase = %record.phase,
            priority = %record.priority,
            correlation_id = %record.correlation_id,
            "task submitted"
        );
        Ok(record.task_id)
    }

    /// Re-queue an upgraded task at `priority` under its original id and
    /// publish it at the new bucket's address.
    ///
    /// Once the requeue commits, every earlier message is stale, so the
    /// publish is retried with backoff. If it still fails the record is left
    /// `queued` with no live message; `republish` recovers it.
    pub async fn redispatch(&self, task_id: TaskId, priority: Priority) -> Result<TaskRecord> {
        let record = self.ledger.requeue(task_id, priority).await?;
        with_backoff("re-dispatch publish", || self.publish(&record)).await?;
        info!(
            task_id = %record.task_id,
            priority = %record.priority,
            bucket = %record.bucket(),
            generation = record.generation,
            "task re-dispatched"
        );
        Ok(record)
    }

    /// Publish a `queued` record again at its current generation.
    ///
    /// Safe to repeat: claims compare generations, so at most one copy of a
    /// generation ever starts the task.
    pub async fn republish(&self, task_id: TaskId) -> Result<TaskRecord> {
        let record = self.ledger.get(task_id).await?;
        if record.status != Status::Queued {
            return Err(Error::TaskNotQueueable {
                task_id: task_id.to_string(),
                status: record.status.to_string(),
            });
        }
        with_backoff("republish", || self.publish(&record)).await?;
        info!(
            task_id = %record.task_id,
            bucket = %record.bucket(),
            generation = record.generation,
            "task re-published"
        );
        Ok(record)
    }

    /// Start of a pipeline run: same as `submit`, with a fresh correlation id
    /// returned alongside the task id.
    pub async fn submit_run(&self, new: NewTask) -> Result<(TaskId, CorrelationId)> {
        let correlation_id = new.correlation_id.unwrap_or_default();
        let task_id = self.submit(new.correlation_id(correlation_id)).await?;
        Ok((task_id, correlation_id))
    }

    async fn publish(&self, record: &TaskRecord) -> Result<i64> {
        let address = Address::new(record.category, record.phase, record.bucket());
        let payload = serde_json::to_value(DispatchPayload::from(record))?;

        self.transport
            .publish(&address, &payload, &labels_for(record))
            .await
            .inspect_err(|e| {
                warn!(
                    task_id = %record.task_id,
                    %address,
                    "task recorded as queued but not published: {e}"
                );
            })
    }
}
