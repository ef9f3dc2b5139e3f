//! Pipeline chainer: dispatch the next phase when one completes.
//!
//! Priority and correlation id carry forward unchanged, so an upgrade made
//! during one phase persists through the rest of the run.

use std::sync::Arc;
use tracing::{debug, info};

use super::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::model::{Category, CorrelationId, NewTask, Phase, Priority, TaskId, TaskRecord};
use crate::pipeline::PipelineRegistry;

/// Signal that one phase of a run has finished.
#[derive(Debug, Clone)]
pub struct PhaseCompletion {
    pub category: Category,
    pub phase: Phase,
    /// Output of the completed phase; becomes the next phase's args.
    pub data: serde_json::Value,
    pub priority: Priority,
    pub correlation_id: CorrelationId,
}

impl PhaseCompletion {
    pub fn from_record(record: &TaskRecord, data: serde_json::Value) -> Self {
        Self {
            category: record.category,
            phase: record.phase,
            data,
            priority: record.priority,
            correlation_id: record.correlation_id,
        }
    }
}

#[derive(Clone)]
pub struct PipelineChainer {
    dispatcher: Dispatcher,
    pipelines: Arc<PipelineRegistry>,
}

impl PipelineChainer {
    pub fn new(dispatcher: Dispatcher, pipelines: Arc<PipelineRegistry>) -> Self {
        Self {
            dispatcher,
            pipelines,
        }
    }

    /// Dispatch the first phase of `category`'s pipeline under a new
    /// correlation id.
    pub async fn start_run(
        &self,
        category: Category,
        args: serde_json::Value,
        priority: i32,
    ) -> Result<(TaskId, CorrelationId)> {
        let first = self
            .pipelines
            .get(category)
            .and_then(|p| p.first())
            .ok_or_else(|| Error::InvalidLabel {
                kind: "pipeline category",
                value: category.to_string(),
            })?;

        let (task_id, correlation_id) = self
            .dispatcher
            .submit_run(
                NewTask::new(first.task.clone(), category)
                    .phase(first.phase)
                    .priority(priority)
                    .args(args),
            )
            .await?;
        info!(%task_id, %correlation_id, %category, phase = %first.phase, "pipeline run started");
        Ok((task_id, correlation_id))
    }

    /// Dispatch the phase after `completion.phase`. Returns `None` when the
    /// completed phase was the last one, or the category has no pipeline.
    pub async fn phase_completed(&self, completion: PhaseCompletion) -> Result<Option<TaskId>> {
        let Some(next) = self
            .pipelines
            .get(completion.category)
            .and_then(|p| p.next_after(completion.phase))
        else {
            debug!(
                correlation_id = %completion.correlation_id,
                category = %completion.category,
                phase = %completion.phase,
                "no further phase"
            );
            return Ok(None);
        };

        let task_id = self
            .dispatcher
            .submit(
                NewTask::new(next.task.clone(), completion.category)
                    .phase(next.phase)
                    .priority(i32::from(completion.priority))
                    .correlation_id(completion.correlation_id)
                    .args(completion.data),
            )
            .await?;

        info!(
            %task_id,
            correlation_id = %completion.correlation_id,
            from_phase = %completion.phase,
            to_phase = %next.phase,
            priority = %completion.priority,
            "next phase dispatched"
        );
        Ok(Some(task_id))
    }
}
