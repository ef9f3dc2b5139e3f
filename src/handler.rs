//! Task bodies and the registry workers resolve them from.
//!
//! A task body takes the task's context (including its deserialized args)
//! and returns a JSON value or an error. The core never looks inside either.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::model::{Category, CorrelationId, Phase, Priority, TaskId, TaskRecord};
use crate::pipeline::PipelineRegistry;

/// What a task body gets to see.
#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_name: String,
    pub category: Category,
    pub phase: Phase,
    pub priority: Priority,
    pub correlation_id: CorrelationId,
    pub args: serde_json::Value,
}

impl From<&TaskRecord> for TaskContext {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            task_name: record.task_name.clone(),
            category: record.category,
            phase: record.phase,
            priority: record.priority,
            correlation_id: record.correlation_id,
            args: record.args.clone(),
        }
    }
}

/// An executable task body.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<serde_json::Value>;
}

/// Adapter for async closures.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<serde_json::Value> {
        (self.f)(ctx.clone()).await
    }
}

// ---------------------------------------------------------------------------
// External commands
// ---------------------------------------------------------------------------

/// Runs an executable as the task body.
///
/// The task context is written to stdin as JSON; stdout is parsed as the
/// JSON result (empty stdout means `null`). A non-zero exit is a failure.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    command: PathBuf,
}

impl CommandHandler {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn resolved_command(&self) -> std::io::Result<PathBuf> {
        if self.command.is_relative() {
            Ok(std::env::current_dir()?.join(&self.command))
        } else {
            Ok(self.command.clone())
        }
    }
}

#[async_trait]
impl TaskHandler for CommandHandler {
    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<serde_json::Value> {
        let command = self.resolved_command()?;
        debug!(
            task_id = %ctx.task_id,
            command = %command.display(),
            "running task command"
        );

        let mut child = Command::new(&command)
            .env("LANEQ_TASK_ID", ctx.task_id.to_string())
            .env("LANEQ_TASK_NAME", &ctx.task_name)
            .env("LANEQ_CATEGORY", ctx.category.as_str())
            .env("LANEQ_PHASE", ctx.phase.as_str())
            .env("LANEQ_PRIORITY", ctx.priority.to_string())
            .env("LANEQ_CORRELATION_ID", ctx.correlation_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin concurrently with draining stdout/stderr; a child that
        // writes before reading would otherwise block on a full pipe.
        let input = serde_json::to_vec(ctx)?;
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                match stdin.write_all(&input).await {
                    // The child may exit without reading its input.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
            })
        });

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            writer.await??;
        }
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with status {}: {}",
                command.display(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            Ok(serde_json::Value::Null)
        } else {
            Ok(serde_json::from_str(stdout.trim())?)
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Task bodies indexed by task name.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_name.into(), handler);
    }

    pub fn register_fn<F, Fut>(&mut self, task_name: impl Into<String>, f: F)
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.register(task_name, Arc::new(FnHandler { f }));
    }

    /// Register a `CommandHandler` for every pipeline phase that names a
    /// command. Relative commands resolve against `base_dir`.
    pub fn from_pipelines(pipelines: &PipelineRegistry, base_dir: &Path) -> Self {
        let mut registry = Self::new();
        for pipeline in pipelines.iter() {
            for step in &pipeline.phases {
                if let Some(ref command) = step.command {
                    let command = if command.is_relative() {
                        base_dir.join(command)
                    } else {
                        command.clone()
                    };
                    registry.register(step.task.clone(), Arc::new(CommandHandler::new(command)));
                }
            }
        }
        registry
    }

    pub fn get(&self, task_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
