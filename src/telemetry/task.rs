//! Task execution span helpers.
//!
//! Provides span creation and status-transition recording for tasks
//! flowing through a worker.

use tracing::Span;

use crate::model::{Bucket, Category, Phase, TaskId};

/// Start a span for one task execution.
///
/// The `task.status` field is declared empty and can be updated via
/// [`record_status_transition`].
pub fn start_task_span(category: Category, phase: Phase, bucket: Bucket, task_id: &TaskId) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.category" = category.as_str(),
        "task.phase" = phase.as_str(),
        "task.bucket" = bucket.as_str(),
        "task.id" = %task_id,
        "task.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the given span.
///
/// Emits a tracing `info` event scoped to the span and stores the new status
/// on its `task.status` field.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.record("task.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
