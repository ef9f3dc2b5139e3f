//! Metric instrument factories for laneq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"laneq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for laneq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("laneq")
}

/// Counter: tasks submitted through the dispatcher.
/// Labels: `category`, `bucket`, `result` ("ok" | "error").
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("laneq.tasks.submitted")
        .with_description("Number of tasks submitted")
        .build()
}

/// Counter: task status transitions.
/// Labels: `from`, `to`.
pub fn task_status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("laneq.tasks.status_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: queue-level operations (create, send, read, archive).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("laneq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: dequeued messages discarded because the ledger moved on.
/// Labels: `category`, `phase`, `bucket`.
pub fn stale_claims() -> Counter<u64> {
    meter()
        .u64_counter("laneq.worker.stale_claims")
        .with_description("Dequeued messages discarded as stale")
        .build()
}

/// Counter: upgrade and cancel attempts.
/// Labels: `action`, `result` ("ok" | "denied" | "rejected").
pub fn priority_changes() -> Counter<u64> {
    meter()
        .u64_counter("laneq.tasks.priority_changes")
        .with_description("Number of upgrade and cancel attempts")
        .build()
}

/// Histogram: task body duration in milliseconds.
/// Labels: `category`, `phase`, `status`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("laneq.tasks.duration_ms")
        .with_description("Task execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
