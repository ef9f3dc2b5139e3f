//! Task records: identity, routing labels, lifecycle status.
//!
//! A task is a unit of work routed by (category, phase, bucket). Its record
//! in the ledger is the single source of truth for status; the bucket is
//! always derived from the current priority.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::priority::{Bucket, Priority};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable task identifier. Survives upgrades and re-dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 chars of the UUID, for tables and log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|_| Error::InvalidLabel {
            kind: "task id",
            value: s.to_string(),
        })
    }
}

/// Groups every phase of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CorrelationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|_| Error::InvalidLabel {
            kind: "correlation id",
            value: s.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Routing labels
// ---------------------------------------------------------------------------

/// Business domain of a task. Adding a category means adding a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Etl,
    Webapp,
    Report,
    Alert,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Etl,
        Category::Webapp,
        Category::Report,
        Category::Alert,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Etl => "etl",
            Category::Webapp => "webapp",
            Category::Report => "report",
            Category::Alert => "alert",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::InvalidLabel {
                kind: "category",
                value: s.to_string(),
            })
    }
}

/// Stage within a category's pipeline. `Default` is used for unphased tasks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Default,
    Extract,
    Transform,
    Load,
    Render,
    Deliver,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Default,
        Phase::Extract,
        Phase::Transform,
        Phase::Load,
        Phase::Render,
        Phase::Deliver,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Default => "default",
            Phase::Extract => "extract",
            Phase::Transform => "transform",
            Phase::Load => "load",
            Phase::Render => "render",
            Phase::Deliver => "deliver",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::InvalidLabel {
                kind: "phase",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Published, waiting for a worker.
    Queued,
    /// Superseded by an upgrade, about to be re-queued at the new priority.
    Upgraded,
    /// Claimed by a worker and executing.
    Running,
    /// Done successfully. Terminal.
    Completed,
    /// Task body returned an error. Terminal.
    Failed,
    /// Cancelled while queued. Terminal.
    Cancelled,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Queued, Upgraded)
                | (Upgraded, Queued)    // re-dispatch at the new priority
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Upgraded => "upgraded",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Status::Queued),
            "upgraded" => Ok(Status::Upgraded),
            "running" => Ok(Status::Running),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            "cancelled" => Ok(Status::Cancelled),
            other => Err(Error::InvalidLabel {
                kind: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Validate a status transition, returning an error if disallowed.
pub fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Task Record
// ---------------------------------------------------------------------------

/// The ledger's record of one logical task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,

    /// Handler identifier. Resolved by the worker's handler registry.
    pub task_name: String,

    pub category: Category,
    pub phase: Phase,

    /// Only changed through the upgrade protocol.
    pub priority: Priority,

    pub status: Status,
    pub correlation_id: CorrelationId,

    /// Opaque payload for the task body.
    pub args: serde_json::Value,

    /// Bumped on every re-dispatch. Messages carry the generation they were
    /// published with; a claim only succeeds against the current one.
    pub generation: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
}

impl TaskRecord {
    /// Always derived from the current priority.
    pub fn bucket(&self) -> Bucket {
        self.priority.bucket()
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of task execution, stored with the record on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    /// Whatever the task body returned. Opaque to the core.
    pub data: Option<serde_json::Value>,
    /// Error detail if failed or cancelled.
    pub error: Option<String>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a task submission. Priority is validated by the dispatcher.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) task_name: String,
    pub(crate) category: Category,
    pub(crate) phase: Phase,
    pub(crate) priority: i32,
    pub(crate) correlation_id: Option<CorrelationId>,
    pub(crate) args: serde_json::Value,
}

impl NewTask {
    pub fn new(task_name: impl Into<String>, category: Category) -> Self {
        Self {
            task_name: task_name.into(),
            category,
            phase: Phase::Default,
            priority: i32::from(Priority::DEFAULT),
            correlation_id: None,
            args: serde_json::Value::Null,
        }
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }
}
