//! Priority-change history. Append-only; one record per upgrade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::priority::{Bucket, Priority};
use super::task::TaskId;
use crate::error::{Error, Result};

/// Named upgrade action class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeAction {
    /// Raise to 8.
    Prioritize,
    /// Raise to 9.
    Urgent,
    /// Raise to 10.
    Critical,
    /// Explicit numeric target.
    Custom,
}

impl UpgradeAction {
    /// Fixed target priority of a named action. `Custom` has none.
    pub fn target_priority(self) -> Option<Priority> {
        let value = match self {
            UpgradeAction::Prioritize => 8,
            UpgradeAction::Urgent => 9,
            UpgradeAction::Critical => 10,
            UpgradeAction::Custom => return None,
        };
        Priority::new(value).ok()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpgradeAction::Prioritize => "prioritize",
            UpgradeAction::Urgent => "urgent",
            UpgradeAction::Critical => "critical",
            UpgradeAction::Custom => "custom",
        }
    }
}

impl std::fmt::Display for UpgradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpgradeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prioritize" => Ok(UpgradeAction::Prioritize),
            "urgent" => Ok(UpgradeAction::Urgent),
            "critical" => Ok(UpgradeAction::Critical),
            "custom" => Ok(UpgradeAction::Custom),
            other => Err(Error::InvalidLabel {
                kind: "upgrade action",
                value: other.to_string(),
            }),
        }
    }
}

/// What an upgrade asks for: a named action or a raw priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeTarget {
    Action(UpgradeAction),
    Priority(i32),
}

impl UpgradeTarget {
    /// Resolve into the recorded action and a validated target priority.
    pub fn resolve(self) -> Result<(UpgradeAction, Priority)> {
        match self {
            UpgradeTarget::Action(action) => match action.target_priority() {
                Some(p) => Ok((action, p)),
                None => Err(Error::InvalidLabel {
                    kind: "upgrade action",
                    value: "custom action needs an explicit priority".to_string(),
                }),
            },
            UpgradeTarget::Priority(value) => Ok((UpgradeAction::Custom, Priority::new(value)?)),
        }
    }
}

/// An immutable entry in a task's priority trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityChange {
    /// Ledger-assigned sequence, breaks `changed_at` ties.
    pub id: i64,
    pub task_id: TaskId,
    pub changed_at: DateTime<Utc>,
    pub from_priority: Priority,
    pub to_priority: Priority,
    pub from_bucket: Bucket,
    pub to_bucket: Bucket,
    pub action: UpgradeAction,
    pub reason: String,
    /// Audit only. Authorization happened when the change was made.
    pub changed_by: String,
}

/// A priority change about to be appended. The ledger assigns `id` and
/// `changed_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPriorityChange {
    pub task_id: TaskId,
    pub from_priority: Priority,
    pub to_priority: Priority,
    pub action: UpgradeAction,
    pub reason: String,
    pub changed_by: String,
}

impl NewPriorityChange {
    /// Stamp the change with its ledger identity. Buckets are derived here.
    pub fn into_record(self, id: i64, changed_at: DateTime<Utc>) -> PriorityChange {
        PriorityChange {
            id,
            task_id: self.task_id,
            changed_at,
            from_bucket: self.from_priority.bucket(),
            to_bucket: self.to_priority.bucket(),
            from_priority: self.from_priority,
            to_priority: self.to_priority,
            action: self.action,
            reason: self.reason,
            changed_by: self.changed_by,
        }
    }
}
