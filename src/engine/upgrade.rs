//! Upgrade coordinator: re-prioritize or cancel a queued task.
//!
//! The transport cannot change a published message's priority, so an
//! upgrade is cancel-and-requeue:
//!
//! 1. `queued -> upgraded` plus the history append, conditional on the
//!    record's current generation (one ledger transaction).
//! 2. `upgraded -> queued` at the new priority with the generation bumped,
//!    then publish at the new bucket's address.
//!
//! The old message is left where it is. When a worker eventually dequeues
//! it, its generation no longer matches and the claim is discarded.

use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::{info, warn};

use super::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::model::{
    NewPriorityChange, PriorityChange, Status, TaskId, TaskRecord, UpgradeAction, UpgradeTarget,
};
use crate::rbac::{self, Actor, Permission, Rbac};
use crate::telemetry::metrics;

/// Whether upgrades may lower a task's priority.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradePolicy {
    pub allow_downgrade: bool,
}

/// One upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub task_id: TaskId,
    pub target: UpgradeTarget,
    pub reason: String,
    pub actor: Actor,
}

impl UpgradeRequest {
    pub fn action(task_id: TaskId, action: UpgradeAction, actor: Actor) -> Self {
        Self {
            task_id,
            target: UpgradeTarget::Action(action),
            reason: String::new(),
            actor,
        }
    }

    pub fn priority(task_id: TaskId, priority: i32, actor: Actor) -> Self {
        Self {
            task_id,
            target: UpgradeTarget::Priority(priority),
            reason: String::new(),
            actor,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Result of a successful upgrade.
#[derive(Debug, Clone)]
pub struct Upgraded {
    /// The appended history entry.
    pub change: PriorityChange,
    /// The re-queued record at its new priority.
    pub record: TaskRecord,
}

fn record_attempt(action: &'static str, result: &'static str) {
    metrics::priority_changes().add(
        1,
        &[
            KeyValue::new("action", action),
            KeyValue::new("result", result),
        ],
    );
}

fn record_transition(from: Status, to: Status) {
    metrics::task_status_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}

#[derive(Clone)]
pub struct UpgradeCoordinator {
    dispatcher: Dispatcher,
    rbac: Arc<dyn Rbac>,
    policy: UpgradePolicy,
}

impl UpgradeCoordinator {
    pub fn new(dispatcher: Dispatcher, rbac: Arc<dyn Rbac>, policy: UpgradePolicy) -> Self {
        Self {
            dispatcher,
            rbac,
            policy,
        }
    }

    /// Move a queued task to a new priority.
    ///
    /// Checks, in order: target validity (`InvalidPriority`), permission
    /// (`PermissionDenied`), existence (`TaskNotFound`), status
    /// (`TaskNotQueueable`), and the downgrade policy (`DowngradeRejected`).
    /// Any failure leaves the ledger untouched.
    pub async fn upgrade(&self, request: UpgradeRequest) -> Result<Upgraded> {
        let (action, to_priority) = request.target.resolve()?;
        let task_id = request.task_id;

        let permission = Permission::for_upgrade(action, to_priority);
        if let Err(e) = rbac::require(self.rbac.as_ref(), &request.actor, permission).await {
            record_attempt(action.as_str(), "denied");
            warn!(%task_id, actor = %request.actor, %permission, "upgrade denied");
            return Err(e);
        }

        let ledger = self.dispatcher.ledger();
        let current = ledger.get(task_id).await?;
        if current.status != Status::Queued {
            record_attempt(action.as_str(), "rejected");
            return Err(Error::TaskNotQueueable {
                task_id: task_id.to_string(),
                status: current.status.to_string(),
            });
        }
        if !self.policy.allow_downgrade && to_priority < current.priority {
            record_attempt(action.as_str(), "rejected");
            return Err(Error::DowngradeRejected {
                from: current.priority.value(),
                to: to_priority.value(),
            });
        }

        let change = ledger
            .mark_upgraded(
                current.generation,
                NewPriorityChange {
                    task_id,
                    from_priority: current.priority,
                    to_priority,
                    action,
                    reason: request.reason,
                    changed_by: request.actor.to_string(),
                },
            )
            .await
            .inspect_err(|_| record_attempt(action.as_str(), "rejected"))?;
        record_transition(Status::Queued, Status::Upgraded);

        let record = match self.dispatcher.redispatch(task_id, to_priority).await {
            Ok(record) => record,
            // A concurrent `resume` finished step (b) for us.
            Err(Error::InvalidTransition { .. }) => {
                let record = ledger.get(task_id).await?;
                if record.generation <= current.generation || record.priority != to_priority {
                    return Err(Error::Other(format!(
                        "task {task_id} changed during upgrade: now {} at priority {}",
                        record.status, record.priority
                    )));
                }
                record
            }
            Err(e) => return Err(e),
        };
        record_transition(Status::Upgraded, Status::Queued);
        record_attempt(action.as_str(), "ok");

        info!(
            %task_id,
            actor = %request.actor,
            %action,
            from_priority = %change.from_priority,
            to_priority = %change.to_priority,
            from_bucket = %change.from_bucket,
            to_bucket = %change.to_bucket,
            "task upgraded"
        );
        Ok(Upgraded { change, record })
    }

    /// Cancel a queued task. Running and finished tasks are rejected with
    /// `TaskNotQueueable`.
    pub async fn cancel(&self, task_id: TaskId, reason: &str, actor: &Actor) -> Result<TaskRecord> {
        if let Err(e) = rbac::require(self.rbac.as_ref(), actor, Permission::CancelTasks).await {
            record_attempt("cancel", "denied");
            warn!(%task_id, %actor, "cancel denied");
            return Err(e);
        }

        let ledger = self.dispatcher.ledger();
        // Surfaces TaskNotFound before attempting the transition.
        ledger.get(task_id).await?;

        let detail = if reason.is_empty() {
            format!("cancelled by {actor}")
        } else {
            format!("cancelled by {actor}: {reason}")
        };
        let record = ledger
            .cancel(task_id, &detail)
            .await
            .inspect_err(|_| record_attempt("cancel", "rejected"))?;
        record_transition(Status::Queued, Status::Cancelled);
        record_attempt("cancel", "ok");

        info!(%task_id, %actor, reason, "task cancelled");
        Ok(record)
    }

    /// Recover a task an upgrade left without a live message.
    ///
    /// - `upgraded`: the crash came between marking and re-dispatch. The
    ///   target priority comes from the latest history entry.
    /// - `queued`: the re-dispatch publish failed after the requeue
    ///   committed. The record is published again at its current generation.
    ///
    /// Needs the permission tier of the priority the task ends up at.
    pub async fn resume(&self, task_id: TaskId, actor: &Actor) -> Result<TaskRecord> {
        let ledger = self.dispatcher.ledger();
        let current = ledger.get(task_id).await?;

        match current.status {
            Status::Upgraded => {
                let last = ledger.history(task_id).await?.pop().ok_or_else(|| {
                    Error::Other(format!("task {task_id} is upgraded but has no history"))
                })?;
                let permission = Permission::for_priority(last.to_priority);
                if let Err(e) = rbac::require(self.rbac.as_ref(), actor, permission).await {
                    warn!(%task_id, %actor, %permission, "resume denied");
                    return Err(e);
                }

                let record = self.dispatcher.redispatch(task_id, last.to_priority).await?;
                record_transition(Status::Upgraded, Status::Queued);
                info!(%task_id, %actor, priority = %record.priority, "interrupted upgrade resumed");
                Ok(record)
            }
            Status::Queued => {
                let permission = Permission::for_priority(current.priority);
                if let Err(e) = rbac::require(self.rbac.as_ref(), actor, permission).await {
                    warn!(%task_id, %actor, %permission, "resume denied");
                    return Err(e);
                }

                let record = self.dispatcher.republish(task_id).await?;
                info!(%task_id, %actor, priority = %record.priority, "queued task re-published");
                Ok(record)
            }
            other => Err(Error::TaskNotQueueable {
                task_id: task_id.to_string(),
                status: other.to_string(),
            }),
        }
    }
}
