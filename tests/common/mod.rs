//! Shared fixtures: in-memory ledger and transport wired to a dispatcher,
//! plus wrappers that fail on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use laneq::engine::{Dispatcher, UpgradeCoordinator, UpgradePolicy};
use laneq::error::{Error, Result};
use laneq::ledger::memory::InMemoryLedger;
use laneq::ledger::{Ledger, TaskFilter};
use laneq::model::{
    CorrelationId, NewPriorityChange, Outcome, Priority, PriorityChange, TaskId, TaskRecord,
};
use laneq::rbac::{Permission, StaticRbac};
use laneq::transport::memory::InMemoryTransport;
use laneq::transport::{Address, Labels, Message, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub transport: Arc<InMemoryTransport>,
    pub dispatcher: Dispatcher,
}

pub fn harness() -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let transport = Arc::new(InMemoryTransport::default());
    let dispatcher = Dispatcher::new(ledger.clone(), transport.clone());
    Harness {
        ledger,
        transport,
        dispatcher,
    }
}

/// "alice" holds every permission, "bob" can only prioritize, "eve" nothing.
pub fn rbac() -> StaticRbac {
    StaticRbac::new()
        .grant("alice", Permission::PrioritizeTasks)
        .grant("alice", Permission::UrgentTasks)
        .grant("alice", Permission::CriticalTasks)
        .grant("alice", Permission::CancelTasks)
        .grant("bob", Permission::PrioritizeTasks)
}

pub fn coordinator(h: &Harness, policy: UpgradePolicy) -> UpgradeCoordinator {
    UpgradeCoordinator::new(h.dispatcher.clone(), Arc::new(rbac()), policy)
}

/// Transport whose next `n` publishes fail; everything else goes to `inner`.
pub struct FlakyTransport {
    pub inner: Arc<InMemoryTransport>,
    failures: AtomicUsize,
}

impl FlakyTransport {
    pub fn new(inner: Arc<InMemoryTransport>) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

/// Take one pending failure, if any.
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn publish(
        &self,
        address: &Address,
        payload: &serde_json::Value,
        labels: &Labels,
    ) -> Result<i64> {
        if take_failure(&self.failures) {
            return Err(Error::Other("broker down".to_string()));
        }
        self.inner.publish(address, payload, labels).await
    }

    async fn fetch_one(&self, address: &Address, wait: Duration) -> Result<Option<Message>> {
        self.inner.fetch_one(address, wait).await
    }

    async fn ack(&self, message: &Message) -> Result<()> {
        self.inner.ack(message).await
    }
}

/// Harness whose dispatcher publishes through a `FlakyTransport`.
pub fn flaky_harness() -> (Harness, Arc<FlakyTransport>) {
    let ledger = Arc::new(InMemoryLedger::new());
    let transport = Arc::new(InMemoryTransport::default());
    let flaky = Arc::new(FlakyTransport::new(transport.clone()));
    let dispatcher = Dispatcher::new(ledger.clone(), flaky.clone());
    (
        Harness {
            ledger,
            transport,
            dispatcher,
        },
        flaky,
    )
}

/// Ledger whose next `n` terminal writes (`complete`) fail.
pub struct FlakyLedger {
    pub inner: Arc<InMemoryLedger>,
    complete_failures: AtomicUsize,
}

impl FlakyLedger {
    pub fn new(inner: Arc<InMemoryLedger>) -> Self {
        Self {
            inner,
            complete_failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_completes(&self, n: usize) {
        self.complete_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn insert(&self, record: &TaskRecord) -> Result<()> {
        self.inner.insert(record).await
    }

    async fn get(&self, task_id: TaskId) -> Result<TaskRecord> {
        self.inner.get(task_id).await
    }

    async fn mark_upgraded(
        &self,
        generation: u32,
        change: NewPriorityChange,
    ) -> Result<PriorityChange> {
        self.inner.mark_upgraded(generation, change).await
    }

    async fn requeue(&self, task_id: TaskId, priority: Priority) -> Result<TaskRecord> {
        self.inner.requeue(task_id, priority).await
    }

    async fn claim(&self, task_id: TaskId, generation: u32) -> Result<Option<TaskRecord>> {
        self.inner.claim(task_id, generation).await
    }

    async fn complete(&self, task_id: TaskId, outcome: Outcome) -> Result<TaskRecord> {
        if take_failure(&self.complete_failures) {
            return Err(Error::Other("db blip".to_string()));
        }
        self.inner.complete(task_id, outcome).await
    }

    async fn fail(&self, task_id: TaskId, error: &str, duration_ms: u64) -> Result<TaskRecord> {
        self.inner.fail(task_id, error, duration_ms).await
    }

    async fn cancel(&self, task_id: TaskId, reason: &str) -> Result<TaskRecord> {
        self.inner.cancel(task_id, reason).await
    }

    async fn history(&self, task_id: TaskId) -> Result<Vec<PriorityChange>> {
        self.inner.history(task_id).await
    }

    async fn history_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PriorityChange>> {
        self.inner.history_between(since, until).await
    }

    async fn by_correlation(&self, correlation_id: CorrelationId) -> Result<Vec<TaskRecord>> {
        self.inner.by_correlation(correlation_id).await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        self.inner.list(filter).await
    }
}
