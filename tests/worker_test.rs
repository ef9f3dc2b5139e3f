//! Priority workers: bucket order, stale claims, outcomes, shutdown.

mod common;

use laneq::engine::{PollOutcome, PriorityWorker, UpgradePolicy, UpgradeRequest, WorkerConfig};
use laneq::handler::HandlerRegistry;
use laneq::ledger::Ledger;
use laneq::model::*;
use laneq::rbac::Actor;
use laneq::transport::{Address, Labels, Transport};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TASK: &str = "report.render";

/// Registry whose handler records each executed priority.
fn recording_handlers() -> (Arc<HandlerRegistry>, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut handlers = HandlerRegistry::new();
    let log = seen.clone();
    handlers.register_fn(TASK, move |ctx| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(ctx.priority.value());
            anyhow::Ok(json!({"rendered": ctx.task_id.to_string()}))
        }
    });
    (Arc::new(handlers), seen)
}

fn worker(h: &common::Harness, handlers: Arc<HandlerRegistry>) -> PriorityWorker {
    PriorityWorker::new(
        Category::Report,
        Phase::Render,
        h.ledger.clone(),
        h.transport.clone(),
        handlers,
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        },
    )
}

async fn submit(h: &common::Harness, priority: i32) -> TaskId {
    h.dispatcher
        .submit(
            NewTask::new(TASK, Category::Report)
                .phase(Phase::Render)
                .priority(priority),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn empty_lanes_are_idle() {
    let h = common::harness();
    let (handlers, seen) = recording_handlers();
    let w = worker(&h, handlers);

    assert_eq!(w.poll_once().await.unwrap(), PollOutcome::Idle);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn higher_buckets_are_served_first() {
    let h = common::harness();
    let (handlers, seen) = recording_handlers();
    let w = worker(&h, handlers);

    let low = submit(&h, 2).await;
    let normal = submit(&h, 5).await;
    let high = submit(&h, 9).await;

    let mut order = Vec::new();
    for _ in 0..3 {
        match w.poll_once().await.unwrap() {
            PollOutcome::Executed {
                task_id,
                bucket,
                status,
            } => {
                assert_eq!(status, Status::Completed);
                order.push((task_id, bucket));
            }
            other => panic!("expected execution, got {other:?}"),
        }
    }
    assert_eq!(
        order,
        vec![
            (high, Bucket::High),
            (normal, Bucket::Normal),
            (low, Bucket::Low)
        ]
    );
    assert_eq!(*seen.lock().unwrap(), vec![9, 5, 2]);
    assert_eq!(w.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn lone_low_task_runs_in_one_cycle() {
    let h = common::harness();
    let (handlers, _) = recording_handlers();
    let w = worker(&h, handlers);
    let task_id = submit(&h, 0).await;

    assert_eq!(
        w.poll_once().await.unwrap(),
        PollOutcome::Executed {
            task_id,
            bucket: Bucket::Low,
            status: Status::Completed,
        }
    );
}

#[tokio::test]
async fn completed_task_records_outcome() {
    let h = common::harness();
    let (handlers, _) = recording_handlers();
    let w = worker(&h, handlers);
    let task_id = submit(&h, 5).await;

    w.poll_once().await.unwrap();

    let record = h.ledger.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Completed);
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
    let outcome = record.outcome.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.data, Some(json!({"rendered": task_id.to_string()})));
    assert_eq!(h.transport.in_flight(), 0);
}

#[tokio::test]
async fn superseded_dispatch_is_discarded_not_executed() {
    let h = common::harness();
    let (handlers, seen) = recording_handlers();
    let w = worker(&h, handlers);
    let coordinator = common::coordinator(&h, UpgradePolicy::default());

    let task_id = submit(&h, 5).await;
    coordinator
        .upgrade(UpgradeRequest::action(
            task_id,
            UpgradeAction::Urgent,
            Actor::new("alice"),
        ))
        .await
        .unwrap();

    assert_eq!(
        w.poll_once().await.unwrap(),
        PollOutcome::Executed {
            task_id,
            bucket: Bucket::High,
            status: Status::Completed,
        }
    );
    assert_eq!(
        w.poll_once().await.unwrap(),
        PollOutcome::Stale {
            task_id,
            bucket: Bucket::Normal,
        }
    );
    assert_eq!(*seen.lock().unwrap(), vec![9]);
    assert_eq!(h.transport.in_flight(), 0);
}

#[tokio::test]
async fn stale_message_seen_first_does_not_block_the_new_one() {
    let h = common::harness();
    let (handlers, seen) = recording_handlers();
    let coordinator = common::coordinator(&h, UpgradePolicy::default());

    // After low -> normal, the low copy is stale and the normal copy live.
    let task_id = submit(&h, 1).await;
    coordinator
        .upgrade(UpgradeRequest::priority(task_id, 6, Actor::new("bob")))
        .await
        .unwrap();

    let low_only = worker(&h, handlers.clone()).with_buckets(&[Bucket::Low]);
    assert_eq!(
        low_only.poll_once().await.unwrap(),
        PollOutcome::Stale {
            task_id,
            bucket: Bucket::Low,
        }
    );
    assert!(seen.lock().unwrap().is_empty());

    let full = worker(&h, handlers);
    assert!(matches!(
        full.poll_once().await.unwrap(),
        PollOutcome::Executed { bucket: Bucket::Normal, .. }
    ));
    assert_eq!(*seen.lock().unwrap(), vec![6]);
}

#[tokio::test]
async fn cancelled_task_is_never_executed() {
    let h = common::harness();
    let (handlers, seen) = recording_handlers();
    let w = worker(&h, handlers);
    let coordinator = common::coordinator(&h, UpgradePolicy::default());

    let task_id = submit(&h, 5).await;
    coordinator
        .cancel(task_id, "", &Actor::new("alice"))
        .await
        .unwrap();

    assert!(matches!(
        w.poll_once().await.unwrap(),
        PollOutcome::Stale { .. }
    ));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(h.ledger.get(task_id).await.unwrap().status, Status::Cancelled);
}

#[tokio::test]
async fn handler_error_marks_task_failed() {
    let h = common::harness();
    let mut handlers = HandlerRegistry::new();
    handlers.register_fn(TASK, |_ctx| async {
        Err::<serde_json::Value, _>(anyhow::anyhow!("template missing"))
    });
    let w = worker(&h, Arc::new(handlers));
    let task_id = submit(&h, 5).await;

    assert!(matches!(
        w.poll_once().await.unwrap(),
        PollOutcome::Executed {
            status: Status::Failed,
            ..
        }
    ));
    let record = h.ledger.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Failed);
    let outcome = record.outcome.unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("template missing"));
}

#[tokio::test]
async fn unknown_task_name_fails_instead_of_hanging() {
    let h = common::harness();
    let w = worker(&h, Arc::new(HandlerRegistry::new()));
    let task_id = submit(&h, 5).await;

    w.poll_once().await.unwrap();
    let record = h.ledger.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Failed);
    assert!(record.outcome.unwrap().error.unwrap().contains(TASK));
}

#[tokio::test]
async fn undecodable_message_is_discarded() {
    let h = common::harness();
    let (handlers, _) = recording_handlers();
    let w = worker(&h, handlers);

    let high = Address::new(Category::Report, Phase::Render, Bucket::High);
    let id = h
        .transport
        .publish(&high, &json!({"not": "a dispatch"}), &Labels::new())
        .await
        .unwrap();

    assert_eq!(
        w.poll_once().await.unwrap(),
        PollOutcome::Discarded { message_id: id }
    );
    assert_eq!(h.transport.in_flight(), 0);
}

#[tokio::test]
async fn bucket_restricted_worker_ignores_other_lanes() {
    let h = common::harness();
    let (handlers, _) = recording_handlers();
    let low_only = worker(&h, handlers).with_buckets(&[Bucket::Low]);
    assert_eq!(low_only.addresses().len(), 1);
    assert_eq!(low_only.id(), "report.render[low]");

    submit(&h, 10).await;
    assert_eq!(low_only.poll_once().await.unwrap(), PollOutcome::Idle);

    let low = submit(&h, 3).await;
    assert!(matches!(
        low_only.poll_once().await.unwrap(),
        PollOutcome::Executed { task_id, .. } if task_id == low
    ));
}

#[tokio::test]
async fn run_drains_lanes_until_shutdown() {
    let h = common::harness();
    let (handlers, seen) = recording_handlers();
    let w = worker(&h, handlers);

    let runner = w.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let ids = [submit(&h, 1).await, submit(&h, 7).await, submit(&h, 10).await];

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut done = 0;
        for id in ids {
            if h.ledger.get(id).await.unwrap().status == Status::Completed {
                done += 1;
            }
        }
        if done == ids.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "worker did not drain");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(seen.lock().unwrap().len(), 3);

    w.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker stops after shutdown")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn completion_write_is_retried_after_a_ledger_blip() {
    let h = common::harness();
    let ledger = Arc::new(common::FlakyLedger::new(h.ledger.clone()));
    let (handlers, seen) = recording_handlers();
    let w = PriorityWorker::new(
        Category::Report,
        Phase::Render,
        ledger.clone(),
        h.transport.clone(),
        handlers,
        WorkerConfig::default(),
    );
    let task_id = submit(&h, 5).await;

    ledger.fail_next_completes(1);
    assert_eq!(
        w.poll_once().await.unwrap(),
        PollOutcome::Executed {
            task_id,
            bucket: Bucket::Normal,
            status: Status::Completed,
        }
    );
    assert_eq!(seen.lock().unwrap().len(), 1);
    let record = h.ledger.get(task_id).await.unwrap();
    assert_eq!(record.status, Status::Completed);
    assert!(record.outcome.unwrap().success);
}

#[tokio::test]
async fn unrecordable_completion_surfaces_and_leaves_message_unacked() {
    let h = common::harness();
    let ledger = Arc::new(common::FlakyLedger::new(h.ledger.clone()));
    let (handlers, seen) = recording_handlers();
    let w = PriorityWorker::new(
        Category::Report,
        Phase::Render,
        ledger.clone(),
        h.transport.clone(),
        handlers,
        WorkerConfig::default(),
    );
    let task_id = submit(&h, 5).await;

    ledger.fail_next_completes(usize::MAX);
    assert!(w.poll_once().await.is_err());
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(h.ledger.get(task_id).await.unwrap().status, Status::Running);
    assert_eq!(h.transport.in_flight(), 1);
}
