//! Priority worker: drains one (category, phase) lane set in bucket order.
//!
//! Each poll cycle tries `high`, then `normal`, then `low`, and handles at
//! most one message. That gives strict precedence per cycle, not global
//! ordering across workers. `low` is only served when both higher buckets are
//! empty at poll time, so sustained high traffic can starve it; run a
//! low-only worker (`with_buckets(&[Bucket::Low])`) where that matters.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, warn};

use super::chain::{PhaseCompletion, PipelineChainer};
use super::dispatch::DispatchPayload;
use super::retry::with_backoff;
use crate::error::{Error, Result};
use crate::handler::{HandlerRegistry, TaskContext};
use crate::ledger::Ledger;
use crate::model::{Bucket, Category, Outcome, Phase, Status, TaskId, TaskRecord};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_status_transition, start_task_span};
use crate::transport::{Address, Message, Transport};

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle wait after a cycle finds every bucket empty.
    pub poll_interval: Duration,
    /// How long each bucket fetch may wait. Zero is a non-blocking read.
    pub fetch_wait: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            fetch_wait: Duration::ZERO,
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Every bucket was empty.
    Idle,
    /// Claimed and ran a task to a terminal status.
    Executed {
        task_id: TaskId,
        bucket: Bucket,
        status: Status,
    },
    /// The message referred to a superseded generation and was dropped.
    Stale { task_id: TaskId, bucket: Bucket },
    /// The message could not be decoded or named an unknown task.
    Discarded { message_id: i64 },
}

#[derive(Clone)]
pub struct PriorityWorker {
    id: String,
    category: Category,
    phase: Phase,
    addresses: Vec<Address>,
    ledger: Arc<dyn Ledger>,
    transport: Arc<dyn Transport>,
    handlers: Arc<HandlerRegistry>,
    chainer: Option<PipelineChainer>,
    config: WorkerConfig,
    stopping: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl PriorityWorker {
    pub fn new(
        category: Category,
        phase: Phase,
        ledger: Arc<dyn Ledger>,
        transport: Arc<dyn Transport>,
        handlers: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: format!("{category}.{phase}"),
            category,
            phase,
            addresses: Address::lanes(category, phase).to_vec(),
            ledger,
            transport,
            handlers,
            chainer: None,
            config,
            stopping: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Restrict the worker to some buckets. Poll order stays high → low.
    pub fn with_buckets(mut self, buckets: &[Bucket]) -> Self {
        self.addresses = Bucket::DESCENDING
            .into_iter()
            .filter(|b| buckets.contains(b))
            .map(|b| Address::new(self.category, self.phase, b))
            .collect();
        let names: Vec<&str> = self.addresses.iter().map(|a| a.bucket.as_str()).collect();
        self.id = format!("{}.{}[{}]", self.category, self.phase, names.join(","));
        self
    }

    /// Chain the next pipeline phase after each successful execution.
    pub fn with_chainer(mut self, chainer: PipelineChainer) -> Self {
        self.chainer = Some(chainer);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Addresses in poll order.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Signal the loop to stop after the current cycle.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Run poll cycles until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(worker = %self.id, "worker started");

        while !self.stopping.load(Ordering::SeqCst) {
            let idle = match self.poll_once().await {
                Ok(PollOutcome::Idle) => true,
                Ok(_) => false,
                Err(e) => {
                    error!(worker = %self.id, "poll cycle error: {e}");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(worker = %self.id, "worker shutting down");
        Ok(())
    }

    /// One cycle: take the first message found scanning buckets high → low
    /// and handle it.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        for address in &self.addresses {
            if let Some(message) = self
                .transport
                .fetch_one(address, self.config.fetch_wait)
                .await?
            {
                return self.handle(message).await;
            }
        }
        Ok(PollOutcome::Idle)
    }

    async fn handle(&self, message: Message) -> Result<PollOutcome> {
        let bucket = message.address.bucket;

        let payload = match DispatchPayload::from_message(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(worker = %self.id, address = %message.address, "discarding message: {e}");
                self.transport.ack(&message).await?;
                return Ok(PollOutcome::Discarded {
                    message_id: message.id,
                });
            }
        };
        let task_id = payload.task_id;

        // Claim is a compare-and-swap on (status = queued, generation); the
        // ledger decides, not the message.
        let claimed = match self.ledger.claim(task_id, payload.generation).await {
            Ok(claimed) => claimed,
            Err(Error::TaskNotFound(_)) => {
                warn!(worker = %self.id, %task_id, "discarding message for unknown task");
                self.transport.ack(&message).await?;
                return Ok(PollOutcome::Discarded {
                    message_id: message.id,
                });
            }
            // Leave the message; it reappears after its visibility timeout.
            Err(e) => return Err(e),
        };

        let Some(record) = claimed else {
            metrics::stale_claims().add(
                1,
                &[
                    KeyValue::new("category", self.category.as_str()),
                    KeyValue::new("phase", self.phase.as_str()),
                    KeyValue::new("bucket", bucket.as_str()),
                ],
            );
            debug!(
                worker = %self.id,
                %task_id,
                %bucket,
                generation = payload.generation,
                "stale claim discarded"
            );
            self.transport.ack(&message).await?;
            return Ok(PollOutcome::Stale { task_id, bucket });
        };

        let status = self.execute(record, bucket).await?;
        self.transport.ack(&message).await?;

        Ok(PollOutcome::Executed {
            task_id,
            bucket,
            status,
        })
    }

    /// Run a claimed task's body and record its terminal status.
    async fn execute(&self, record: TaskRecord, bucket: Bucket) -> Result<Status> {
        let span = start_task_span(record.category, record.phase, bucket, &record.task_id);

        async {
            record_status_transition(&span, "queued", "running");
            record_transition(Status::Queued, Status::Running);

            let ctx = TaskContext::from(&record);
            let started = Instant::now();
            let result = match self.handlers.get(&record.task_name) {
                Some(handler) => handler.run(&ctx).await,
                None => Err(anyhow::anyhow!(
                    "no handler registered for task {}",
                    record.task_name
                )),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let status = match result {
                Ok(data) => {
                    // Chain before the terminal write so a failed hand-off is
                    // recorded on this task's outcome.
                    let mut chain_error = None;
                    if let Some(ref chainer) = self.chainer {
                        let completion = PhaseCompletion::from_record(&record, data.clone());
                        if let Err(e) = chainer.phase_completed(completion).await {
                            error!(
                                task_id = %record.task_id,
                                correlation_id = %record.correlation_id,
                                "failed to dispatch next phase: {e}"
                            );
                            chain_error = Some(format!("next phase not dispatched: {e}"));
                        }
                    }

                    let outcome = Outcome {
                        success: true,
                        data: Some(data),
                        error: chain_error,
                        duration_ms,
                    };
                    with_backoff("record completion", || {
                        self.ledger.complete(record.task_id, outcome.clone())
                    })
                    .await
                    .inspect_err(|e| {
                        error!(task_id = %record.task_id, "task ran but completion was not recorded: {e}");
                    })?;
                    record_status_transition(&span, "running", "completed");
                    info!(task_id = %record.task_id, duration_ms, "task completed");
                    Status::Completed
                }
                Err(e) => {
                    let detail = format!("{e:#}");
                    with_backoff("record failure", || {
                        self.ledger.fail(record.task_id, &detail, duration_ms)
                    })
                    .await
                    .inspect_err(|e| {
                        error!(task_id = %record.task_id, "task ran but failure was not recorded: {e}");
                    })?;
                    record_status_transition(&span, "running", "failed");
                    error!(task_id = %record.task_id, duration_ms, error = %detail, "task failed");
                    Status::Failed
                }
            };

            record_transition(Status::Running, status);
            metrics::task_duration_ms().record(
                duration_ms as f64,
                &[
                    KeyValue::new("category", record.category.as_str()),
                    KeyValue::new("phase", record.phase.as_str()),
                    KeyValue::new("status", status.as_str()),
                ],
            );
            Ok(status)
        }
        .instrument(span.clone())
        .await
    }
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
