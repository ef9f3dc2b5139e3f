//! pgmq-backed transport via direct SQLx.
//!
//! Each concrete address maps onto one pgmq queue. Calls pgmq's SQL
//! functions: pgmq.create, pgmq.send, pgmq.read, pgmq.read_with_poll,
//! pgmq.archive. Labels travel in the message envelope next to the payload.

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde_json::json;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{Category, Phase};
use crate::telemetry::metrics;
use crate::transport::{Address, Labels, Message, Transport};

/// Interval between pgmq's internal polls when a fetch is allowed to wait.
const POLL_INTERVAL_MS: i32 = 100;

type MessageRow = (
    i64,
    i32,
    chrono::DateTime<chrono::Utc>,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
);

fn record_queue_op(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        record_queue_op(queue_name, "create");
        Ok(())
    }

    /// Create the three bucket queues of one (category, phase).
    pub async fn create_lanes(&self, category: Category, phase: Phase) -> Result<()> {
        for address in Address::lanes(category, phase) {
            self.ensure_queue(&address).await?;
        }
        Ok(())
    }

    async fn ensure_queue(&self, address: &Address) -> Result<String> {
        let queue_name = address.queue_name();
        let known = self
            .known_queues
            .lock()
            .map(|set| set.contains(&queue_name))
            .unwrap_or(false);
        if !known {
            self.create_queue(&queue_name).await?;
            if let Ok(mut set) = self.known_queues.lock() {
                set.insert(queue_name.clone());
            }
        }
        Ok(queue_name)
    }

    /// Number of visible messages at an address.
    pub async fn queue_depth(&self, address: &Address) -> Result<i64> {
        let queue_name = self.ensure_queue(address).await?;
        let row: (i64,) = sqlx::query_as("SELECT queue_visible_length FROM pgmq.metrics($1)")
            .bind(&queue_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

fn decode(address: &Address, row: MessageRow) -> Result<Message> {
    let (msg_id, read_ct, enqueued_at, _vt, envelope) = row;

    let labels: Labels = match envelope.get("labels") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Labels::new(),
    };
    let payload = envelope
        .get("payload")
        .cloned()
        .ok_or_else(|| Error::BadPayload(format!("message {msg_id} has no payload")))?;

    Ok(Message {
        id: msg_id,
        address: *address,
        read_count: read_ct,
        enqueued_at,
        labels,
        payload,
    })
}

#[async_trait]
impl Transport for super::Db {
    async fn publish(
        &self,
        address: &Address,
        payload: &serde_json::Value,
        labels: &Labels,
    ) -> Result<i64> {
        let queue_name = self.ensure_queue(address).await?;
        let envelope = json!({
            "labels": labels,
            "payload": payload,
        });

        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(&queue_name)
            .bind(&envelope)
            .bind(0i32)
            .fetch_one(&self.pool)
            .await?;
        record_queue_op(&queue_name, "send");
        Ok(row.0)
    }

    async fn fetch_one(&self, address: &Address, wait: Duration) -> Result<Option<Message>> {
        let queue_name = self.ensure_queue(address).await?;

        let row: Option<MessageRow> = if wait.is_zero() {
            sqlx::query_as(
                "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)",
            )
            .bind(&queue_name)
            .bind(self.visibility_timeout)
            .fetch_optional(&self.pool)
            .await?
        } else {
            let max_poll_seconds = wait.as_secs_f64().ceil().max(1.0) as i32;
            sqlx::query_as(
                "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read_with_poll($1, $2, 1, $3, $4)",
            )
            .bind(&queue_name)
            .bind(self.visibility_timeout)
            .bind(max_poll_seconds)
            .bind(POLL_INTERVAL_MS)
            .fetch_optional(&self.pool)
            .await?
        };

        record_queue_op(
            &queue_name,
            if row.is_some() { "read" } else { "read_empty" },
        );

        row.map(|row| decode(address, row)).transpose()
    }

    /// Archive the message (moves to the archive table, kept for audit).
    async fn ack(&self, message: &Message) -> Result<()> {
        let queue_name = message.address.queue_name();
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(&queue_name)
            .bind(message.id)
            .execute(&self.pool)
            .await?;
        record_queue_op(&queue_name, "archive");
        Ok(())
    }
}

