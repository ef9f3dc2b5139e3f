//! Transport port: hierarchical addresses, messages, and the publish/fetch
//! contract the dispatcher and workers consume.
//!
//! Addresses have the form `tasks.{category}.{phase}.{bucket}`. The Postgres
//! adapter maps each concrete address onto one pgmq queue.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{Bucket, Category, Phase};

const ROOT: &str = "tasks";

/// Label set published alongside every payload.
pub type Labels = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A concrete routing address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub category: Category,
    pub phase: Phase,
    pub bucket: Bucket,
}

impl Address {
    pub fn new(category: Category, phase: Phase, bucket: Bucket) -> Self {
        Self {
            category,
            phase,
            bucket,
        }
    }

    /// The three addresses a worker bound to (category, phase) drains, in
    /// poll order.
    pub fn lanes(category: Category, phase: Phase) -> [Address; 3] {
        Bucket::DESCENDING.map(|bucket| Address::new(category, phase, bucket))
    }

    /// Queue-safe name: dots become underscores.
    pub fn queue_name(&self) -> String {
        format!("{ROOT}_{}_{}_{}", self.category, self.phase, self.bucket)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{ROOT}.{}.{}.{}", self.category, self.phase, self.bucket)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidLabel {
            kind: "address",
            value: s.to_string(),
        };
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [ROOT, category, phase, bucket] => Ok(Address::new(
                category.parse().map_err(|_| bad())?,
                phase.parse().map_err(|_| bad())?,
                bucket.parse().map_err(|_| bad())?,
            )),
            _ => Err(bad()),
        }
    }
}

// ---------------------------------------------------------------------------
// Address patterns
// ---------------------------------------------------------------------------

/// Wildcard filter over addresses. `*` matches one segment, a trailing `>`
/// matches everything below its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPattern {
    segments: Vec<String>,
}

impl AddressPattern {
    pub fn matches(&self, address: &Address) -> bool {
        let rendered = address.to_string();
        let parts: Vec<&str> = rendered.split('.').collect();

        for (i, segment) in self.segments.iter().enumerate() {
            if segment == ">" {
                return parts.len() > i;
            }
            match parts.get(i) {
                Some(part) if segment == "*" || segment == part => {}
                _ => return false,
            }
        }
        parts.len() == self.segments.len()
    }
}

impl std::str::FromStr for AddressPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        let tail_misplaced = segments
            .iter()
            .take(segments.len().saturating_sub(1))
            .any(|seg| seg == ">");
        if s.is_empty() || segments.iter().any(String::is_empty) || tail_misplaced {
            return Err(Error::InvalidLabel {
                kind: "address pattern",
                value: s.to_string(),
            });
        }
        Ok(Self { segments })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message fetched from an address. Invisible to other fetchers until
/// acked or its visibility timeout lapses.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub address: Address,
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub labels: Labels,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Subject-addressable message transport. Per-address FIFO is assumed, not
/// enforced.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload with its labels. Returns the transport message id.
    async fn publish(
        &self,
        address: &Address,
        payload: &serde_json::Value,
        labels: &Labels,
    ) -> Result<i64>;

    /// Take the next message at `address`, waiting at most `wait`.
    /// A zero wait is a non-blocking read.
    async fn fetch_one(&self, address: &Address, wait: Duration) -> Result<Option<Message>>;

    /// Acknowledge a fetched message so it is never redelivered.
    async fn ack(&self, message: &Message) -> Result<()>;
}
