//! # laneq
//!
//! Priority-lane task dispatch over a subject-addressable queue.
//!
//! Tasks are routed to `tasks.{category}.{phase}.{bucket}` addresses, where
//! the bucket (high/normal/low) is derived from a 0–10 priority. Workers
//! drain buckets in priority order, queued tasks can be upgraded by
//! cancel-and-requeue, and every priority change lands in an append-only
//! audit history. Postgres (pgmq + sqlx) backs the ledger and transport in
//! production; in-memory adapters back tests.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod rbac;
pub mod telemetry;
pub mod transport;
