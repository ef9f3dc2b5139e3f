//! Error types for laneq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid priority {0}: must be between 0 and 10")]
    InvalidPriority(i32),

    #[error("actor {actor} lacks permission {permission}")]
    PermissionDenied { actor: String, permission: String },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {task_id} is {status}, not queued")]
    TaskNotQueueable { task_id: String, status: String },

    #[error("priority downgrade from {from} to {to} is not allowed")]
    DowngradeRejected { from: u8, to: u8 },

    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid {kind}: {value:?}")]
    InvalidLabel { kind: &'static str, value: String },

    #[error("bad message payload: {0}")]
    BadPayload(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
