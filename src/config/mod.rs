//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Directory of pipeline TOML files.
    pub pipelines_dir: PathBuf,
    /// RBAC grants file. Without one, every permission check fails.
    pub rbac_file: Option<PathBuf>,
    /// Idle wait between empty worker poll cycles.
    pub poll_interval: Duration,
    /// Visibility timeout (seconds) for transport fetches.
    pub visibility_timeout: i32,
    /// Accept upgrades that lower a task's priority.
    pub allow_downgrade: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            pipelines_dir: std::env::var("LANEQ_PIPELINES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("pipelines")),
            rbac_file: std::env::var("LANEQ_RBAC_FILE").ok().map(PathBuf::from),
            poll_interval: Duration::from_millis(parsed_var("LANEQ_POLL_INTERVAL_MS", 250)?),
            visibility_timeout: parsed_var("LANEQ_VISIBILITY_TIMEOUT_SECS", 30)?,
            allow_downgrade: parsed_var("LANEQ_ALLOW_DOWNGRADE", false)?,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}
