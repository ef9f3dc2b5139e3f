//! Database connection pool, migrations, and health check.
//!
//! One Postgres pool serves both the audit ledger (`task_records`,
//! `priority_changes`) and the pgmq-backed transport.

pub mod ledger;
pub mod pgmq;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashSet;
use std::sync::Mutex;

/// Database handle. Owns the connection pool shared by the ledger and the
/// transport.
pub struct Db {
    pool: PgPool,
    /// pgmq visibility timeout (seconds) applied to every fetch.
    visibility_timeout: i32,
    /// Queues already created by this handle.
    known_queues: Mutex<HashSet<String>>,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            visibility_timeout: 30,
            known_queues: Mutex::new(HashSet::new()),
        })
    }

    /// Override the pgmq visibility timeout (seconds).
    pub fn with_visibility_timeout(mut self, seconds: i32) -> Self {
        self.visibility_timeout = seconds;
        self
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
