//! Postgres-backed task and ledger stores.
//!
//! One connection pool shared by both stores. Every mutation is a
//! version-checked read-modify-write; see [`ledger`] for the award loop.

pub mod ledger;
pub mod tasks;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Version-check retries for a ledger award before giving up. Awards hold the
/// entry's row lock, so these only fire if the lock is bypassed.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
    conflict_retries: u32,
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
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        })
    }

    /// Bound the optimistic retry loop used by awards.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
