//! Ledger persistence: upsert, idempotency claim, compare-and-set.
//!
//! Each attempt runs in one transaction:
//!
//! 1. `INSERT .. ON CONFLICT DO NOTHING` creates the entry if absent, so
//!    racing first awards cannot create two rows.
//! 2. Read the entry with `FOR UPDATE`. The row lock makes awards for one
//!    entity take turns; awards for other entities are not blocked.
//! 3. Claim the idempotency key. A key that is already present means the
//!    award was applied before: return the current total untouched.
//! 4. Apply delta and history in Rust, then `UPDATE .. WHERE version = $read`.
//!    Under the row lock this always matches. Zero rows would mean the lock
//!    was bypassed: roll back and go again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::LedgerStore;
use crate::telemetry::metrics;

/// Result of one compare-and-set attempt.
enum Attempt {
    Done(AwardOutcome),
    Lost,
}

impl super::Db {
    async fn try_award(&self, award: &Award) -> Result<Attempt> {
        let now = SystemClock.now();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO ledger_entries (entity_id, room_id, world_id, current_points, history, version, created_at, updated_at)
             VALUES ($1, $2, $3, 0, '[]'::jsonb, 0, $4, $4)
             ON CONFLICT (entity_id) DO NOTHING",
        )
        .bind(award.entity_id.0)
        .bind(award.scope.room_id)
        .bind(award.scope.world_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row: LedgerRow = sqlx::query_as(
            "SELECT entity_id, room_id, world_id, current_points, last_reason, history, version, created_at, updated_at
             FROM ledger_entries WHERE entity_id = $1
             FOR UPDATE",
        )
        .bind(award.entity_id.0)
        .fetch_one(&mut *tx)
        .await?;
        let read_version = row.version;
        let mut entry = row.try_into_entry()?;

        if let Some(key) = award.key {
            let claimed: Option<(String,)> = sqlx::query_as(
                "INSERT INTO ledger_award_keys (entity_id, award_key, delta, awarded_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (entity_id, award_key) DO NOTHING
                 RETURNING award_key",
            )
            .bind(award.entity_id.0)
            .bind(key.to_string())
            .bind(award.delta)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            if claimed.is_none() {
                tx.rollback().await?;
                return Ok(Attempt::Done(AwardOutcome::Duplicate {
                    total: entry.current_points,
                }));
            }
        }

        let total = entry.apply(award.delta, &award.reason, now);
        let rows_affected = sqlx::query(
            "UPDATE ledger_entries SET current_points = $1, last_reason = $2, history = $3, version = $4, updated_at = $5
             WHERE entity_id = $6 AND version = $7",
        )
        .bind(total)
        .bind(&entry.last_reason)
        .bind(serde_json::to_value(&entry.history)?)
        .bind(entry.version)
        .bind(now)
        .bind(award.entity_id.0)
        .bind(read_version)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.rollback().await?;
            return Ok(Attempt::Lost);
        }

        tx.commit().await?;
        Ok(Attempt::Done(AwardOutcome::Credited { total }))
    }
}

#[async_trait]
impl LedgerStore for super::Db {
    async fn award(&self, award: Award) -> Result<AwardOutcome> {
        if award.delta == 0 {
            return Ok(AwardOutcome::Unchanged {
                total: LedgerStore::balance(self, award.entity_id).await?,
            });
        }
        award.scope.validate()?;

        for attempt in 0..=self.conflict_retries {
            match self.try_award(&award).await? {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Lost => {
                    metrics::ledger_conflicts().add(1, &[KeyValue::new("store", "postgres")]);
                    tracing::debug!(
                        entity = %award.entity_id,
                        attempt,
                        "ledger version moved, retrying award"
                    );
                }
            }
        }

        Err(Error::StoreUnavailable(format!(
            "ledger for {} stayed contended after {} retries",
            award.entity_id, self.conflict_retries
        )))
    }

    async fn balance(&self, entity_id: EntityId) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT current_points FROM ledger_entries WHERE entity_id = $1")
                .bind(entity_id.0)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map_or(0, |(points,)| points))
    }

    async fn entry(&self, entity_id: EntityId) -> Result<Option<LedgerEntry>> {
        let row: Option<LedgerRow> = sqlx::query_as(
            "SELECT entity_id, room_id, world_id, current_points, last_reason, history, version, created_at, updated_at
             FROM ledger_entries WHERE entity_id = $1",
        )
        .bind(entity_id.0)
        .fetch_optional(self.pool())
        .await?;

        row.map(LedgerRow::try_into_entry).transpose()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct LedgerRow {
    entity_id: Uuid,
    room_id: Uuid,
    world_id: Uuid,
    current_points: i64,
    last_reason: Option<String>,
    history: serde_json::Value,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LedgerRow {
    fn try_into_entry(self) -> Result<LedgerEntry> {
        let history: VecDeque<HistoryEntry> = serde_json::from_value(self.history)?;
        Ok(LedgerEntry {
            entity_id: EntityId(self.entity_id),
            scope: ScopeContext::new(self.room_id, self.world_id),
            current_points: self.current_points,
            last_reason: self.last_reason,
            history,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
