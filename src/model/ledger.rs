//! Points ledger entries, awards, and idempotency keys.

use std::collections::VecDeque;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskId;
use crate::error::{Error, Result};

/// History entries kept per ledger. Oldest are evicted first.
pub const MAX_HISTORY: usize = 10;

/// Newtype for the user (or other entity) that owns a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a ledger entry lives. Needed only to create one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeContext {
    pub room_id: Uuid,
    pub world_id: Uuid,
}

impl ScopeContext {
    pub fn new(room_id: Uuid, world_id: Uuid) -> Self {
        Self { room_id, world_id }
    }

    pub fn validate(&self) -> Result<()> {
        if self.room_id.is_nil() || self.world_id.is_nil() {
            return Err(Error::Validation(
                "scope requires a room id and a world id".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identifies one completion of one task. The same key never credits twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AwardKey {
    pub task_id: TaskId,
    pub completed_at: DateTime<Utc>,
}

impl AwardKey {
    pub fn new(task_id: TaskId, completed_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            completed_at,
        }
    }
}

impl std::fmt::Display for AwardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}",
            self.task_id,
            self.completed_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }
}

/// One recorded award.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub delta: i64,
    pub reason: String,
}

/// A user's running score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entity_id: EntityId,
    pub scope: ScopeContext,
    pub current_points: i64,
    pub last_reason: Option<String>,
    /// Chronological, at most [`MAX_HISTORY`] long.
    pub history: VecDeque<HistoryEntry>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(entity_id: EntityId, scope: ScopeContext, now: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            scope,
            current_points: 0,
            last_reason: None,
            history: VecDeque::with_capacity(MAX_HISTORY),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an award in place: total, reason and history move together.
    /// Returns the new total.
    pub fn apply(&mut self, delta: i64, reason: &str, now: DateTime<Utc>) -> i64 {
        self.current_points += delta;
        self.last_reason = Some(reason.to_string());
        self.history.push_back(HistoryEntry {
            timestamp: now,
            delta,
            reason: reason.to_string(),
        });
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        self.version += 1;
        self.updated_at = now;
        self.current_points
    }
}

/// A request to credit an entity.
#[derive(Debug, Clone)]
pub struct Award {
    pub entity_id: EntityId,
    pub delta: i64,
    pub reason: String,
    pub scope: ScopeContext,
    pub key: Option<AwardKey>,
}

impl Award {
    pub fn new(
        entity_id: EntityId,
        delta: i64,
        reason: impl Into<String>,
        scope: ScopeContext,
    ) -> Self {
        Self {
            entity_id,
            delta,
            reason: reason.into(),
            scope,
            key: None,
        }
    }

    pub fn idempotency_key(mut self, key: AwardKey) -> Self {
        self.key = Some(key);
        self
    }
}

/// What an award did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardOutcome {
    /// The delta was applied.
    Credited { total: i64 },
    /// The key was already seen; nothing changed.
    Duplicate { total: i64 },
    /// Zero delta; nothing changed.
    Unchanged { total: i64 },
}

impl AwardOutcome {
    pub fn total(self) -> i64 {
        match self {
            AwardOutcome::Credited { total }
            | AwardOutcome::Duplicate { total }
            | AwardOutcome::Unchanged { total } => total,
        }
    }
}
