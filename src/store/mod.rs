//! Persistence contracts consumed by the engine.
//!
//! Two stores: tasks (versioned records, conditional updates) and the
//! points ledger (atomic, idempotent awards). [`memory`] implements both
//! in-process; [`crate::db::Db`] implements both on Postgres.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;

pub use memory::{MemoryLedgerStore, MemoryTaskStore};

// ---------------------------------------------------------------------------
// Task store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch one task. `Error::NotFound` if absent.
    async fn get(&self, id: TaskId) -> Result<TaskRecord>;

    /// All tasks matching the filter, oldest first.
    async fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>>;

    /// Insert a new task built by [`NewTask`].
    async fn create(&self, task: TaskRecord) -> Result<TaskRecord>;

    /// Apply a patch if the stored version still equals
    /// `patch.expected_version`; otherwise `Error::Conflict`.
    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskRecord>;
}

/// Conjunctive filter; `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub category: Option<Category>,
    pub completed: Option<bool>,
    pub awaiting_choice: Option<bool>,
    pub room_id: Option<Uuid>,
}

impl TaskFilter {
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn awaiting_choice(mut self, awaiting: bool) -> Self {
        self.awaiting_choice = Some(awaiting);
        self
    }

    pub fn room(mut self, room_id: Uuid) -> Self {
        self.room_id = Some(room_id);
        self
    }

    pub fn matches(&self, task: &TaskRecord) -> bool {
        self.category.is_none_or(|c| task.category() == c)
            && self.completed.is_none_or(|c| task.status.completed == c)
            && self
                .awaiting_choice
                .is_none_or(|a| task.status.awaiting_choice == a)
            && self.room_id.is_none_or(|r| task.room_id == Some(r))
    }
}

/// Partial update guarded by the version it was computed from.
#[derive(Debug, Clone)]
pub struct TaskPatch {
    pub expected_version: i64,
    pub status: Option<TaskStatus>,
    pub progress: Option<Progress>,
    pub points_awarded: Option<i64>,
    pub completed_by: Option<EntityId>,
}

impl TaskPatch {
    pub fn new(expected_version: i64) -> Self {
        Self {
            expected_version,
            status: None,
            progress: None,
            points_awarded: None,
            completed_by: None,
        }
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn points_awarded(mut self, points: i64) -> Self {
        self.points_awarded = Some(points);
        self
    }

    pub fn completed_by(mut self, actor: EntityId) -> Self {
        self.completed_by = Some(actor);
        self
    }

    /// Apply to an in-memory copy, bumping its version.
    ///
    /// Fails with `Conflict` on a stale version and `Validation` if the
    /// patch would change the task's category.
    pub fn apply_to(&self, task: &mut TaskRecord, now: DateTime<Utc>) -> Result<()> {
        if task.version != self.expected_version {
            return Err(Error::Conflict(format!(
                "task {} is at version {}, patch expected {}",
                task.id, task.version, self.expected_version
            )));
        }
        if let Some(ref progress) = self.progress
            && progress.category() != task.category()
        {
            return Err(Error::Validation(format!(
                "cannot change task {} from {} to {}",
                task.id,
                task.category(),
                progress.category()
            )));
        }

        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(ref progress) = self.progress {
            task.progress = progress.clone();
        }
        if let Some(points) = self.points_awarded {
            task.points_awarded = Some(points);
        }
        if let Some(actor) = self.completed_by {
            task.completed_by = Some(actor);
        }
        task.version += 1;
        task.updated_at = now;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Credit `award.delta` to the entity, creating its entry on first use.
    ///
    /// Atomic per entity: concurrent awards are all reflected, and the
    /// total and history change together. An award whose key was already
    /// applied returns `Duplicate` and changes nothing. A zero delta returns
    /// `Unchanged` without creating an entry.
    async fn award(&self, award: Award) -> Result<AwardOutcome>;

    /// Current points. Zero, without creating an entry, for unknown entities.
    async fn balance(&self, entity_id: EntityId) -> Result<i64>;

    /// The full entry, if one exists.
    async fn entry(&self, entity_id: EntityId) -> Result<Option<LedgerEntry>>;
}
