//! In-process stores.
//!
//! The ledger serializes awards per entity: a small map lock hands out one
//! slot per entity (insert-or-fetch), and each slot has its own async mutex.
//! Awards for different users never wait on each other.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use super::{LedgerStore, TaskFilter, TaskPatch, TaskStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::*;

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Versioned task map.
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, id: TaskId) -> Result<TaskRecord> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<TaskRecord> =
            tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        matched.sort_by_key(|t| (t.created_at, t.id));
        Ok(matched)
    }

    async fn create(&self, task: TaskRecord) -> Result<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(Error::Validation(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        let current = tasks
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;

        // Patch a copy so a rejected patch leaves the stored record intact.
        let mut next = current.clone();
        patch.apply_to(&mut next, self.clock.now())?;
        tasks.insert(id, next.clone());
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LedgerSlot {
    entry: Option<LedgerEntry>,
    /// Every key applied to this entity since the store was created. Never
    /// pruned; grows with the entity's keyed awards for the life of the store.
    applied_keys: HashSet<AwardKey>,
}

/// Ledger with a single writer per entity.
pub struct MemoryLedgerStore {
    slots: Mutex<HashMap<EntityId, Arc<AsyncMutex<LedgerSlot>>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Insert-or-fetch the slot for an entity in one step.
    fn slot(&self, entity_id: EntityId) -> Result<Arc<AsyncMutex<LedgerSlot>>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| Error::StoreUnavailable("ledger slot map poisoned".to_string()))?;
        Ok(Arc::clone(slots.entry(entity_id).or_default()))
    }

    fn existing_slot(&self, entity_id: EntityId) -> Result<Option<Arc<AsyncMutex<LedgerSlot>>>> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| Error::StoreUnavailable("ledger slot map poisoned".to_string()))?;
        Ok(slots.get(&entity_id).cloned())
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn award(&self, award: Award) -> Result<AwardOutcome> {
        if award.delta == 0 {
            return Ok(AwardOutcome::Unchanged {
                total: self.balance(award.entity_id).await?,
            });
        }
        award.scope.validate()?;

        let slot = self.slot(award.entity_id)?;
        let mut slot = slot.lock().await;

        if let Some(key) = award.key
            && slot.applied_keys.contains(&key)
        {
            let total = slot.entry.as_ref().map_or(0, |e| e.current_points);
            tracing::debug!(entity = %award.entity_id, %key, "duplicate award ignored");
            return Ok(AwardOutcome::Duplicate { total });
        }

        let now = self.clock.now();
        let entry = slot
            .entry
            .get_or_insert_with(|| LedgerEntry::new(award.entity_id, award.scope, now));
        let total = entry.apply(award.delta, &award.reason, now);
        if let Some(key) = award.key {
            slot.applied_keys.insert(key);
        }

        Ok(AwardOutcome::Credited { total })
    }

    async fn balance(&self, entity_id: EntityId) -> Result<i64> {
        let Some(slot) = self.existing_slot(entity_id)? else {
            return Ok(0);
        };
        let slot = slot.lock().await;
        Ok(slot.entry.as_ref().map_or(0, |e| e.current_points))
    }

    async fn entry(&self, entity_id: EntityId) -> Result<Option<LedgerEntry>> {
        let Some(slot) = self.existing_slot(entity_id)? else {
            return Ok(None);
        };
        let slot = slot.lock().await;
        Ok(slot.entry.clone())
    }
}
