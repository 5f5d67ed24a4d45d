//! Core data model.
//!
//! A task is an objective the user registers. Its category decides how
//! completion is scored; its progress payload carries only the fields that
//! category needs. A ledger entry is a user's running score with a short
//! audit trail of recent awards.

pub mod ledger;
pub mod task;

pub use ledger::{
    Award, AwardKey, AwardOutcome, EntityId, HistoryEntry, LedgerEntry, MAX_HISTORY, ScopeContext,
};
pub use task::{
    Category, DailyProgress, Milestone, NewTask, OneOffProgress, Priority, Progress, TaskId,
    TaskRecord, TaskStatus,
};
