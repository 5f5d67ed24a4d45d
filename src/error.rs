//! Error types for ascend.

use thiserror::Error;

use crate::model::{AwardKey, TaskId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("task {0} is already completed")]
    AlreadyCompleted(TaskId),

    #[error("task {0} is awaiting a choice and cannot be completed")]
    TaskNotActionable(TaskId),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("conflicting update: {0}")]
    Conflict(String),

    /// The task was marked completed but the ledger was not credited.
    /// Re-issue the award with `key` to settle it.
    #[error("task {task_id} completed but awarding {points} points is pending: {source}")]
    AwardPending {
        task_id: TaskId,
        key: AwardKey,
        points: i64,
        #[source]
        source: Box<Error>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same call (with the same idempotency key, where
    /// one applies) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::Conflict(_) | Error::AwardPending { .. }
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row".to_string()),
            other => Error::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Error::StoreUnavailable(format!("migration failed: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("serialization error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
