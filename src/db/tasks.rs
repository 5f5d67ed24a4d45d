//! Task persistence with version-checked updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{TaskFilter, TaskPatch, TaskStore};

const TASK_COLUMNS: &str = "id, name, room_id, category, completed, awaiting_choice, priority, urgent, progress, points_awarded, completed_by, version, created_at, updated_at";

#[async_trait]
impl TaskStore for super::Db {
    async fn get(&self, id: TaskId) -> Result<TaskRecord> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("task {id}")))?
            .try_into_task()
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE ($1::text IS NULL OR category = $1)
             AND ($2::bool IS NULL OR completed = $2)
             AND ($3::bool IS NULL OR awaiting_choice = $3)
             AND ($4::uuid IS NULL OR room_id = $4)
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(filter.category.map(Category::as_str))
        .bind(filter.completed)
        .bind(filter.awaiting_choice)
        .bind(filter.room_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn create(&self, task: TaskRecord) -> Result<TaskRecord> {
        let inserted = sqlx::query(
            "INSERT INTO tasks (id, name, room_id, category, completed, awaiting_choice, priority, urgent, progress, points_awarded, completed_by, version, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(task.id.0)
        .bind(&task.name)
        .bind(task.room_id)
        .bind(task.category().as_str())
        .bind(task.status.completed)
        .bind(task.status.awaiting_choice)
        .bind(i16::from(task.priority.get()))
        .bind(task.urgent)
        .bind(serde_json::to_value(&task.progress)?)
        .bind(task.points_awarded)
        .bind(task.completed_by.map(|e| e.0))
        .bind(task.version)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(self.pool())
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(Error::Validation(format!("task {} already exists", task.id)));
        }
        Ok(task)
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskRecord> {
        let mut task = TaskStore::get(self, id).await?;
        patch.apply_to(&mut task, SystemClock.now())?;

        // The WHERE clause re-checks the version: another writer may have
        // committed between the read above and this statement.
        let rows_affected = sqlx::query(
            "UPDATE tasks SET completed = $1, awaiting_choice = $2, progress = $3, points_awarded = $4, completed_by = $5, version = $6, updated_at = $7
             WHERE id = $8 AND version = $9",
        )
        .bind(task.status.completed)
        .bind(task.status.awaiting_choice)
        .bind(serde_json::to_value(&task.progress)?)
        .bind(task.points_awarded)
        .bind(task.completed_by.map(|e| e.0))
        .bind(task.version)
        .bind(task.updated_at)
        .bind(id.0)
        .bind(patch.expected_version)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::Conflict(format!(
                "task {id} changed since version {}",
                patch.expected_version
            )));
        }
        Ok(task)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    name: String,
    room_id: Option<Uuid>,
    category: String,
    completed: bool,
    awaiting_choice: bool,
    priority: i16,
    urgent: bool,
    progress: serde_json::Value,
    points_awarded: Option<i64>,
    completed_by: Option<Uuid>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<TaskRecord> {
        let category: Category = self.category.parse()?;
        let progress: Progress = serde_json::from_value(self.progress)?;
        if progress.category() != category {
            return Err(Error::Other(format!(
                "task {} stored as {category} but progress is {}",
                self.id,
                progress.category()
            )));
        }

        Ok(TaskRecord {
            id: TaskId(self.id),
            name: self.name,
            room_id: self.room_id,
            status: TaskStatus {
                completed: self.completed,
                awaiting_choice: self.awaiting_choice,
            },
            priority: Priority::new(i64::from(self.priority)),
            urgent: self.urgent,
            progress,
            points_awarded: self.points_awarded,
            completed_by: self.completed_by.map(EntityId),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
