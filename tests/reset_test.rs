//! Integration tests for the daily reset scheduler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ascend::engine::{CallOptions, CompletionEngine, DailyReset, RESET_DAILY_TASKS};
use ascend::error::Result;
use ascend::model::*;
use ascend::store::{MemoryLedgerStore, MemoryTaskStore, TaskFilter, TaskPatch, TaskStore};
use async_trait::async_trait;
use uuid::Uuid;

fn actor() -> (EntityId, ScopeContext) {
    (
        EntityId::new(),
        ScopeContext::new(Uuid::new_v4(), Uuid::new_v4()),
    )
}

#[tokio::test]
async fn reset_reopens_daily_tasks_and_keeps_streak() {
    let tasks = Arc::new(MemoryTaskStore::new());
    let engine = CompletionEngine::new(tasks.clone(), Arc::new(MemoryLedgerStore::new()));
    let reset = DailyReset::new(tasks.clone());
    let (who, scope) = actor();
    let opts = CallOptions::new();

    let daily = engine
        .create_task(NewTask::new("Pushups", Category::Daily).streak(4), &opts)
        .await
        .unwrap();
    engine.complete(daily.id, who, scope, &opts).await.unwrap();

    assert_eq!(reset.reset_daily_tasks(&opts).await.unwrap(), 1);

    let stored = tasks.get(daily.id).await.unwrap();
    assert!(!stored.status.completed);
    let Progress::Daily(progress) = stored.progress else {
        panic!("expected daily progress");
    };
    assert_eq!(progress.streak, 5);
    assert!(!progress.completed_today);
    assert!(progress.last_completed_at.is_some());

    let next = engine.complete(daily.id, who, scope, &opts).await.unwrap();
    assert_eq!(next.streak, Some(6));
}

#[tokio::test]
async fn second_reset_in_a_row_changes_nothing() {
    let tasks = Arc::new(MemoryTaskStore::new());
    let engine = CompletionEngine::new(tasks.clone(), Arc::new(MemoryLedgerStore::new()));
    let reset = DailyReset::new(tasks.clone());
    let (who, scope) = actor();
    let opts = CallOptions::new();

    for name in ["Pushups", "Read"] {
        let t = engine
            .create_task(NewTask::new(name, Category::Daily), &opts)
            .await
            .unwrap();
        engine.complete(t.id, who, scope, &opts).await.unwrap();
    }

    assert_eq!(reset.reset_daily_tasks(&opts).await.unwrap(), 2);
    let after_first = tasks.query(&TaskFilter::default()).await.unwrap();

    assert_eq!(reset.reset_daily_tasks(&opts).await.unwrap(), 0);
    let after_second = tasks.query(&TaskFilter::default()).await.unwrap();
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn non_daily_and_open_tasks_are_untouched() {
    let tasks = Arc::new(MemoryTaskStore::new());
    let engine = CompletionEngine::new(tasks.clone(), Arc::new(MemoryLedgerStore::new()));
    let reset = DailyReset::new(tasks.clone());
    let (who, scope) = actor();
    let opts = CallOptions::new();

    let one_off = engine
        .create_task(NewTask::new("Taxes", Category::OneOff), &opts)
        .await
        .unwrap();
    engine.complete(one_off.id, who, scope, &opts).await.unwrap();
    let open_daily = engine
        .create_task(NewTask::new("Stretch", Category::Daily), &opts)
        .await
        .unwrap();

    assert_eq!(reset.reset_daily_tasks(&opts).await.unwrap(), 0);
    assert!(tasks.get(one_off.id).await.unwrap().status.completed);
    assert_eq!(tasks.get(open_daily.id).await.unwrap(), open_daily);
}

/// Task store that bumps a task's version between the scan and the update,
/// the way a concurrent writer would.
struct RacingStore {
    inner: MemoryTaskStore,
    raced: AtomicBool,
}

#[async_trait]
impl TaskStore for RacingStore {
    async fn get(&self, id: TaskId) -> Result<TaskRecord> {
        self.inner.get(id).await
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        self.inner.query(filter).await
    }

    async fn create(&self, task: TaskRecord) -> Result<TaskRecord> {
        self.inner.create(task).await
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskRecord> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let current = self.inner.get(id).await?;
            self.inner.update(id, TaskPatch::new(current.version)).await?;
        }
        self.inner.update(id, patch).await
    }
}

#[tokio::test]
async fn conflicting_task_is_skipped_and_reset_next_pass() {
    let store = Arc::new(RacingStore {
        inner: MemoryTaskStore::new(),
        raced: AtomicBool::new(true),
    });
    let engine = CompletionEngine::new(store.clone(), Arc::new(MemoryLedgerStore::new()));
    let reset = DailyReset::new(store.clone());
    let (who, scope) = actor();
    let opts = CallOptions::new();

    let daily = engine
        .create_task(NewTask::new("Pushups", Category::Daily), &opts)
        .await
        .unwrap();
    engine.complete(daily.id, who, scope, &opts).await.unwrap();

    store.raced.store(false, Ordering::SeqCst);
    assert_eq!(reset.reset_daily_tasks(&opts).await.unwrap(), 0);
    assert!(store.get(daily.id).await.unwrap().status.completed);

    assert_eq!(reset.reset_daily_tasks(&opts).await.unwrap(), 1);
    assert!(!store.get(daily.id).await.unwrap().status.completed);
}

#[test]
fn schedule_names_the_job_and_interval() {
    let reset = DailyReset::new(Arc::new(MemoryTaskStore::new()))
        .with_interval(Duration::from_secs(3600));
    let schedule = reset.schedule();
    assert_eq!(schedule.name, RESET_DAILY_TASKS);
    assert_eq!(schedule.interval, Duration::from_secs(3600));
    assert_eq!(reset.interval(), Duration::from_secs(3600));
}
