//! Integration tests for the completion engine over the in-memory stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ascend::clock::{Clock, FixedClock};
use ascend::engine::{CallOptions, CompletionEngine};
use ascend::error::{Error, Result};
use ascend::matcher::{NameMatcher, TaskMatch, TaskMatcher};
use ascend::model::*;
use ascend::store::{LedgerStore, MemoryLedgerStore, MemoryTaskStore, TaskStore};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Engine = CompletionEngine<MemoryTaskStore, MemoryLedgerStore>;

struct Harness {
    engine: Engine,
    tasks: Arc<MemoryTaskStore>,
    ledger: Arc<MemoryLedgerStore>,
    clock: Arc<FixedClock>,
    actor: EntityId,
    scope: ScopeContext,
}

fn harness() -> Harness {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap(),
    ));
    let tasks = Arc::new(MemoryTaskStore::with_clock(clock.clone()));
    let ledger = Arc::new(MemoryLedgerStore::with_clock(clock.clone()));
    let engine = CompletionEngine::new(tasks.clone(), ledger.clone()).with_clock(clock.clone());
    Harness {
        engine,
        tasks,
        ledger,
        clock,
        actor: EntityId::new(),
        scope: ScopeContext::new(Uuid::new_v4(), Uuid::new_v4()),
    }
}

impl Harness {
    async fn add(&self, new: NewTask) -> TaskRecord {
        self.engine
            .create_task(new.room(self.scope.room_id), &CallOptions::new())
            .await
            .unwrap()
    }

    async fn complete(&self, id: TaskId) -> Result<ascend::engine::CompletionResult> {
        self.engine
            .complete(id, self.actor, self.scope, &CallOptions::new())
            .await
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn daily_task_with_streak_two_awards_25() {
    let h = harness();
    let task = h.add(NewTask::new("Pushups", Category::Daily).streak(2)).await;

    let result = h.complete(task.id).await.unwrap();
    assert_eq!(result.points, 25);
    assert_eq!(result.streak, Some(3));
    assert_eq!(result.total, Some(25));

    let stored = h.tasks.get(task.id).await.unwrap();
    assert!(stored.status.completed);
    assert_eq!(stored.points_awarded, Some(25));
    match stored.progress {
        Progress::Daily(d) => {
            assert_eq!(d.streak, 3);
            assert!(d.completed_today);
            assert_eq!(d.last_completed_at, Some(h.clock.now()));
        }
        other => panic!("expected daily progress, got {other:?}"),
    }

    let entry = h.ledger.entry(h.actor).await.unwrap().unwrap();
    assert_eq!(entry.current_points, 25);
    assert_eq!(
        entry.last_reason.as_deref(),
        Some("Completed daily task \"Pushups\" (Streak: 3)")
    );
    assert_eq!(entry.scope, h.scope);
}

#[tokio::test]
async fn one_off_on_time_priority_two_awards_30() {
    let h = harness();
    let due = h.clock.now() + Duration::days(2);
    let task = h
        .add(NewTask::from_tags("Finish taxes", &["one-off", "priority-2"]).due(due))
        .await;

    let result = h.complete(task.id).await.unwrap();
    assert_eq!(result.points, 30);
    assert_eq!(result.on_time, Some(true));
}

#[tokio::test]
async fn one_off_past_due_awards_5() {
    let h = harness();
    let due = h.clock.now() - Duration::hours(3);
    let task = h
        .add(NewTask::from_tags("Renew passport", &["one-off", "priority-1", "urgent"]).due(due))
        .await;

    let result = h.complete(task.id).await.unwrap();
    assert_eq!(result.points, 5);
    assert_eq!(result.on_time, Some(false));
    let entry = h.ledger.entry(h.actor).await.unwrap().unwrap();
    assert!(entry.last_reason.unwrap().ends_with("(Late)"));
}

#[tokio::test]
async fn aspirational_awards_50() {
    let h = harness();
    let task = h.add(NewTask::from_tags("Run a marathon", &["aspirational"])).await;
    assert_eq!(h.complete(task.id).await.unwrap().points, 50);
}

#[tokio::test]
async fn generic_completion_leaves_ledger_untouched() {
    let h = harness();
    let task = h.add(NewTask::from_tags("Water plants", &[])).await;

    let result = h.complete(task.id).await.unwrap();
    assert_eq!(result.category, Category::Generic);
    assert_eq!(result.points, 0);
    assert_eq!(result.total, None);
    assert!(h.ledger.entry(h.actor).await.unwrap().is_none());
    assert!(h.tasks.get(task.id).await.unwrap().status.completed);
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_completion_is_rejected_and_ledger_unchanged() {
    let h = harness();
    let task = h.add(NewTask::new("Stretch", Category::Daily)).await;
    h.complete(task.id).await.unwrap();

    let err = h.complete(task.id).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyCompleted(id) if id == task.id));
    assert_eq!(h.ledger.balance(h.actor).await.unwrap(), 10);
    assert_eq!(h.ledger.entry(h.actor).await.unwrap().unwrap().history.len(), 1);
}

#[tokio::test]
async fn awaiting_choice_is_not_actionable() {
    let h = harness();
    let task = h
        .add(NewTask::from_tags("Pick a hobby", &["aspirational", "AWAITING_CHOICE"]))
        .await;

    let err = h.complete(task.id).await.unwrap_err();
    assert!(matches!(err, Error::TaskNotActionable(_)));
    assert!(!h.tasks.get(task.id).await.unwrap().status.completed);
    assert_eq!(h.ledger.balance(h.actor).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let h = harness();
    let err = h.complete(TaskId::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn nil_scope_is_rejected_before_crediting() {
    let h = harness();
    let task = h.add(NewTask::new("Pushups", Category::Daily)).await;
    let scope = ScopeContext::new(Uuid::nil(), Uuid::new_v4());

    let err = h
        .engine
        .complete(task.id, h.actor, scope, &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(!h.tasks.get(task.id).await.unwrap().status.completed);
    assert_eq!(h.ledger.balance(h.actor).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_credit_once() {
    let h = Arc::new(harness());
    let task = h.add(NewTask::new("Meditate", Category::Daily)).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        handles.push(tokio::spawn(async move { h.complete(task.id).await }));
    }

    let mut ok = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(Error::AlreadyCompleted(_)) => already += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(already, 7);
    assert_eq!(h.ledger.balance(h.actor).await.unwrap(), 10);
}

// ---------------------------------------------------------------------------
// Award failures and retry
// ---------------------------------------------------------------------------

/// Ledger that fails while `down` is set.
struct FlakyLedger {
    inner: MemoryLedgerStore,
    down: AtomicBool,
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn award(&self, award: Award) -> Result<AwardOutcome> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("ledger offline".to_string()));
        }
        self.inner.award(award).await
    }

    async fn balance(&self, entity_id: EntityId) -> Result<i64> {
        self.inner.balance(entity_id).await
    }

    async fn entry(&self, entity_id: EntityId) -> Result<Option<LedgerEntry>> {
        self.inner.entry(entity_id).await
    }
}

#[tokio::test]
async fn failed_award_is_pending_and_retry_credits_once() {
    let tasks = Arc::new(MemoryTaskStore::new());
    let ledger = Arc::new(FlakyLedger {
        inner: MemoryLedgerStore::new(),
        down: AtomicBool::new(true),
    });
    let engine = CompletionEngine::new(tasks.clone(), ledger.clone());
    let actor = EntityId::new();
    let scope = ScopeContext::new(Uuid::new_v4(), Uuid::new_v4());
    let opts = CallOptions::new();

    let task = engine
        .create_task(NewTask::from_tags("Call the bank", &["one-off", "priority-3"]), &opts)
        .await
        .unwrap();

    match engine.complete(task.id, actor, scope, &opts).await {
        Err(Error::AwardPending {
            task_id, points, ..
        }) => {
            assert_eq!(task_id, task.id);
            assert_eq!(points, 20);
        }
        other => panic!("expected AwardPending, got {other:?}"),
    }
    assert!(tasks.get(task.id).await.unwrap().status.completed);
    assert_eq!(ledger.balance(actor).await.unwrap(), 0);

    ledger.down.store(false, Ordering::SeqCst);
    let retried = engine.retry_award(task.id, actor, scope, &opts).await.unwrap();
    assert_eq!(retried.total, Some(20));

    let again = engine.retry_award(task.id, actor, scope, &opts).await.unwrap();
    assert_eq!(again.total, Some(20));
    assert_eq!(ledger.balance(actor).await.unwrap(), 20);
    assert_eq!(ledger.entry(actor).await.unwrap().unwrap().history.len(), 1);
}

#[tokio::test]
async fn retry_award_only_credits_the_completing_entity() {
    let h = harness();
    let opts = CallOptions::new();
    let task = h.add(NewTask::new("Write a novel", Category::Aspirational)).await;
    assert_eq!(h.complete(task.id).await.unwrap().total, Some(50));
    assert_eq!(h.tasks.get(task.id).await.unwrap().completed_by, Some(h.actor));

    for _ in 0..3 {
        let other = EntityId::new();
        let err = h
            .engine
            .retry_award(task.id, other, h.scope, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.ledger.balance(other).await.unwrap(), 0);
        assert!(h.ledger.entry(other).await.unwrap().is_none());
    }

    let own = h
        .engine
        .retry_award(task.id, h.actor, h.scope, &opts)
        .await
        .unwrap();
    assert_eq!(own.total, Some(50));
    assert_eq!(h.ledger.balance(h.actor).await.unwrap(), 50);
}

#[tokio::test]
async fn retry_award_on_open_task_is_not_found() {
    let h = harness();
    let task = h.add(NewTask::new("Pushups", Category::Daily)).await;
    let err = h
        .engine
        .retry_award(task.id, h.actor, h.scope, &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn cancelled_call_does_not_report_success() {
    let h = harness();
    let task = h.add(NewTask::new("Pushups", Category::Daily)).await;

    let token = CancellationToken::new();
    token.cancel();
    let opts = CallOptions::new().cancel_with(token);
    let err = h
        .engine
        .complete(task.id, h.actor, h.scope, &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(!h.tasks.get(task.id).await.unwrap().status.completed);
    assert_eq!(h.ledger.balance(h.actor).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Utterance matching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn utterance_completes_matching_task() {
    let h = harness();
    h.add(NewTask::new("Read", Category::Daily)).await;
    let pushups = h.add(NewTask::new("Pushups", Category::Daily)).await;

    let result = h
        .engine
        .complete_from_utterance(
            &NameMatcher,
            "just finished my pushups",
            h.actor,
            h.scope,
            &CallOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.task_id, pushups.id);
    assert_eq!(result.points, 10);
}

#[tokio::test]
async fn utterance_without_match_is_not_found() {
    let h = harness();
    h.add(NewTask::new("Pushups", Category::Daily)).await;

    let err = h
        .engine
        .complete_from_utterance(
            &NameMatcher,
            "walked the dog",
            h.actor,
            h.scope,
            &CallOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

/// Matcher that names a task outside the candidate list.
struct StrayMatcher(TaskId);

#[async_trait]
impl TaskMatcher for StrayMatcher {
    async fn match_task(&self, _: &str, _: &[TaskRecord]) -> Result<TaskMatch> {
        Ok(TaskMatch::Found(self.0))
    }
}

#[tokio::test]
async fn matched_id_outside_room_is_not_found() {
    let h = harness();
    h.add(NewTask::new("Pushups", Category::Daily)).await;
    let elsewhere = h
        .engine
        .create_task(
            NewTask::new("Pushups", Category::Daily).room(Uuid::new_v4()),
            &CallOptions::new(),
        )
        .await
        .unwrap();

    let err = h
        .engine
        .complete_from_utterance(
            &StrayMatcher(elsewhere.id),
            "pushups",
            h.actor,
            h.scope,
            &CallOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(!h.tasks.get(elsewhere.id).await.unwrap().status.completed);
}

#[tokio::test]
async fn actionable_tasks_exclude_completed_and_awaiting() {
    let h = harness();
    let open = h.add(NewTask::new("Pushups", Category::Daily)).await;
    let done = h.add(NewTask::new("Read", Category::Daily)).await;
    h.add(NewTask::from_tags("Pick one", &["AWAITING_CHOICE"])).await;
    h.complete(done.id).await.unwrap();

    let actionable = h
        .engine
        .actionable_tasks(Some(h.scope.room_id), &CallOptions::new())
        .await
        .unwrap();
    let ids: Vec<TaskId> = actionable.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![open.id]);
}
