//! Completion: precondition checks, task mutation, ledger credit.
//!
//! The task write happens first and records `points_awarded`. The ledger
//! award follows under an idempotency key derived from the task id and the
//! completion time. If the award does not land, the caller gets
//! [`Error::AwardPending`] and can settle it later with
//! [`CompletionEngine::retry_award`]; the key makes that retry safe.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::Instrument;
use uuid::Uuid;

use super::guard::{CallOptions, bounded};
use super::policy::{self, Assessment};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::matcher::{TaskMatch, TaskMatcher};
use crate::model::*;
use crate::store::{LedgerStore, TaskFilter, TaskPatch, TaskStore};
use crate::telemetry::{metrics, spans};

/// Task update retries after losing an optimistic race.
pub const DEFAULT_TASK_CONFLICT_RETRIES: u32 = 3;

/// What a completion produced, for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub task_id: TaskId,
    pub task_name: String,
    pub category: Category,
    pub points: i64,
    /// New streak, daily tasks only.
    pub streak: Option<u32>,
    /// One-off tasks only.
    pub on_time: Option<bool>,
    /// Ledger total after the award. `None` when nothing was awarded.
    pub total: Option<i64>,
    /// Key the award was issued under. `None` when nothing was awarded.
    pub award_key: Option<AwardKey>,
}

/// The Completion Policy Engine.
pub struct CompletionEngine<T, L> {
    tasks: Arc<T>,
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
    conflict_retries: u32,
}

impl<T: TaskStore, L: LedgerStore> CompletionEngine<T, L> {
    pub fn new(tasks: Arc<T>, ledger: Arc<L>) -> Self {
        Self {
            tasks,
            ledger,
            clock: Arc::new(SystemClock),
            conflict_retries: DEFAULT_TASK_CONFLICT_RETRIES,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Validate and store a new task. Its category is fixed from here on.
    pub async fn create_task(&self, new: NewTask, opts: &CallOptions) -> Result<TaskRecord> {
        let task = new.build(self.clock.now())?;
        let task = bounded(opts, "task create", self.tasks.create(task)).await?;
        tracing::info!(task = %task.id, name = %task.name, category = %task.category(), "task created");
        Ok(task)
    }

    /// Complete a task by id.
    pub async fn complete(
        &self,
        task_id: TaskId,
        actor: EntityId,
        scope: ScopeContext,
        opts: &CallOptions,
    ) -> Result<CompletionResult> {
        let task = bounded(opts, "task get", self.tasks.get(task_id)).await?;
        self.complete_task(task, actor, scope, opts).await
    }

    /// Complete an already-resolved task.
    ///
    /// `task` may be stale: the update is version-checked, and on conflict
    /// the task is re-read and the preconditions re-evaluated. A concurrent
    /// completion therefore surfaces here as `AlreadyCompleted`.
    pub async fn complete_task(
        &self,
        task: TaskRecord,
        actor: EntityId,
        scope: ScopeContext,
        opts: &CallOptions,
    ) -> Result<CompletionResult> {
        let span = spans::completion_span(task.id, actor);
        let started = Instant::now();
        let category = task.category();

        let result = self
            .complete_inner(task, actor, scope, opts)
            .instrument(span.clone())
            .await;

        let label = match &result {
            Ok(r) => {
                spans::record_outcome(&span, r.category, r.points);
                "ok"
            }
            Err(Error::AlreadyCompleted(_)) => "already_completed",
            Err(Error::TaskNotActionable(_)) => "not_actionable",
            Err(Error::AwardPending { .. }) => "award_pending",
            Err(_) => "error",
        };
        metrics::completions().add(
            1,
            &[
                KeyValue::new("category", category.as_str()),
                KeyValue::new("result", label),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "task.complete")],
        );

        result
    }

    async fn complete_inner(
        &self,
        mut task: TaskRecord,
        actor: EntityId,
        scope: ScopeContext,
        opts: &CallOptions,
    ) -> Result<CompletionResult> {
        scope.validate()?;
        for attempt in 0..=self.conflict_retries {
            ensure_actionable(&task)?;

            let assessment = policy::assess(&task, self.clock.now());
            let patch = TaskPatch::new(task.version)
                .status(TaskStatus {
                    completed: true,
                    ..task.status
                })
                .progress(assessment.progress.clone())
                .points_awarded(assessment.points)
                .completed_by(actor);

            match bounded(opts, "task update", self.tasks.update(task.id, patch)).await {
                Ok(updated) => {
                    tracing::debug!(
                        task = %updated.id,
                        category = %assessment.category,
                        points = assessment.points,
                        "task marked completed"
                    );
                    return self.credit(&updated, assessment, actor, scope, opts).await;
                }
                Err(Error::Conflict(reason)) => {
                    metrics::task_conflicts().add(1, &[KeyValue::new("operation", "complete")]);
                    tracing::warn!(
                        task = %task.id,
                        attempt,
                        %reason,
                        "task changed during completion, re-reading"
                    );
                    task = bounded(opts, "task get", self.tasks.get(task.id)).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::StoreUnavailable(format!(
            "task {} stayed contended after {} retries",
            task.id, self.conflict_retries
        )))
    }

    /// Credit the ledger for a task that was just written as completed.
    async fn credit(
        &self,
        task: &TaskRecord,
        assessment: Assessment,
        actor: EntityId,
        scope: ScopeContext,
        opts: &CallOptions,
    ) -> Result<CompletionResult> {
        let mut result = CompletionResult {
            task_id: task.id,
            task_name: task.name.clone(),
            category: assessment.category,
            points: assessment.points,
            streak: assessment.streak,
            on_time: assessment.on_time,
            total: None,
            award_key: None,
        };
        if assessment.points <= 0 {
            return Ok(result);
        }

        let key = AwardKey::new(task.id, assessment.completed_at);
        let outcome = self
            .award(
                task.id,
                key,
                assessment.points,
                assessment.category,
                &assessment.reason,
                actor,
                scope,
                opts,
            )
            .await?;
        result.total = Some(outcome.total());
        result.award_key = Some(key);
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn award(
        &self,
        task_id: TaskId,
        key: AwardKey,
        points: i64,
        category: Category,
        reason: &str,
        actor: EntityId,
        scope: ScopeContext,
        opts: &CallOptions,
    ) -> Result<AwardOutcome> {
        let award = Award::new(actor, points, reason, scope).idempotency_key(key);

        match bounded(opts, "ledger award", self.ledger.award(award)).await {
            Ok(outcome) => {
                match outcome {
                    AwardOutcome::Credited { total } => {
                        metrics::points_awarded().add(
                            points.unsigned_abs(),
                            &[KeyValue::new("category", category.as_str())],
                        );
                        tracing::info!(%actor, task = %task_id, points, total, reason, "points awarded");
                    }
                    AwardOutcome::Duplicate { total } => {
                        metrics::ledger_duplicates().add(1, &[]);
                        tracing::info!(%actor, task = %task_id, %key, total, "award already applied");
                    }
                    AwardOutcome::Unchanged { .. } => {}
                }
                Ok(outcome)
            }
            Err(source) => {
                tracing::error!(
                    %actor,
                    task = %task_id,
                    %key,
                    points,
                    error = %source,
                    "ledger award failed; task is completed with award pending"
                );
                Err(Error::AwardPending {
                    task_id,
                    key,
                    points,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Re-issue the award recorded on a completed task.
    ///
    /// Uses the same idempotency key as the first attempt, so calling this
    /// after a success (or twice) never credits twice. Only the entity that
    /// completed the task can be credited; any other actor is `Validation`.
    pub async fn retry_award(
        &self,
        task_id: TaskId,
        actor: EntityId,
        scope: ScopeContext,
        opts: &CallOptions,
    ) -> Result<CompletionResult> {
        scope.validate()?;
        let task = bounded(opts, "task get", self.tasks.get(task_id)).await?;
        let completed_at = match task.progress.completed_at() {
            Some(at) if task.status.completed => at,
            _ => {
                return Err(Error::NotFound(format!(
                    "no recorded completion for task {task_id}"
                )));
            }
        };

        if task.completed_by != Some(actor) {
            return Err(Error::Validation(format!(
                "task {task_id} was not completed by {actor}"
            )));
        }

        let category = task.category();
        let points = task.points_awarded.unwrap_or(0);
        let (streak, on_time) = match &task.progress {
            Progress::Daily(d) => (Some(d.streak), None),
            Progress::OneOff(o) => (None, o.completed_on_time),
            _ => (None, None),
        };
        let mut result = CompletionResult {
            task_id,
            task_name: task.name.clone(),
            category,
            points,
            streak,
            on_time,
            total: None,
            award_key: None,
        };
        if points <= 0 {
            return Ok(result);
        }

        let key = AwardKey::new(task_id, completed_at);
        let reason = policy::award_reason(&task.name, &task.progress);
        let outcome = self
            .award(task_id, key, points, category, &reason, actor, scope, opts)
            .await?;
        result.total = Some(outcome.total());
        result.award_key = Some(key);
        Ok(result)
    }

    /// Current points for an entity.
    pub async fn balance(&self, entity_id: EntityId, opts: &CallOptions) -> Result<i64> {
        bounded(opts, "ledger balance", self.ledger.balance(entity_id)).await
    }

    /// Tasks that can be completed right now, optionally within one room.
    pub async fn actionable_tasks(
        &self,
        room_id: Option<Uuid>,
        opts: &CallOptions,
    ) -> Result<Vec<TaskRecord>> {
        let mut filter = TaskFilter::default().completed(false).awaiting_choice(false);
        if let Some(room) = room_id {
            filter = filter.room(room);
        }
        bounded(opts, "task query", self.tasks.query(&filter)).await
    }

    /// Resolve a free-text reference against the room's actionable tasks and
    /// complete the match.
    ///
    /// The matcher is asked once. "Not found", or an id that is not among
    /// the candidates, is `Error::NotFound`.
    pub async fn complete_from_utterance<M: TaskMatcher + ?Sized>(
        &self,
        matcher: &M,
        utterance: &str,
        actor: EntityId,
        scope: ScopeContext,
        opts: &CallOptions,
    ) -> Result<CompletionResult> {
        let candidates = self.actionable_tasks(Some(scope.room_id), opts).await?;
        if candidates.is_empty() {
            return Err(Error::NotFound("no incomplete tasks in this room".to_string()));
        }

        let task_id = match matcher.match_task(utterance, &candidates).await? {
            TaskMatch::Found(id) => id,
            TaskMatch::NotFound => {
                return Err(Error::NotFound(format!("no task matches {utterance:?}")));
            }
        };
        let Some(task) = candidates.into_iter().find(|t| t.id == task_id) else {
            return Err(Error::NotFound(format!(
                "matched task {task_id} is not an incomplete task in this room"
            )));
        };

        self.complete_task(task, actor, scope, opts).await
    }
}

fn ensure_actionable(task: &TaskRecord) -> Result<()> {
    if task.status.completed {
        return Err(Error::AlreadyCompleted(task.id));
    }
    if task.status.awaiting_choice {
        return Err(Error::TaskNotActionable(task.id));
    }
    Ok(())
}
