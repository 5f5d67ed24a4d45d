//! Span helpers for completions and resets.

use tracing::Span;

use crate::model::{Category, EntityId, TaskId};

/// Start a span for one completion.
///
/// `task.category` and `task.points` are filled in by [`record_outcome`].
pub fn completion_span(task_id: TaskId, actor: EntityId) -> Span {
    tracing::info_span!(
        "task.complete",
        "task.id" = %task_id,
        "actor.id" = %actor,
        "task.category" = tracing::field::Empty,
        "task.points" = tracing::field::Empty,
    )
}

/// Start a span for a daily reset pass.
pub fn reset_span() -> Span {
    tracing::info_span!("tasks.reset_daily", "tasks.reset" = tracing::field::Empty)
}

/// Record the scoring result on a completion span.
pub fn record_outcome(span: &Span, category: Category, points: i64) {
    span.record("task.category", category.as_str());
    span.record("task.points", points);
}
