//! Daily reset: reopen daily tasks completed since the last pass.
//!
//! Triggered externally on [`ResetSchedule::interval`]. Each eligible task is
//! patched against the version it was read at; a task that changed in
//! between is skipped and picked up by the next pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::Instrument;

use super::DEFAULT_RESET_INTERVAL;
use super::guard::{CallOptions, bounded};
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{TaskFilter, TaskPatch, TaskStore};
use crate::telemetry::{metrics, spans};

pub const RESET_DAILY_TASKS: &str = "RESET_DAILY_TASKS";

/// Descriptor handed to whatever drives the periodic trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetSchedule {
    pub name: &'static str,
    pub interval: Duration,
}

pub struct DailyReset<T> {
    tasks: Arc<T>,
    interval: Duration,
}

impl<T: TaskStore> DailyReset<T> {
    pub fn new(tasks: Arc<T>) -> Self {
        Self {
            tasks,
            interval: DEFAULT_RESET_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn schedule(&self) -> ResetSchedule {
        ResetSchedule {
            name: RESET_DAILY_TASKS,
            interval: self.interval,
        }
    }

    /// Reopen every daily task currently marked completed today.
    ///
    /// Returns how many tasks were reset. Streaks are left as they are.
    /// Running twice in a row resets nothing the second time.
    pub async fn reset_daily_tasks(&self, opts: &CallOptions) -> Result<usize> {
        let span = spans::reset_span();
        let started = Instant::now();

        let result = self.reset_inner(opts).instrument(span.clone()).await;

        if let Ok(count) = &result {
            span.record("tasks.reset", *count as u64);
        }
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "tasks.reset_daily")],
        );
        result
    }

    async fn reset_inner(&self, opts: &CallOptions) -> Result<usize> {
        let filter = TaskFilter::default()
            .category(Category::Daily)
            .completed(true);
        let candidates = bounded(opts, "task query", self.tasks.query(&filter)).await?;

        let mut reset = 0;
        let mut skipped = 0;
        for task in candidates {
            let Progress::Daily(daily) = &task.progress else {
                continue;
            };
            if !daily.completed_today {
                continue;
            }

            let patch = TaskPatch::new(task.version)
                .status(TaskStatus {
                    completed: false,
                    ..task.status
                })
                .progress(Progress::Daily(DailyProgress {
                    completed_today: false,
                    ..daily.clone()
                }));

            match bounded(opts, "task update", self.tasks.update(task.id, patch)).await {
                Ok(_) => {
                    reset += 1;
                    tracing::debug!(task = %task.id, streak = daily.streak, "daily task reopened");
                }
                Err(Error::Conflict(reason)) => {
                    skipped += 1;
                    metrics::task_conflicts().add(1, &[KeyValue::new("operation", "reset")]);
                    tracing::warn!(task = %task.id, %reason, "task changed during reset, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        metrics::tasks_reset().add(reset as u64, &[KeyValue::new("result", "reset")]);
        if skipped > 0 {
            metrics::tasks_reset().add(skipped, &[KeyValue::new("result", "skipped")]);
        }
        tracing::info!(reset, skipped, "daily reset finished");
        Ok(reset)
    }
}
