//! Metric instrument factories for ascend.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments come from the `"ascend"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("ascend")
}

/// Counter: completion attempts.
/// Labels: `category`, `result` ("ok" | "already_completed" | "not_actionable" | "award_pending" | "error").
pub fn completions() -> Counter<u64> {
    meter()
        .u64_counter("ascend.completions")
        .with_description("Task completion attempts")
        .build()
}

/// Counter: points credited to ledgers.
/// Labels: `category`.
pub fn points_awarded() -> Counter<u64> {
    meter()
        .u64_counter("ascend.points.awarded")
        .with_description("Points credited to ledgers")
        .build()
}

/// Counter: ledger updates that failed their version check and were retried.
/// Labels: `store` ("postgres").
pub fn ledger_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("ascend.ledger.conflicts")
        .with_description("Ledger version conflicts")
        .build()
}

/// Counter: task updates that lost an optimistic race.
/// Labels: `operation` ("complete" | "reset").
pub fn task_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("ascend.tasks.conflicts")
        .with_description("Task version conflicts")
        .build()
}

/// Counter: awards skipped because their idempotency key was already applied.
pub fn ledger_duplicates() -> Counter<u64> {
    meter()
        .u64_counter("ascend.ledger.duplicates")
        .with_description("Duplicate awards ignored")
        .build()
}

/// Counter: daily tasks reactivated by the reset scheduler.
/// Labels: `result` ("reset" | "skipped").
pub fn tasks_reset() -> Counter<u64> {
    meter()
        .u64_counter("ascend.tasks.reset")
        .with_description("Daily tasks reactivated")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ascend.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
