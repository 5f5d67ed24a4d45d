//! Completion scoring.
//!
//! Pure functions: given a task and the completion time, decide the points,
//! the progress to store, and the ledger reason. No I/O.

use chrono::{DateTime, Utc};

use crate::model::*;

pub const DAILY_BASE_POINTS: i64 = 10;
pub const STREAK_BONUS_PER_DAY: i64 = 5;
pub const STREAK_BONUS_CAP: i64 = 50;
pub const LATE_POINTS: i64 = 5;
pub const URGENT_BONUS: i64 = 10;
pub const ASPIRATIONAL_POINTS: i64 = 50;

/// Bonus for reaching `streak` consecutive completions. The first day earns none.
pub fn streak_bonus(streak: u32) -> i64 {
    if streak > 1 {
        (i64::from(streak) * STREAK_BONUS_PER_DAY).min(STREAK_BONUS_CAP)
    } else {
        0
    }
}

/// Points for finishing a one-off task.
///
/// On time: P1=40, P2=30, P3=20, P4=10, plus 10 if urgent. Late: a flat 5.
pub fn one_off_points(priority: Priority, urgent: bool, on_time: bool) -> i64 {
    if !on_time {
        return LATE_POINTS;
    }
    (5 - i64::from(priority.get())) * 10 + if urgent { URGENT_BONUS } else { 0 }
}

/// Scoring decision for one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub category: Category,
    pub points: i64,
    /// New streak, daily tasks only.
    pub streak: Option<u32>,
    /// One-off tasks only.
    pub on_time: Option<bool>,
    /// Progress to store alongside the `completed` flag.
    pub progress: Progress,
    pub completed_at: DateTime<Utc>,
    pub reason: String,
}

/// Score completing `task` at `now`.
pub fn assess(task: &TaskRecord, now: DateTime<Utc>) -> Assessment {
    let (points, streak, on_time, progress) = match &task.progress {
        Progress::Daily(daily) => {
            let streak = daily.streak + 1;
            let points = DAILY_BASE_POINTS + streak_bonus(streak);
            let progress = Progress::Daily(DailyProgress {
                streak,
                last_completed_at: Some(now),
                completed_today: true,
            });
            (points, Some(streak), None, progress)
        }
        Progress::OneOff(one_off) => {
            let on_time = one_off.due_date.is_none_or(|due| now <= due);
            let points = one_off_points(task.priority, task.urgent, on_time);
            let progress = Progress::OneOff(OneOffProgress {
                due_date: one_off.due_date,
                completed_at: Some(now),
                completed_on_time: Some(on_time),
            });
            (points, None, Some(on_time), progress)
        }
        Progress::Aspirational(_) => {
            let progress = Progress::Aspirational(Milestone {
                completed_at: Some(now),
            });
            (ASPIRATIONAL_POINTS, None, None, progress)
        }
        Progress::Generic(_) => {
            let progress = Progress::Generic(Milestone {
                completed_at: Some(now),
            });
            (0, None, None, progress)
        }
    };

    Assessment {
        category: task.category(),
        points,
        streak,
        on_time,
        reason: award_reason(&task.name, &progress),
        progress,
        completed_at: now,
    }
}

/// Ledger reason for a task in its completed state.
pub fn award_reason(name: &str, progress: &Progress) -> String {
    match progress {
        Progress::Daily(d) => {
            format!("Completed daily task \"{name}\" (Streak: {})", d.streak)
        }
        Progress::OneOff(o) => {
            let timing = if o.completed_on_time.unwrap_or(true) {
                "On time"
            } else {
                "Late"
            };
            format!("Completed one-off task \"{name}\" ({timing})")
        }
        Progress::Aspirational(_) => format!("Achieved aspirational goal \"{name}\""),
        Progress::Generic(_) => format!("Completed task \"{name}\""),
    }
}
