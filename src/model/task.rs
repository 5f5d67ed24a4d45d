//! Task records and their category-shaped progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ledger::EntityId;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Newtype for task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|e| Error::Validation(format!("invalid task id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// How a task is scored on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Recurs every day; completion builds a streak.
    Daily,
    /// Done once, optionally against a deadline.
    OneOff,
    /// A long-horizon goal worth a fixed bonus.
    Aspirational,
    /// Anything else. Tracked, never scored.
    Generic,
}

impl Category {
    /// Classification tags in tie-break order. The first one present wins.
    const PRECEDENCE: [(&'static str, Category); 3] = [
        ("daily", Category::Daily),
        ("one-off", Category::OneOff),
        ("aspirational", Category::Aspirational),
    ];

    /// Resolve a category from a tag set.
    ///
    /// Tags that are not classification tags are ignored. If several are
    /// present, `daily` beats `one-off` beats `aspirational`. No
    /// classification tag at all yields `Generic`.
    pub fn classify<'a>(tags: impl IntoIterator<Item = &'a str>) -> Category {
        let tags: Vec<&str> = tags.into_iter().collect();
        let matched: Vec<Category> = Self::PRECEDENCE
            .iter()
            .filter(|(tag, _)| tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
            .map(|(_, category)| *category)
            .collect();

        if matched.len() > 1 {
            tracing::warn!(
                ?matched,
                chosen = %matched[0],
                "multiple classification tags, using highest precedence"
            );
        }
        matched.first().copied().unwrap_or(Category::Generic)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Daily => "daily",
            Category::OneOff => "one_off",
            Category::Aspirational => "aspirational",
            Category::Generic => "generic",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Category::Daily),
            "one_off" | "one-off" => Ok(Category::OneOff),
            "aspirational" => Ok(Category::Aspirational),
            "generic" => Ok(Category::Generic),
            _ => Err(Error::Validation(format!("unknown category: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Task priority, 1 (highest) through 4 (lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const LOWEST: Priority = Priority(4);

    /// Build a priority, defaulting anything outside 1..=4 to the lowest.
    pub fn new(raw: i64) -> Self {
        match u8::try_from(raw) {
            Ok(p @ 1..=4) => Priority(p),
            _ => {
                tracing::warn!(raw, "priority out of range, defaulting to 4");
                Self::LOWEST
            }
        }
    }

    /// Parse a `priority-N` tag. Missing or unparsable tags default to 4.
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Self {
        let Some(raw) = tags.into_iter().find_map(|t| t.strip_prefix("priority-")) else {
            return Self::LOWEST;
        };
        match raw.parse::<i64>() {
            Ok(n) => Self::new(n),
            Err(_) => {
                tracing::warn!(tag = raw, "unparsable priority tag, defaulting to 4");
                Self::LOWEST
            }
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::LOWEST
    }
}

impl From<i64> for Priority {
    fn from(raw: i64) -> Self {
        Self::new(raw)
    }
}

impl From<Priority> for i64 {
    fn from(p: Priority) -> Self {
        i64::from(p.0)
    }
}

// ---------------------------------------------------------------------------
// Status and progress
// ---------------------------------------------------------------------------

/// Status flags carried by every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskStatus {
    pub completed: bool,
    /// The task is waiting on a confirmation round with the user.
    pub awaiting_choice: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DailyProgress {
    pub streak: u32,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub completed_today: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OneOffProgress {
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_on_time: Option<bool>,
}

/// Progress for categories that only record when they were finished.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Milestone {
    pub completed_at: Option<DateTime<Utc>>,
}

/// Category-specific state. The variant is the task's category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Progress {
    Daily(DailyProgress),
    OneOff(OneOffProgress),
    Aspirational(Milestone),
    Generic(Milestone),
}

impl Progress {
    /// Fresh, never-completed progress for a category.
    pub fn empty(category: Category) -> Self {
        match category {
            Category::Daily => Progress::Daily(DailyProgress::default()),
            Category::OneOff => Progress::OneOff(OneOffProgress::default()),
            Category::Aspirational => Progress::Aspirational(Milestone::default()),
            Category::Generic => Progress::Generic(Milestone::default()),
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Progress::Daily(_) => Category::Daily,
            Progress::OneOff(_) => Category::OneOff,
            Progress::Aspirational(_) => Category::Aspirational,
            Progress::Generic(_) => Category::Generic,
        }
    }

    /// When the current completion happened, if the task is in a completed
    /// state for its category. A daily task only counts while
    /// `completed_today` is set.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Progress::Daily(d) if d.completed_today => d.last_completed_at,
            Progress::Daily(_) => None,
            Progress::OneOff(o) => o.completed_at,
            Progress::Aspirational(m) | Progress::Generic(m) => m.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// A trackable objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    /// Conversation scope the task was registered in.
    pub room_id: Option<Uuid>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub urgent: bool,
    pub progress: Progress,
    /// Points granted by the most recent completion. Not cumulative.
    pub points_awarded: Option<i64>,
    /// Entity credited by the most recent completion.
    pub completed_by: Option<EntityId>,
    /// Bumped by the store on every update. Used for optimistic checks.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn category(&self) -> Category {
        self.progress.category()
    }

    /// Neither completed nor waiting on a confirmation.
    pub fn is_actionable(&self) -> bool {
        !self.status.completed && !self.status.awaiting_choice
    }

    /// `completed` flag and the category's completion metadata agree.
    pub fn is_consistent(&self) -> bool {
        self.status.completed == self.progress.completed_at().is_some()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new tasks. Category is fixed here and never re-derived.
#[derive(Debug, Clone)]
pub struct NewTask {
    name: String,
    category: Category,
    room_id: Option<Uuid>,
    priority: Priority,
    urgent: bool,
    awaiting_choice: bool,
    due_date: Option<DateTime<Utc>>,
    streak: u32,
}

impl NewTask {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
            room_id: None,
            priority: Priority::LOWEST,
            urgent: false,
            awaiting_choice: false,
            due_date: None,
            streak: 0,
        }
    }

    /// Build from a freeform tag set: `daily` / `one-off` / `aspirational`
    /// pick the category, `priority-N` the priority, `urgent` the flag and
    /// `AWAITING_CHOICE` the confirmation status.
    pub fn from_tags(name: impl Into<String>, tags: &[&str]) -> Self {
        let mut new = Self::new(name, Category::classify(tags.iter().copied()));
        new.priority = Priority::from_tags(tags.iter().copied());
        new.urgent = tags.iter().any(|t| t.eq_ignore_ascii_case("urgent"));
        new.awaiting_choice = tags.iter().any(|t| t.eq_ignore_ascii_case("awaiting_choice"));
        new
    }

    pub fn room(mut self, room_id: Uuid) -> Self {
        self.room_id = Some(room_id);
        self
    }

    pub fn priority(mut self, raw: i64) -> Self {
        self.priority = Priority::new(raw);
        self
    }

    pub fn urgent(mut self, urgent: bool) -> Self {
        self.urgent = urgent;
        self
    }

    pub fn awaiting_choice(mut self, awaiting: bool) -> Self {
        self.awaiting_choice = awaiting;
        self
    }

    pub fn due(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Seed a daily streak (imports, tests).
    pub fn streak(mut self, streak: u32) -> Self {
        self.streak = streak;
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Validate and materialize the record.
    pub fn build(self, now: DateTime<Utc>) -> Result<TaskRecord> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("task name must not be empty".to_string()));
        }
        if self.due_date.is_some() && self.category != Category::OneOff {
            return Err(Error::Validation(format!(
                "due date only applies to one-off tasks, not {}",
                self.category
            )));
        }
        if self.streak > 0 && self.category != Category::Daily {
            return Err(Error::Validation(format!(
                "streak only applies to daily tasks, not {}",
                self.category
            )));
        }

        let progress = match Progress::empty(self.category) {
            Progress::Daily(d) => Progress::Daily(DailyProgress {
                streak: self.streak,
                ..d
            }),
            Progress::OneOff(o) => Progress::OneOff(OneOffProgress {
                due_date: self.due_date,
                ..o
            }),
            other => other,
        };

        Ok(TaskRecord {
            id: TaskId::new(),
            name,
            room_id: self.room_id,
            status: TaskStatus {
                completed: false,
                awaiting_choice: self.awaiting_choice,
            },
            priority: self.priority,
            urgent: self.urgent,
            progress,
            points_awarded: None,
            completed_by: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}
