//! Completion policy engine and the daily reset scheduler.

use std::time::Duration;

pub mod completion;
pub mod guard;
pub mod policy;
pub mod reset;

pub use completion::{CompletionEngine, CompletionResult};
pub use guard::CallOptions;
pub use reset::{DailyReset, RESET_DAILY_TASKS, ResetSchedule};

/// Default period between daily resets.
pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
