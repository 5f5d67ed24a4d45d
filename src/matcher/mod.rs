//! Resolving a free-text reference ("I did my pushups") to one task.
//!
//! [`NameMatcher`] is deterministic and offline. [`llm::LlmMatcher`] asks a
//! language model and is used when an API key is configured.

pub mod llm;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{TaskId, TaskRecord};

pub use llm::{LlmMatcher, anthropic_client};

/// Which candidate, if any, an utterance refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMatch {
    Found(TaskId),
    NotFound,
}

#[async_trait]
pub trait TaskMatcher: Send + Sync {
    async fn match_task(&self, utterance: &str, candidates: &[TaskRecord]) -> Result<TaskMatch>;
}

/// Case-insensitive name matching.
///
/// An exact name wins. Otherwise the utterance must contain exactly one
/// candidate's name, or exactly one candidate's name must contain the
/// utterance. Anything ambiguous is `NotFound`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameMatcher;

#[async_trait]
impl TaskMatcher for NameMatcher {
    async fn match_task(&self, utterance: &str, candidates: &[TaskRecord]) -> Result<TaskMatch> {
        Ok(match_by_name(utterance, candidates))
    }
}

fn match_by_name(utterance: &str, candidates: &[TaskRecord]) -> TaskMatch {
    let needle = utterance.trim().to_lowercase();
    if needle.is_empty() {
        return TaskMatch::NotFound;
    }

    let names: Vec<(TaskId, String)> = candidates
        .iter()
        .map(|t| (t.id, t.name.trim().to_lowercase()))
        .filter(|(_, name)| !name.is_empty())
        .collect();

    if let Some((id, _)) = names.iter().find(|(_, name)| *name == needle) {
        return TaskMatch::Found(*id);
    }

    let mentioned: Vec<TaskId> = names
        .iter()
        .filter(|(_, name)| needle.contains(name.as_str()) || name.contains(needle.as_str()))
        .map(|(id, _)| *id)
        .collect();

    match mentioned.as_slice() {
        [only] => TaskMatch::Found(*only),
        _ => TaskMatch::NotFound,
    }
}
