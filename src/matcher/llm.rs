//! LLM-backed task matching via rig-core.
//!
//! The model sees a numbered list of candidate tasks and replies with a small
//! JSON object naming the chosen id. Parsing is strict: anything that is not
//! a candidate id comes back as `NotFound`.
//!
//! ```no_run
//! use ascend::matcher::{LlmMatcher, anthropic_client};
//! use secrecy::SecretString;
//!
//! let key = SecretString::from("sk-ant-...");
//! let client = anthropic_client(&key).expect("failed to create Anthropic client");
//! let matcher = LlmMatcher::new(client, "claude-3-5-haiku-latest");
//! ```

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::anthropic;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt::Write as _;
use uuid::Uuid;

use super::{TaskMatch, TaskMatcher};
use crate::error::{Error, Result};
use crate::model::{TaskId, TaskRecord};

const PREAMBLE: &str = "You match a user's message to one task from a list. \
Reply with only a JSON object: {\"task_id\": \"<id>\"} for the task the message \
says was done, or {\"task_id\": null} if none clearly matches.";

const MAX_TOKENS: u64 = 128;

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(
    api_key: &SecretString,
) -> std::result::Result<anthropic::Client, rig::http_client::Error> {
    anthropic::Client::new(api_key.expose_secret())
}

pub struct LlmMatcher {
    client: anthropic::Client,
    model: String,
}

impl LlmMatcher {
    pub fn new(client: anthropic::Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Build from an API key and model name.
    pub fn from_key(api_key: &SecretString, model: impl Into<String>) -> Result<Self> {
        let client = anthropic_client(api_key)
            .map_err(|e| Error::Model(format!("failed to create Anthropic client: {e}")))?;
        Ok(Self::new(client, model))
    }
}

#[async_trait]
impl TaskMatcher for LlmMatcher {
    async fn match_task(&self, utterance: &str, candidates: &[TaskRecord]) -> Result<TaskMatch> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(PREAMBLE)
            .max_tokens(MAX_TOKENS)
            .build();

        let reply: String = agent
            .prompt(render_prompt(utterance, candidates))
            .await
            .map_err(|e| Error::Model(format!("task matcher prompt failed: {e}")))?;

        let found = parse_reply(&reply, candidates);
        tracing::debug!(model = %self.model, ?found, "matcher replied");
        Ok(found)
    }
}

fn render_prompt(utterance: &str, candidates: &[TaskRecord]) -> String {
    let mut prompt = String::from("Tasks:\n");
    for task in candidates {
        let _ = writeln!(prompt, "- {} : {}", task.id, task.name);
    }
    let _ = write!(prompt, "\nMessage: {utterance}");
    prompt
}

#[derive(Deserialize)]
struct Reply {
    task_id: Option<String>,
}

/// Extract the chosen id from a model reply.
///
/// Tolerates prose or code fences around the JSON object.
fn parse_reply(reply: &str, candidates: &[TaskRecord]) -> TaskMatch {
    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        return TaskMatch::NotFound;
    };
    if end < start {
        return TaskMatch::NotFound;
    }

    let Ok(parsed) = serde_json::from_str::<Reply>(&reply[start..=end]) else {
        tracing::warn!(reply, "matcher reply was not valid JSON");
        return TaskMatch::NotFound;
    };

    parsed
        .task_id
        .and_then(|raw| raw.trim().parse::<Uuid>().ok())
        .map(TaskId)
        .filter(|id| candidates.iter().any(|t| t.id == *id))
        .map_or(TaskMatch::NotFound, TaskMatch::Found)
}
