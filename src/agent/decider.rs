//! The pluggable reasoning boundary.
//!
//! The agent loop treats the decider as an opaque, potentially slow,
//! potentially failing dependency: given the conversation so far and the
//! accumulated tool results, it returns either a final answer or the next
//! tool call. The production implementation is [`crate::agent::llm::LlmDecider`];
//! tests inject scripted deciders.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One turn of the conversation fed to the decider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
        }
    }
}

/// One executed tool call, as recorded in the session trace.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub tool: String,
    pub arguments: Value,
    /// Success payload or the wrapped error description.
    pub outcome: Value,
    pub success: bool,
}

/// The decider's verdict for one turn.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Task is complete; this is the answer for the caller.
    Final(String),
    /// Invoke this tool next and feed the outcome back.
    ToolCall { name: String, arguments: Value },
}

#[derive(Debug, Error)]
pub enum DeciderError {
    /// The reasoning backend cannot be reached (network, process down).
    #[error("decider backend unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with something we cannot interpret.
    #[error("decider returned a malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Decider: Send + Sync {
    /// Choose the next action given the conversation and the trace so far.
    async fn decide(
        &self,
        history: &[ChatMessage],
        trace: &[StepRecord],
    ) -> Result<Decision, DeciderError>;

    /// Short human-readable identity (e.g. "ollama:qwen3-coder:30b").
    fn describe(&self) -> String;
}
