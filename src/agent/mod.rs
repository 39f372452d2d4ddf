//! Agent runtime — the multi-step decide/execute loop.
//!
//! One session per `run` call: the decider picks the next action, the
//! registry executes it, the outcome is appended to the trace and fed
//! back as an observation. Tool failures are observations, never fatal;
//! the loop terminates when the decider produces a final answer (`Done`)
//! or the step budget runs out (`Aborted`). The full trace travels with
//! every terminal outcome — partial progress is never discarded.

pub mod decider;
pub mod llm;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::EventBroadcaster;
use crate::registry::Registry;
use decider::{ChatMessage, Decider, DeciderError, Decision, StepRecord};

#[derive(Debug, Error)]
pub enum AgentError {
    /// The decider backend went away mid-session. The steps executed so
    /// far travel with the error so the caller keeps the partial trace.
    #[error("decider unavailable: {detail}")]
    DeciderUnavailable {
        detail: String,
        session_id: String,
        trace: Vec<StepRecord>,
    },
}

/// Terminal state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Decider signalled completion.
    Done,
    /// Step budget exhausted without a final answer.
    Aborted,
}

/// What a finished session hands back to the caller.
#[derive(Debug, Serialize)]
pub struct AgentOutcome {
    pub session_id: String,
    pub status: AgentStatus,
    /// Final answer when `Done`; explanation of the abort otherwise.
    pub answer: String,
    pub trace: Vec<StepRecord>,
    pub steps_executed: usize,
}

/// Per-run session state. Exclusively owned by the loop that created it;
/// dropped at the terminal outcome.
struct AgentSession {
    id: String,
    history: Vec<ChatMessage>,
    trace: Vec<StepRecord>,
}

impl AgentSession {
    fn new(seed: Vec<ChatMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            history: seed,
            trace: Vec::new(),
        }
    }
}

const SYSTEM_PROMPT: &str = "You are a development assistant with access to a catalogue of \
tools exposed over MCP. Use the appropriate tools to complete the user's task, then give \
a clear final answer.";

pub struct AgentRuntime {
    decider: Arc<dyn Decider>,
    registry: Arc<Registry>,
    broadcaster: Arc<EventBroadcaster>,
    max_steps: usize,
}

impl AgentRuntime {
    pub fn new(
        decider: Arc<dyn Decider>,
        registry: Arc<Registry>,
        broadcaster: Arc<EventBroadcaster>,
        max_steps: usize,
    ) -> Self {
        Self {
            decider,
            registry,
            broadcaster,
            max_steps,
        }
    }

    /// Run a free-form natural-language task to completion. A persona
    /// configuration, when given, replaces the default system prompt.
    pub async fn run_task(
        &self,
        prompt: &str,
        context: Option<&Value>,
        persona: Option<&Value>,
    ) -> Result<AgentOutcome, AgentError> {
        let seed = vec![
            ChatMessage::system(system_prompt(persona)),
            ChatMessage::user(with_context(prompt, context)),
        ];
        self.run_session(seed).await
    }

    /// Run a workflow given as an explicit ordered step description.
    /// Seeds the conversation with the step list instead of a single
    /// free-form prompt.
    pub async fn run_workflow(
        &self,
        workflow: &str,
        context: Option<&Value>,
        persona: Option<&Value>,
    ) -> Result<AgentOutcome, AgentError> {
        let prompt = format!(
            "Execute this workflow:\n{workflow}\n\nBreak it down into steps and execute \
             them in order using the available tools. Report progress as you go."
        );
        let seed = vec![
            ChatMessage::system(system_prompt(persona)),
            ChatMessage::user(with_context(&prompt, context)),
        ];
        self.run_session(seed).await
    }

    /// Current capability set: decider identity, reachable tool count,
    /// step budget.
    pub async fn status(&self) -> Value {
        json!({
            "agent_enabled": true,
            "model": self.decider.describe(),
            "available_tools": self.registry.len().await,
            "max_steps": self.max_steps,
            "capabilities": [
                "Multi-step task execution",
                "Tool orchestration",
                "Workflow decomposition",
            ],
        })
    }

    async fn run_session(&self, seed: Vec<ChatMessage>) -> Result<AgentOutcome, AgentError> {
        let mut session = AgentSession::new(seed);
        info!(session = %session.id, budget = self.max_steps, "agent session started");

        for step in 0..self.max_steps {
            let decision = match self.decider.decide(&session.history, &session.trace).await {
                Ok(d) => d,
                Err(DeciderError::Unavailable(detail)) => {
                    warn!(
                        session = %session.id,
                        %detail,
                        steps = session.trace.len(),
                        "decider unreachable — aborting session"
                    );
                    return Err(AgentError::DeciderUnavailable {
                        detail,
                        session_id: session.id,
                        trace: session.trace,
                    });
                }
                Err(DeciderError::Malformed(detail)) => {
                    // A garbled reply once is recoverable: tell the decider
                    // and let it try again within the same budget.
                    warn!(session = %session.id, %detail, "malformed decider reply");
                    session
                        .history
                        .push(ChatMessage::user(format!(
                            "Your previous reply could not be interpreted ({detail}). \
                             Reply with a tool call or a final answer."
                        )));
                    continue;
                }
            };

            match decision {
                Decision::Final(answer) => {
                    info!(session = %session.id, steps = session.trace.len(), "agent session done");
                    return Ok(AgentOutcome {
                        session_id: session.id,
                        status: AgentStatus::Done,
                        answer,
                        steps_executed: session.trace.len(),
                        trace: session.trace,
                    });
                }
                Decision::ToolCall { name, arguments } => {
                    debug!(session = %session.id, step, tool = %name, "agent tool call");
                    let record = self.execute_step(&name, arguments).await;

                    self.broadcaster.broadcast(
                        "agent.step",
                        json!({
                            "session_id": session.id,
                            "step": step + 1,
                            "tool": record.tool,
                            "success": record.success,
                        }),
                    );

                    session.history.push(ChatMessage::assistant(format!(
                        "Calling tool '{}' with arguments {}",
                        record.tool, record.arguments
                    )));
                    session
                        .history
                        .push(ChatMessage::tool(record.outcome.to_string()));
                    session.trace.push(record);
                }
            }
        }

        warn!(session = %session.id, budget = self.max_steps, "step budget exhausted");
        Ok(AgentOutcome {
            session_id: session.id,
            status: AgentStatus::Aborted,
            answer: format!("step budget of {} exhausted before completion", self.max_steps),
            steps_executed: session.trace.len(),
            trace: session.trace,
        })
    }

    /// Execute one chosen tool call. Failures become observations in the
    /// trace — the decider sees them and may retry with corrected
    /// arguments on its next turn.
    async fn execute_step(&self, name: &str, arguments: Value) -> StepRecord {
        match self.registry.execute(name, arguments.clone()).await {
            Ok(result) => StepRecord {
                tool: name.to_string(),
                arguments,
                outcome: result,
                success: true,
            },
            Err(e) => StepRecord {
                tool: name.to_string(),
                arguments,
                outcome: json!({ "error": e.to_string() }),
                success: false,
            },
        }
    }
}

fn system_prompt(persona: Option<&Value>) -> String {
    match persona.and_then(Value::as_object) {
        Some(config) => persona_prompt(config),
        None => SYSTEM_PROMPT.to_string(),
    }
}

/// Render a persona configuration into a system prompt. Recognized
/// fields: `role`, `expertise` (list), `behavior_rules` (list),
/// `communication_style { tone, verbosity }`. Missing fields fall back
/// to neutral defaults.
fn persona_prompt(config: &serde_json::Map<String, Value>) -> String {
    let role = config
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("generalist");
    let mut parts = vec![format!(
        "You are a {role} with access to a catalogue of tools exposed over MCP."
    )];

    let expertise: Vec<&str> = config
        .get("expertise")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !expertise.is_empty() {
        parts.push(format!("Your expertise areas: {}.", expertise.join(", ")));
    }

    if let Some(rules) = config.get("behavior_rules").and_then(Value::as_array) {
        let rules: Vec<&str> = rules.iter().filter_map(Value::as_str).collect();
        if !rules.is_empty() {
            parts.push("Behavioral guidelines:".to_string());
            for rule in rules {
                parts.push(format!("- {rule}"));
            }
        }
    }

    if let Some(style) = config.get("communication_style").and_then(Value::as_object) {
        let tone = style.get("tone").and_then(Value::as_str).unwrap_or("professional");
        let verbosity = style
            .get("verbosity")
            .and_then(Value::as_str)
            .unwrap_or("moderate");
        parts.push(format!(
            "Communication style: {tone}, {verbosity} detail level."
        ));
    }

    parts.push(
        "Use the appropriate tools to complete the user's task, then give a clear final answer."
            .to_string(),
    );
    parts.join("\n")
}

fn with_context(prompt: &str, context: Option<&Value>) -> String {
    match context.and_then(Value::as_object) {
        Some(map) if !map.is_empty() => {
            // Render deterministically, keys sorted.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            format!(
                "{prompt}\n\nContext: {}",
                serde_json::to_string(&sorted).unwrap_or_default()
            )
        }
        _ => prompt.to_string(),
    }
}
