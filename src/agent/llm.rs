//! OpenAI-compatible chat-completions decider.
//!
//! Speaks the `/chat/completions` shape used by Ollama, OpenAI, and
//! DeepSeek (provider + URLs resolved by [`LlmConfig`]). Registry tools
//! are advertised as function specs; a reply carrying `tool_calls`
//! becomes [`Decision::ToolCall`], a plain content reply becomes
//! [`Decision::Final`]. Transport failures surface as
//! [`DeciderError::Unavailable`] so the session aborts with its partial
//! trace instead of hanging.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::registry::Registry;

use super::decider::{ChatMessage, Decider, DeciderError, Decision, StepRecord};

pub struct LlmDecider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    provider: String,
    registry: Arc<Registry>,
}

impl LlmDecider {
    pub fn new(config: &LlmConfig, registry: Arc<Registry>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.resolved_base_url(),
            api_key: config.resolved_api_key(),
            model: config.model.clone(),
            provider: config.provider.clone(),
            registry,
        }
    }

    /// Registry snapshot rendered as OpenAI function specs.
    async fn tool_specs(&self) -> Vec<Value> {
        self.registry
            .list()
            .await
            .into_iter()
            .map(|d| {
                json!({
                    "type": "function",
                    "function": {
                        "name": d.name,
                        "description": d.description,
                        "parameters": d.input_schema,
                    }
                })
            })
            .collect()
    }
}

#[async_trait]
impl Decider for LlmDecider {
    async fn decide(
        &self,
        history: &[ChatMessage],
        _trace: &[StepRecord],
    ) -> Result<Decision, DeciderError> {
        let messages: Vec<Value> = history
            .iter()
            .map(|m| {
                // The OpenAI shape has no bare "tool" role without call ids;
                // observations travel as user messages.
                let role = if m.role == "tool" { "user" } else { m.role.as_str() };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let body = json!({
            "model": self.model,
            "messages": messages,
            "tools": self.tool_specs().await,
            "temperature": 0.7,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeciderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DeciderError::Unavailable(format!(
                "{status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| DeciderError::Malformed(e.to_string()))?;

        let message = reply
            .pointer("/choices/0/message")
            .ok_or_else(|| DeciderError::Malformed("no choices in reply".into()))?;

        // Tool call takes precedence over any accompanying content.
        if let Some(call) = message
            .pointer("/tool_calls/0/function")
            .and_then(Value::as_object)
        {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| DeciderError::Malformed("tool call without a name".into()))?
                .to_string();
            let arguments = match call.get("arguments") {
                // Arguments arrive as a JSON-encoded string in the OpenAI shape.
                Some(Value::String(s)) => serde_json::from_str(s)
                    .map_err(|e| DeciderError::Malformed(format!("tool arguments: {e}")))?,
                Some(v) => v.clone(),
                None => json!({}),
            };
            debug!(tool = %name, "decider chose tool call");
            return Ok(Decision::ToolCall { name, arguments });
        }

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Decision::Final(content))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}
