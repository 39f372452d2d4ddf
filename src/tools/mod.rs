//! Builtin tool catalogue.
//!
//! Real tool packs register through the same boundary at startup:
//! a [`ToolDescriptor`] plus a [`ToolHandler`]. The builtins here are the
//! minimal set the daemon ships with — `echo` for connectivity checks and
//! `server_status` (read-only, cacheable) for monitoring.

use crate::registry::{FnHandler, Registry, ToolDescriptor, ToolError};
use serde_json::{json, Value};
use std::sync::Arc;

/// Register the builtin tools. Called once from startup, before any
/// transport accepts requests.
pub async fn register_builtins(registry: &Registry) -> Result<(), ToolError> {
    registry
        .register(
            ToolDescriptor::new(
                "echo",
                "Echo the given text back. Useful for connectivity and latency checks.",
                json!({
                    "type": "object",
                    "required": ["text"],
                    "properties": {
                        "text": {
                            "type": "string",
                            "description": "Text to echo back verbatim."
                        }
                    }
                }),
            ),
            Arc::new(FnHandler(|args: Value| async move {
                let text = args
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(json!({ "text": text }))
            })),
        )
        .await?;

    registry
        .register(
            ToolDescriptor::new(
                "server_status",
                "Report daemon version and process status.",
                json!({
                    "type": "object",
                    "properties": {}
                }),
            )
            .read_only(),
            Arc::new(FnHandler(|_args: Value| async move {
                Ok(json!({
                    "status": "ok",
                    "version": env!("CARGO_PKG_VERSION"),
                }))
            })),
        )
        .await?;

    Ok(())
}

// ─── Agent meta-tool definitions ─────────────────────────────────────────────

/// Descriptors for the three agent meta-tools, appended to `tools/list`
/// when the agent runtime is enabled. They are dispatched by the protocol
/// layer, not the registry — the agent is a peer of the registry, not a
/// handler inside it.
pub fn agent_tool_defs() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "agent_run",
            "Run a free-form natural-language task to completion. The agent decides which \
             tools to invoke, step by step, and returns the final answer with the full \
             tool-call trace.",
            json!({
                "type": "object",
                "required": ["prompt"],
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "Natural language description of the task. Be specific about the goal."
                    },
                    "context": {
                        "type": "object",
                        "description": "Optional key/value context passed through to the agent (paths, names, etc.)."
                    },
                    "persona": {
                        "type": "object",
                        "description": "Optional persona shaping the system prompt: { role, expertise, behavior_rules, communication_style }."
                    }
                }
            }),
        ),
        ToolDescriptor::new(
            "agent_workflow",
            "Execute an explicit ordered multi-step workflow. Seeds the agent with the \
             step list instead of a free-form prompt.",
            json!({
                "type": "object",
                "required": ["workflow"],
                "properties": {
                    "workflow": {
                        "type": "string",
                        "description": "Workflow description with clearly listed steps (e.g. '1. Clean, 2. Build, 3. Test')."
                    },
                    "context": {
                        "type": "object",
                        "description": "Optional key/value context for the workflow."
                    },
                    "persona": {
                        "type": "object",
                        "description": "Optional persona shaping the system prompt: { role, expertise, behavior_rules, communication_style }."
                    }
                }
            }),
        ),
        ToolDescriptor::new(
            "agent_status",
            "Report agent capabilities: model, reachable tool count, step budget.",
            json!({
                "type": "object",
                "properties": {}
            }),
        ),
    ]
}

/// True when `name` is one of the agent meta-tools.
pub fn is_agent_tool(name: &str) -> bool {
    matches!(name, "agent_run" | "agent_workflow" | "agent_status")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn builtins_register_and_echo_works() {
        let registry = Registry::new(Duration::from_secs(5));
        register_builtins(&registry).await.unwrap();
        assert_eq!(registry.len().await, 2);

        let result = registry
            .execute("echo", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn server_status_is_read_only() {
        let registry = Registry::new(Duration::from_secs(5));
        register_builtins(&registry).await.unwrap();
        assert!(registry.descriptor("server_status").await.unwrap().read_only);
        assert!(!registry.descriptor("echo").await.unwrap().read_only);
    }

    #[test]
    fn meta_tool_names() {
        assert!(is_agent_tool("agent_run"));
        assert!(is_agent_tool("agent_workflow"));
        assert!(is_agent_tool("agent_status"));
        assert!(!is_agent_tool("echo"));
        assert_eq!(agent_tool_defs().len(), 3);
    }
}
