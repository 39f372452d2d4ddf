//! JSON-RPC 2.0 protocol dispatcher.
//!
//! One request, one response: every accepted envelope produces exactly
//! one [`RpcResponse`] (notifications produce none), regardless of which
//! transport delivered it. Method set follows MCP: `initialize`,
//! `tools/list`, `tools/call`, `ping`, `notifications/initialized`.
//! Errors carry a machine-readable `kind` in `error.data` on top of the
//! JSON-RPC code so clients can distinguish protocol failures from tool
//! failures without string matching.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

use crate::agent::AgentError;
use crate::cache;
use crate::registry::ToolError;
use crate::tools;
use crate::AppContext;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

// ─── Error codes ─────────────────────────────────────────────────────────────

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Tool handler failed or timed out.
pub const TOOL_ERROR: i32 = -32000;
/// Agent runtime disabled or decider backend unreachable.
pub const AGENT_UNAVAILABLE: i32 = -32001;
/// `tools/list` / `tools/call` before `initialize`.
pub const NOT_INITIALIZED: i32 = -32002;
pub const UNAUTHORIZED: i32 = -32004;

/// A dispatch failure with everything needed to build the error envelope.
pub struct RpcFailure {
    pub code: i32,
    pub kind: &'static str,
    pub message: String,
    pub detail: Option<String>,
    /// Structured fields merged into `error.data` beside kind/detail
    /// (partial agent traces travel here).
    pub extra: Option<Value>,
}

impl RpcFailure {
    pub fn new(code: i32, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
            detail: None,
            extra: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<ToolError> for RpcFailure {
    fn from(e: ToolError) -> Self {
        match &e {
            ToolError::DuplicateTool(_) => {
                RpcFailure::new(INTERNAL_ERROR, "internal", e.to_string())
            }
            ToolError::UnknownTool(_) => RpcFailure::new(INVALID_PARAMS, "unknown_tool", e.to_string()),
            ToolError::InvalidArguments { detail, .. } => {
                RpcFailure::new(INVALID_PARAMS, "invalid_arguments", e.to_string())
                    .with_detail(detail.clone())
            }
            ToolError::Execution { cause, .. } => {
                RpcFailure::new(TOOL_ERROR, "tool_execution", e.to_string())
                    .with_detail(cause.clone())
            }
            ToolError::Timeout { .. } => RpcFailure::new(TOOL_ERROR, "timeout", e.to_string()),
        }
    }
}

impl From<AgentError> for RpcFailure {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::DeciderUnavailable {
                detail,
                session_id,
                trace,
            } => {
                let mut failure =
                    RpcFailure::new(AGENT_UNAVAILABLE, "decider_unavailable", "decider unavailable")
                        .with_detail(detail);
                // Executed steps are never discarded: the caller gets the
                // partial trace alongside the error.
                failure.extra = Some(json!({
                    "session_id": session_id,
                    "steps_executed": trace.len(),
                    "tool_results": trace,
                }));
                failure
            }
        }
    }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Dispatch one raw envelope. Returns the serialized response, or `None`
/// for notifications (which get no reply by contract).
pub async fn dispatch_line(text: &str, ctx: &AppContext) -> Option<String> {
    let raw: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            return Some(error_response(
                Value::Null,
                &RpcFailure::new(PARSE_ERROR, "protocol", "Parse error"),
            ));
        }
    };

    // Well-formed JSON that is not a valid request still keeps its id
    // for correlation; only unparseable bytes lose it.
    let id = raw.get("id").cloned().unwrap_or(Value::Null);

    let req: RpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(_) => {
            return Some(error_response(
                id,
                &RpcFailure::new(INVALID_REQUEST, "protocol", "Invalid Request"),
            ));
        }
    };

    if req.jsonrpc != "2.0" {
        return Some(error_response(
            id,
            &RpcFailure::new(INVALID_REQUEST, "protocol", "Invalid Request"),
        ));
    }

    // Notifications are one-way.
    if req.method.starts_with("notifications/") {
        debug!(method = %req.method, "notification received");
        return None;
    }

    let params = req.params.unwrap_or_else(|| json!({}));

    debug!(method = %req.method, "rpc dispatch");

    match dispatch(&req.method, params, ctx).await {
        Ok(value) => {
            let resp = RpcResponse {
                jsonrpc: "2.0",
                id,
                result: Some(value),
                error: None,
            };
            Some(serde_json::to_string(&resp).unwrap_or_default())
        }
        Err(failure) => Some(error_response(id, &failure)),
    }
}

async fn dispatch(method: &str, params: Value, ctx: &AppContext) -> Result<Value, RpcFailure> {
    match method {
        "initialize" => handle_initialize(ctx).await,
        "ping" => Ok(json!({})),
        "tools/list" => {
            require_initialized(ctx)?;
            handle_tools_list(ctx).await
        }
        "tools/call" => {
            require_initialized(ctx)?;
            handle_tools_call(params, ctx).await
        }
        other => Err(RpcFailure::new(
            METHOD_NOT_FOUND,
            "protocol",
            format!("Method not found: {other}"),
        )),
    }
}

fn require_initialized(ctx: &AppContext) -> Result<(), RpcFailure> {
    if ctx.initialized.load(Ordering::Relaxed) {
        Ok(())
    } else {
        Err(RpcFailure::new(
            NOT_INITIALIZED,
            "protocol",
            "Server not initialized",
        ))
    }
}

// ─── Method handlers ─────────────────────────────────────────────────────────

async fn handle_initialize(ctx: &AppContext) -> Result<Value, RpcFailure> {
    ctx.initialized.store(true, Ordering::Relaxed);

    let mut capabilities = json!({
        "tools": { "listChanged": false }
    });
    if ctx.agent_enabled() {
        capabilities["experimental"] = json!({
            "agent": true,
            "workflows": true
        });
    }

    Ok(json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": capabilities,
        "serverInfo": {
            "name": "mcpd",
            "version": env!("CARGO_PKG_VERSION"),
            "features": {
                "direct_tools": ctx.registry.len().await,
                "agent_enabled": ctx.agent_enabled(),
                "agent_tools": if ctx.agent_enabled() { 3 } else { 0 },
            }
        }
    }))
}

async fn handle_tools_list(ctx: &AppContext) -> Result<Value, RpcFailure> {
    let mut tools: Vec<Value> = ctx
        .registry
        .list()
        .await
        .iter()
        .map(|d| serde_json::to_value(d).unwrap_or_default())
        .collect();

    if ctx.agent_enabled() {
        tools.extend(
            tools::agent_tool_defs()
                .iter()
                .map(|d| serde_json::to_value(d).unwrap_or_default()),
        );
    }

    Ok(json!({ "tools": tools }))
}

async fn handle_tools_call(params: Value, ctx: &AppContext) -> Result<Value, RpcFailure> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            RpcFailure::new(INVALID_PARAMS, "protocol", "Invalid params: tool name required")
        })?
        .to_string();
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    if tools::is_agent_tool(&name) {
        return handle_agent_tool(&name, &arguments, ctx).await;
    }

    // Read-through for cacheable tools. Cacheability comes from the
    // descriptor, never the caller.
    let cacheable = ctx
        .registry
        .descriptor(&name)
        .await
        .map(|d| d.read_only)
        .unwrap_or(false);

    let key = if cacheable {
        ctx.cache.purge_expired();
        let key = cache::cache_key(&name, &arguments);
        if let Some(hit) = ctx.cache.get(&key) {
            debug!(tool = %name, "cache hit");
            return Ok(hit);
        }
        Some(key)
    } else {
        None
    };

    let result = ctx.registry.execute(&name, arguments).await?;
    let response = content_result(&result);

    // Write-through on success only — failures returned above via `?`.
    if let Some(key) = key {
        ctx.cache.put(key, response.clone(), None);
    }

    Ok(response)
}

async fn handle_agent_tool(
    name: &str,
    arguments: &Value,
    ctx: &AppContext,
) -> Result<Value, RpcFailure> {
    let Some(agent) = &ctx.agent else {
        return Err(RpcFailure::new(
            AGENT_UNAVAILABLE,
            "decider_unavailable",
            "Agent runtime not available — configure an [llm] backend",
        ));
    };

    match name {
        "agent_run" => {
            let prompt = arguments.get("prompt").and_then(Value::as_str).ok_or_else(|| {
                RpcFailure::new(INVALID_PARAMS, "invalid_arguments", "prompt is required")
            })?;
            let outcome = agent
                .run_task(prompt, arguments.get("context"), arguments.get("persona"))
                .await?;
            Ok(content_result(&json!({
                "response": outcome.answer,
                "status": outcome.status,
                "tool_results": outcome.trace,
                "steps_executed": outcome.steps_executed,
                "session_id": outcome.session_id,
            })))
        }
        "agent_workflow" => {
            let workflow = arguments.get("workflow").and_then(Value::as_str).ok_or_else(
                || RpcFailure::new(INVALID_PARAMS, "invalid_arguments", "workflow is required"),
            )?;
            let outcome = agent
                .run_workflow(workflow, arguments.get("context"), arguments.get("persona"))
                .await?;
            let success =
                outcome.trace.iter().all(|r| r.success) && outcome.status == crate::agent::AgentStatus::Done;
            Ok(content_result(&json!({
                "workflow": workflow,
                "response": outcome.answer,
                "status": outcome.status,
                "tool_results": outcome.trace,
                "steps_executed": outcome.steps_executed,
                "success": success,
                "session_id": outcome.session_id,
            })))
        }
        "agent_status" => Ok(content_result(&agent.status().await)),
        other => {
            warn!(tool = %other, "unroutable agent tool");
            Err(RpcFailure::new(
                METHOD_NOT_FOUND,
                "protocol",
                format!("Unknown agent tool: {other}"),
            ))
        }
    }
}

/// Wrap a tool result into the MCP content shape: a single compact-JSON
/// text block.
fn content_result(payload: &Value) -> Value {
    json!({
        "content": [
            {
                "type": "text",
                "text": serde_json::to_string(payload).unwrap_or_default(),
            }
        ]
    })
}

fn error_response(id: Value, failure: &RpcFailure) -> String {
    let mut data = serde_json::Map::new();
    data.insert("kind".to_string(), json!(failure.kind));
    if let Some(detail) = &failure.detail {
        data.insert("detail".to_string(), json!(detail));
    }
    if let Some(Value::Object(extra)) = &failure.extra {
        for (key, value) in extra {
            data.insert(key.clone(), value.clone());
        }
    }
    let data = Value::Object(data);
    let resp = RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(RpcError {
            code: failure.code,
            message: failure.message.clone(),
            data: Some(data),
        }),
    };
    serde_json::to_string(&resp).unwrap_or_default()
}
