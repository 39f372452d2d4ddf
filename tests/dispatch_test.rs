//! Integration tests for the JSON-RPC dispatcher: envelope handling,
//! initialize gating, tools/list, tools/call, response caching, and the
//! error taxonomy surfaced in `error.data.kind`.

use mcpd::config::{AgentConfig, LlmConfig, ServerConfig};
use mcpd::events::EventBroadcaster;
use mcpd::registry::{Registry, ToolDescriptor, ToolHandler};
use mcpd::{rpc, AppContext};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingHandler {
    calls: Arc<AtomicUsize>,
    reply: Value,
}

#[async_trait::async_trait]
impl ToolHandler for CountingHandler {
    async fn call(&self, _arguments: Value) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

fn test_config(cache_ttl_secs: u64) -> ServerConfig {
    ServerConfig {
        port: 0,
        bind_address: "127.0.0.1".into(),
        data_dir: std::env::temp_dir(),
        log: "error".into(),
        log_format: "pretty".into(),
        api_key: None,
        require_auth: false,
        allowed_origins: vec!["*".into()],
        call_timeout_secs: 5,
        cache_ttl_secs,
        agent: AgentConfig::default(),
        llm: LlmConfig::default(),
    }
}

struct TestServer {
    ctx: AppContext,
    echo_calls: Arc<AtomicUsize>,
    listing_calls: Arc<AtomicUsize>,
}

/// Context with a non-cacheable `echo` tool and a read-only `listing`
/// tool, both counting invocations. No agent runtime.
async fn test_server(cache_ttl_secs: u64) -> TestServer {
    let registry = Arc::new(Registry::new(Duration::from_secs(5)));
    let echo_calls = Arc::new(AtomicUsize::new(0));
    let listing_calls = Arc::new(AtomicUsize::new(0));

    registry
        .register(
            ToolDescriptor::new(
                "echo",
                "Echo the text back.",
                json!({
                    "type": "object",
                    "required": ["text"],
                    "properties": { "text": { "type": "string" } }
                }),
            ),
            Arc::new(CountingHandler {
                calls: echo_calls.clone(),
                reply: json!({"text": "hi"}),
            }),
        )
        .await
        .unwrap();

    registry
        .register(
            ToolDescriptor::new(
                "listing",
                "Read-only listing.",
                json!({"type": "object", "properties": {}}),
            )
            .read_only(),
            Arc::new(CountingHandler {
                calls: listing_calls.clone(),
                reply: json!({"items": [1, 2, 3]}),
            }),
        )
        .await
        .unwrap();

    let ctx = AppContext::new(
        Arc::new(test_config(cache_ttl_secs)),
        registry,
        None,
        Arc::new(EventBroadcaster::new()),
        String::new(),
    );
    TestServer {
        ctx,
        echo_calls,
        listing_calls,
    }
}

async fn call(ctx: &AppContext, request: Value) -> Value {
    let response = rpc::dispatch_line(&request.to_string(), ctx)
        .await
        .expect("expected a response");
    serde_json::from_str(&response).unwrap()
}

async fn initialize(ctx: &AppContext) -> Value {
    call(ctx, json!({"jsonrpc": "2.0", "id": 0, "method": "initialize"})).await
}

/// Parse the compact-JSON text block out of an MCP content result.
fn content_payload(result: &Value) -> Value {
    let text = result["content"][0]["text"].as_str().expect("text block");
    serde_json::from_str(text).unwrap()
}

// ─── Envelope handling ───────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_json_yields_parse_error_with_null_id() {
    let server = test_server(300).await;
    let response = rpc::dispatch_line("{not json", &server.ctx).await.unwrap();
    let parsed: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(parsed["error"]["code"], rpc::PARSE_ERROR);
    assert_eq!(parsed["id"], Value::Null);
    assert_eq!(parsed["error"]["data"]["kind"], "protocol");
}

#[tokio::test]
async fn envelope_without_method_keeps_its_id() {
    let server = test_server(300).await;
    let resp = call(&server.ctx, json!({"jsonrpc": "2.0", "id": 7})).await;
    assert_eq!(resp["error"]["code"], rpc::INVALID_REQUEST);
    assert_eq!(resp["id"], 7, "well-formed JSON keeps its correlation id");
    assert_eq!(resp["error"]["data"]["kind"], "protocol");
}

#[tokio::test]
async fn non_object_envelope_is_invalid_request() {
    let server = test_server(300).await;
    let response = rpc::dispatch_line("42", &server.ctx).await.unwrap();
    let parsed: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(parsed["error"]["code"], rpc::INVALID_REQUEST);
    assert_eq!(parsed["id"], Value::Null);
}

#[tokio::test]
async fn wrong_jsonrpc_version_is_invalid_request() {
    let server = test_server(300).await;
    let resp = call(
        &server.ctx,
        json!({"jsonrpc": "1.0", "id": 7, "method": "ping"}),
    )
    .await;
    assert_eq!(resp["error"]["code"], rpc::INVALID_REQUEST);
    assert_eq!(resp["id"], 7);
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let server = test_server(300).await;
    let resp = call(
        &server.ctx,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/destroy"}),
    )
    .await;
    assert_eq!(resp["error"]["code"], rpc::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn notifications_get_no_response() {
    let server = test_server(300).await;
    let result = rpc::dispatch_line(
        &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
        &server.ctx,
    )
    .await;
    assert!(result.is_none());
}

#[tokio::test]
async fn ping_answers_empty_object() {
    let server = test_server(300).await;
    let resp = call(&server.ctx, json!({"jsonrpc": "2.0", "id": 9, "method": "ping"})).await;
    assert_eq!(resp["result"], json!({}));
}

// ─── initialize ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_reports_identity_and_capabilities() {
    let server = test_server(300).await;
    let resp = initialize(&server.ctx).await;
    let result = &resp["result"];
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "mcpd");
    assert_eq!(result["serverInfo"]["features"]["direct_tools"], 2);
    assert_eq!(result["serverInfo"]["features"]["agent_enabled"], false);
    // No agent — no experimental capabilities advertised.
    assert!(result["capabilities"]["experimental"].is_null());
}

#[tokio::test]
async fn list_and_call_require_initialize_first() {
    let server = test_server(300).await;
    let resp = call(
        &server.ctx,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await;
    assert_eq!(resp["error"]["code"], rpc::NOT_INITIALIZED);

    initialize(&server.ctx).await;
    let resp = call(
        &server.ctx,
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    assert!(resp["error"].is_null());
}

// ─── tools/list ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn tools_list_reflects_registered_schemas_and_is_idempotent() {
    let server = test_server(300).await;
    initialize(&server.ctx).await;

    let first = call(
        &server.ctx,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await;
    let tools = first["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0]["name"], "echo");
    assert_eq!(
        tools[0]["inputSchema"]["required"],
        json!(["text"]),
        "schema must round-trip exactly"
    );

    let second = call(
        &server.ctx,
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    assert_eq!(first["result"], second["result"]);
}

// ─── tools/call ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn call_echo_round_trips() {
    let server = test_server(300).await;
    initialize(&server.ctx).await;

    let resp = call(
        &server.ctx,
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "echo", "arguments": {"text": "hi"}}
        }),
    )
    .await;
    assert_eq!(content_payload(&resp["result"]), json!({"text": "hi"}));
}

#[tokio::test]
async fn call_without_name_is_invalid_params() {
    let server = test_server(300).await;
    initialize(&server.ctx).await;
    let resp = call(
        &server.ctx,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {}}),
    )
    .await;
    assert_eq!(resp["error"]["code"], rpc::INVALID_PARAMS);
}

#[tokio::test]
async fn call_missing_tool_reports_unknown_tool_kind() {
    let server = test_server(300).await;
    initialize(&server.ctx).await;
    let resp = call(
        &server.ctx,
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "missing"}
        }),
    )
    .await;
    assert_eq!(resp["error"]["code"], rpc::INVALID_PARAMS);
    assert_eq!(resp["error"]["data"]["kind"], "unknown_tool");
}

#[tokio::test]
async fn call_with_bad_arguments_reports_field_detail() {
    let server = test_server(300).await;
    initialize(&server.ctx).await;
    let resp = call(
        &server.ctx,
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "echo", "arguments": {"text": 42}}
        }),
    )
    .await;
    assert_eq!(resp["error"]["data"]["kind"], "invalid_arguments");
    let detail = resp["error"]["data"]["detail"].as_str().unwrap();
    assert!(detail.contains("'text'"), "detail names the field: {detail}");
    assert_eq!(server.echo_calls.load(Ordering::SeqCst), 0);
}

// ─── Response caching ────────────────────────────────────────────────────────

#[tokio::test]
async fn read_only_tool_is_cached_within_ttl() {
    let server = test_server(300).await;
    initialize(&server.ctx).await;

    for id in 1..=2 {
        let resp = call(
            &server.ctx,
            json!({
                "jsonrpc": "2.0", "id": id, "method": "tools/call",
                "params": {"name": "listing", "arguments": {}}
            }),
        )
        .await;
        assert_eq!(content_payload(&resp["result"]), json!({"items": [1, 2, 3]}));
    }
    assert_eq!(
        server.listing_calls.load(Ordering::SeqCst),
        1,
        "second identical call must hit the cache"
    );
}

#[tokio::test]
async fn expired_cache_entry_re_invokes_the_handler() {
    let server = test_server(0).await; // zero TTL — every entry expires at once
    initialize(&server.ctx).await;

    for id in 1..=2 {
        call(
            &server.ctx,
            json!({
                "jsonrpc": "2.0", "id": id, "method": "tools/call",
                "params": {"name": "listing", "arguments": {}}
            }),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.listing_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_cacheable_tool_executes_every_time() {
    let server = test_server(300).await;
    initialize(&server.ctx).await;

    for id in 1..=3 {
        call(
            &server.ctx,
            json!({
                "jsonrpc": "2.0", "id": id, "method": "tools/call",
                "params": {"name": "echo", "arguments": {"text": "hi"}}
            }),
        )
        .await;
    }
    assert_eq!(server.echo_calls.load(Ordering::SeqCst), 3);
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_calls_each_get_a_matching_response_id() {
    let server = test_server(300).await;
    initialize(&server.ctx).await;

    let mut handles = Vec::new();
    for id in 0..20u64 {
        let ctx = server.ctx.clone();
        handles.push(tokio::spawn(async move {
            let resp = call(
                &ctx,
                json!({
                    "jsonrpc": "2.0", "id": id, "method": "tools/call",
                    "params": {"name": "echo", "arguments": {"text": "hi"}}
                }),
            )
            .await;
            (id, resp)
        }));
    }

    for handle in handles {
        let (id, resp) = handle.await.unwrap();
        assert_eq!(resp["id"], json!(id), "response id must echo the request");
        assert!(resp["error"].is_null());
    }
    assert_eq!(server.echo_calls.load(Ordering::SeqCst), 20);
}

// ─── Agent meta-tools without a runtime ──────────────────────────────────────

#[tokio::test]
async fn agent_tools_unavailable_without_a_runtime() {
    let server = test_server(300).await;
    initialize(&server.ctx).await;
    let resp = call(
        &server.ctx,
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "agent_run", "arguments": {"prompt": "do things"}}
        }),
    )
    .await;
    assert_eq!(resp["error"]["code"], rpc::AGENT_UNAVAILABLE);
    assert_eq!(resp["error"]["data"]["kind"], "decider_unavailable");
}
