// rest/mod.rs — HTTP + WebSocket transport.
//
// One axum server on the configured port:
//   POST /mcp      JSON-RPC envelope in/out (one pair per request)
//   GET  /tools    flat tool listing (no envelope, for monitoring/discovery)
//   GET  /health   liveness summary (always open)
//   GET  /         service banner
//   GET  /ws       WebSocket upgrade — persistent multiplexed JSON-RPC
//
// /mcp, /tools, and the /ws upgrade are gated by the API key when
// require_auth is set; /health and / stay open.

pub mod ws;

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::{auth, rpc, AppContext};

pub async fn start_server(ctx: AppContext) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("HTTP/WebSocket server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(ctx: AppContext) -> Router {
    let cors = cors_layer(&ctx.config.allowed_origins);

    Router::new()
        .route("/mcp", post(mcp_post))
        .route("/tools", get(tools_get))
        .route("/health", get(health))
        .route("/", get(root))
        .route("/ws", get(ws::ws_upgrade))
        .layer(cors)
        .with_state(ctx)
}

/// Resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
    info!("shutdown signal received — stopping server");
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "unparseable allowed origin — skipping");
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    }
}

// ─── Auth ────────────────────────────────────────────────────────────────────

/// Check the `x-api-key` header when auth is required. Constant-time
/// comparison; rejection happens before any dispatch.
fn require_key(headers: &HeaderMap, ctx: &AppContext) -> Result<(), Response> {
    if !ctx.config.require_auth {
        return Ok(());
    }
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if auth::verify_key(presented, &ctx.api_key) {
        Ok(())
    } else {
        warn!("rejected request with missing or invalid API key");
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {
                    "code": rpc::UNAUTHORIZED,
                    "message": "Unauthorized — valid x-api-key header required",
                    "data": { "kind": "auth" }
                }
            })),
        )
            .into_response())
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn mcp_post(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(rejection) = require_key(&headers, &ctx) {
        return rejection;
    }

    let payload = match rpc::dispatch_line(&body, &ctx).await {
        Some(response) => response,
        // Notification — no response body by contract.
        None => return StatusCode::ACCEPTED.into_response(),
    };

    (
        [(header::CONTENT_TYPE, "application/json")],
        payload,
    )
        .into_response()
}

async fn tools_get(State(ctx): State<AppContext>, headers: HeaderMap) -> Response {
    if let Err(rejection) = require_key(&headers, &ctx) {
        return rejection;
    }

    let direct: Vec<_> = ctx
        .registry
        .list()
        .await
        .iter()
        .map(|d| serde_json::to_value(d).unwrap_or_default())
        .collect();
    let direct_count = direct.len();

    let mut tools = direct;
    let agent_count = if ctx.agent_enabled() {
        let defs = crate::tools::agent_tool_defs();
        tools.extend(defs.iter().map(|d| serde_json::to_value(d).unwrap_or_default()));
        defs.len()
    } else {
        0
    };

    Json(json!({
        "tools": tools,
        "count": tools.len(),
        "direct_tools": direct_count,
        "agent_tools": agent_count,
    }))
    .into_response()
}

async fn health(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": ctx.started_at.elapsed().as_secs(),
        "tools_loaded": ctx.registry.len().await,
        "agent_enabled": ctx.agent_enabled(),
        "initialized": ctx.initialized.load(Ordering::Relaxed),
    }))
}

async fn root(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "mcpd",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "protocol": "JSON-RPC 2.0",
        "endpoints": {
            "http": "/mcp",
            "websocket": "/ws",
            "health": "/health",
            "tools": "/tools"
        },
        "authentication": if ctx.config.require_auth { "required" } else { "disabled" },
    }))
}
