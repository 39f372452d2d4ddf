//! WebSocket transport — persistent multiplexed JSON-RPC.
//!
//! Many envelopes may be in flight on one connection: every inbound text
//! frame is dispatched on its own task, so a slow tool call never blocks
//! later requests on the same socket. Responses interleave in completion
//! order and correlate by envelope id. Broadcast notifications
//! (`agent.step` progress) are forwarded to the client between responses.
//!
//! The credential travels as an `api_key` query parameter — some
//! WebSocket clients cannot set headers on the upgrade request.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    extract::ws::rejection::WebSocketUpgradeRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::{auth, rpc, AppContext};

pub async fn ws_upgrade(
    State(ctx): State<AppContext>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Credential check comes before upgrade validation: an unauthorized
    // client learns nothing about the endpoint.
    if ctx.config.require_auth {
        let presented = params.get("api_key").map(String::as_str).unwrap_or_default();
        if !auth::verify_key(presented, &ctx.api_key) {
            warn!("rejected WebSocket upgrade with missing or invalid api_key");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }

    match upgrade {
        Ok(upgrade) => upgrade.on_upgrade(move |socket| handle_socket(socket, ctx)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, ctx: AppContext) {
    let (mut sink, mut stream) = socket.split();

    // All outbound traffic (responses + broadcast events) funnels through
    // one writer so frames never interleave mid-write.
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let mut broadcast_rx = ctx.broadcaster.subscribe();

    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(text) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                event = broadcast_rx.recv() => {
                    match event {
                        Ok(json) => {
                            if sink.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "broadcast lagged");
                        }
                    }
                }
            }
        }
    });

    // In-flight dispatches for this connection. Aborted on disconnect so
    // a departed client does not keep tool calls running on its behalf.
    let mut in_flight: JoinSet<()> = JoinSet::new();

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let ctx = ctx.clone();
                let tx = tx.clone();
                let text = text.to_string();
                in_flight.spawn(async move {
                    if let Some(response) = rpc::dispatch_line(&text, &ctx).await {
                        // Receiver gone means the connection closed; drop.
                        let _ = tx.send(response).await;
                    }
                });
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong handled by the protocol layer, binary ignored
            Err(e) => {
                debug!(err = %e, "ws read error");
                break;
            }
        }

        // Reap finished dispatches without blocking the read loop.
        while in_flight.try_join_next().is_some() {}
    }

    in_flight.abort_all();
    drop(tx);
    let _ = writer.await;
    debug!("ws connection closed");
}
