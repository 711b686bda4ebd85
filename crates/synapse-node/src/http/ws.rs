// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket fan-out channel.
//!
//! # Protocol
//!
//! The client sends one hello frame on open:
//!
//! ```json
//! { "agentId": "ide-1" }
//! ```
//!
//! and then only receives: the server streams inbox push notifications
//! (JSON text frames) queued by the router.  Pings are answered; any
//! other inbound frame is ignored.
//!
//! # Security
//!
//! Authentication happens before the upgrade, in the tenant-resolver
//! middleware.  The socket inherits the HTTP request's tenant; the hello
//! frame only names the agent *within* that tenant, so a client can
//! never subscribe across the boundary.
//!
//! # Liveness
//!
//! The binding is removed when the writer fails or the socket closes —
//! whichever happens first.  A reconnect simply replaces the binding;
//! the identity check in `unbind` keeps the old writer from evicting the
//! new socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use serde::Deserialize;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use synapse_core::{AgentStatus, RequestContext};

use super::AppState;

/// How long the client has to send its hello frame.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    agent_id: String,
}

/// HTTP handler for `GET /ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, ctx))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, ctx: RequestContext) {
    // Hello frame first; anything else is a protocol error.
    let hello = match timeout(HELLO_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<Hello>(&text) {
            Ok(h) => h,
            Err(e) => {
                warn!(tenant = %ctx.tenant_id, "invalid WS hello: {e}");
                return;
            }
        },
        _ => {
            debug!(tenant = %ctx.tenant_id, "WS closed before hello");
            return;
        }
    };

    let agent_id = hello.agent_id;
    info!(tenant = %ctx.tenant_id, agent = %agent_id, "WebSocket agent connected");

    let conn = state.hub.registry.bind(&ctx.tenant_id, &agent_id);
    let _ = state
        .hub
        .store
        .touch_agent(&ctx, &agent_id, Some(AgentStatus::Online))
        .await;

    loop {
        tokio::select! {
            // Outgoing: drain the bounded notification queue.
            notification = conn.next() => {
                let Ok(text) = serde_json::to_string(&notification) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    // Destination gone; drop silently (lazy removal).
                    break;
                }
            }
            // Incoming: only pings matter.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // text/binary after hello ignored
                    Some(Err(e)) => {
                        debug!(tenant = %ctx.tenant_id, agent = %agent_id, "WS recv error: {e}");
                        break;
                    }
                }
            }
        }
    }

    state.hub.registry.unbind(&ctx.tenant_id, &agent_id, &conn);
    info!(tenant = %ctx.tenant_id, agent = %agent_id, "WebSocket agent disconnected");
}
