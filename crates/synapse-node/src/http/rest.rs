// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! REST surface: health probes, the messaging convenience wrappers, and
//! the system status endpoint.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use synapse_core::RequestContext;
use synapse_hub::SendRequest;
use synapse_store::ListMessageOpts;

use super::{error_response, AppState};

// ── Health & readiness ────────────────────────────────────────────────────────

/// `GET /health` and `GET /health.json` — liveness; public.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "synapse-hub",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /ready` — readiness: 503 until the primary store answers.
pub async fn ready(State(state): State<AppState>) -> Response {
    match state.hub.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ready": true }))).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ── Messaging wrappers ────────────────────────────────────────────────────────

/// `POST /ai-message` — REST wrapper around `send_ai_message`, with the
/// same legacy aliases the MCP dispatcher accepts.
pub async fn post_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(mut body): Json<serde_json::Value>,
) -> Response {
    if let Some(obj) = body.as_object_mut() {
        if !obj.contains_key("to") {
            if let Some(v) = obj.remove("agentId") {
                obj.insert("to".into(), v);
            }
        }
        if !obj.contains_key("content") {
            if let Some(v) = obj.remove("message") {
                obj.insert("content".into(), v);
            }
        }
    }
    let req: SendRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(&synapse_core::HubError::invalid_arg("body", e.to_string()))
        }
    };
    match state.hub.router.send(&ctx, &req).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxQuery {
    #[serde(default)]
    unread_only: bool,
    #[serde(default)]
    mark_as_read: bool,
    #[serde(default)]
    since_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// `GET /ai-messages/:agentId` — REST wrapper around `get_ai_messages`.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(agent_id): Path<String>,
    Query(q): Query<InboxQuery>,
) -> Response {
    let opts = ListMessageOpts {
        unread_only: q.unread_only,
        since_id: q.since_id,
        limit: q.limit,
        mark_as_read: q.mark_as_read,
    };
    match state.hub.store.list_messages(&ctx, &agent_id, &opts).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── System status ─────────────────────────────────────────────────────────────

/// `GET /system/status` — component health plus coarse, tenant-scoped
/// counters.  Authenticated: counters never cross the tenant boundary.
pub async fn system_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    let store_ok = state.hub.store.ping().await.is_ok();
    let counters = match state.hub.store.tenant_counters(&ctx).await {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    Json(json!({
        "components": {
            "store": if store_ok { "ok" } else { "unreachable" },
            "vectorStore": if state.hub.vector.is_some() { "configured" } else { "absent" },
        },
        "connections": state.hub.registry.connection_count(),
        "missedNotifications": state.hub.registry.missed_notifications(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "counters": counters,
    }))
    .into_response()
}
