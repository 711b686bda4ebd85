// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The MCP JSON-RPC 2.0 surface: `POST /mcp`.
//!
//! Two methods: `tools/list` and `tools/call`.  A successful call wraps
//! the structured result as MCP text content:
//!
//! ```json
//! { "jsonrpc": "2.0", "id": 1,
//!   "result": { "content": [{"type": "text", "text": "<json>"}],
//!               "isError": false } }
//! ```
//!
//! Tool failures stay inside the JSON-RPC `result` with `isError: true`
//! (HTTP 200) — that is the MCP convention — and the machine-readable
//! kind rides the `X-Mcp-Error-Kind` response header as a side channel.
//! Envelope-level failures use the standard JSON-RPC error codes
//! (-32700 parse, -32600 invalid request, -32601 method not found,
//! -32602 invalid params).

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use synapse_core::{HubError, RequestContext};

use super::AppState;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

pub async fn handle(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let req: RpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return rpc_error(Value::Null, -32700, format!("parse error: {e}")).into_response()
        }
    };

    if req.jsonrpc.as_deref() != Some("2.0") {
        return rpc_error(
            req.id.unwrap_or(Value::Null),
            -32600,
            "invalid request: jsonrpc must be \"2.0\"".to_string(),
        )
        .into_response();
    }
    let id = req.id.unwrap_or(Value::Null);

    match req.method.as_str() {
        "tools/list" => {
            let tools = state.tools.schemas();
            Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "tools": tools }
            }))
            .into_response()
        }
        "tools/call" => {
            let params: CallParams = match serde_json::from_value(req.params.unwrap_or(json!({})))
            {
                Ok(p) => p,
                Err(e) => {
                    return rpc_error(id, -32602, format!("invalid params: {e}")).into_response()
                }
            };
            let args = params.arguments.unwrap_or_else(|| json!({}));
            debug!(
                tenant = %ctx.tenant_id,
                correlation = %ctx.correlation_id,
                tool = %params.name,
                "tools/call"
            );

            match state.tools.dispatch(&ctx, &params.name, args).await {
                Ok(result) => {
                    let text = serde_json::to_string(&result).unwrap_or_else(|_| "{}".into());
                    Json(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "content": [{ "type": "text", "text": text }],
                            "isError": false
                        }
                    }))
                    .into_response()
                }
                Err(err) => tool_error(id, &err),
            }
        }
        other => rpc_error(id, -32601, format!("method not found: {other}")).into_response(),
    }
}

/// Tool-level failure: JSON-RPC result with `isError: true` plus the
/// kind side-channel header.
fn tool_error(id: Value, err: &HubError) -> Response {
    let mut resp = Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [{ "type": "text", "text": err.to_string() }],
            "isError": true
        }
    }))
    .into_response();
    if let Ok(kind) = HeaderValue::from_str(err.kind()) {
        resp.headers_mut().insert("x-mcp-error-kind", kind);
    }
    resp
}

/// Envelope-level failure: standard JSON-RPC error object.
fn rpc_error(id: Value, code: i64, message: String) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    }))
}

// ── Unit tests ────────────────────────────────────────────────────────────────
