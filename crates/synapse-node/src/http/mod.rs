// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Router assembly and the two HTTP listeners.
//!
//! Request pipeline, outermost first: request-id → body limit → timeout
//! → tenant resolution (auth middleware) → handler.  The auth middleware
//! injects a [`RequestContext`] extension; every handler below it can
//! `Extension<RequestContext>` without caring how identity was resolved.

pub mod mcp;
pub mod rest;
pub mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};
use tracing::info;

use synapse_core::HubError;
use synapse_hub::Hub;
use synapse_tools::ToolRegistry;

use crate::auth::TenantResolver;
use crate::config::HttpConfig;

/// Shared state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub tools: Arc<ToolRegistry>,
    pub resolver: Arc<TenantResolver>,
    pub started_at: Instant,
}

/// Build the full route table.
pub fn router(state: AppState, config: &HttpConfig) -> Router {
    Router::new()
        .route("/health", get(rest::health))
        .route("/health.json", get(rest::health))
        .route("/ready", get(rest::ready))
        .route("/mcp", post(mcp::handle))
        .route("/ai-message", post(rest::post_message))
        .route("/ai-messages/:agent_id", get(rest::get_messages))
        .route("/system/status", get(rest::system_status))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_mw))
        .layer(TimeoutLayer::new(Duration::from_millis(
            config.request_timeout_ms.max(1),
        )))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Bind both listeners and serve until shutdown.
pub async fn serve(state: AppState, config: &HttpConfig) -> anyhow::Result<()> {
    let app = router(state, config);

    let mcp_addr = format!("{}:{}", config.bind_host, config.mcp_port);
    let hub_addr = format!("{}:{}", config.bind_host, config.message_hub_port);

    let mcp_listener = tokio::net::TcpListener::bind(&mcp_addr).await?;
    let hub_listener = tokio::net::TcpListener::bind(&hub_addr).await?;
    info!(mcp = %mcp_addr, message_hub = %hub_addr, "hub listening");

    let mcp_app = app.clone();
    tokio::try_join!(
        async move {
            axum::serve(mcp_listener, mcp_app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        },
        async move {
            axum::serve(hub_listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        },
    )?;
    Ok(())
}

/// Resolve on Ctrl-C / SIGINT.  In-flight requests drain; committed
/// database work is never rolled back by shutdown.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

// ── Auth middleware ───────────────────────────────────────────────────────────

/// Resolve tenant identity and inject the [`RequestContext`].
///
/// Also touches `lastSeen` for the calling agent — the registry's
/// definition of liveness is "sent us anything recently".
async fn auth_mw(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    match state.resolver.resolve(&path, req.headers()).await {
        Ok(ctx) => {
            if let Some(agent_id) = ctx.agent_id.clone() {
                let _ = state.hub.store.touch_agent(&ctx, &agent_id, None).await;
            }
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => error_response(&e),
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────────

/// Map a [`HubError`] to the REST wire shape: status from the kind, JSON
/// body with kind + message, kind echoed in `X-Mcp-Error-Kind`, and
/// `Retry-After` on 429.
pub fn error_response(err: &HubError) -> Response {
    let status = axum::http::StatusCode::from_u16(err.http_status())
        .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    let body = Json(serde_json::json!({
        "error": { "kind": err.kind(), "message": err.to_string() }
    }));
    let mut resp = (status, body).into_response();
    if let Ok(kind) = HeaderValue::from_str(err.kind()) {
        resp.headers_mut().insert("x-mcp-error-kind", kind);
    }
    if matches!(err, HubError::RateLimited) {
        resp.headers_mut()
            .insert(axum::http::header::RETRY_AFTER, HeaderValue::from_static("1"));
    }
    resp
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_carries_kind_header_and_status() {
        let resp = error_response(&HubError::Unauthorized("nope".into()));
        assert_eq!(resp.status(), 401);
        assert_eq!(
            resp.headers().get("x-mcp-error-kind").unwrap(),
            "Unauthorized"
        );
    }

    #[test]
    fn rate_limited_has_retry_after() {
        let resp = error_response(&HubError::RateLimited);
        assert_eq!(resp.status(), 429);
        assert!(resp.headers().get(axum::http::header::RETRY_AFTER).is_some());
    }

    #[test]
    fn storage_errors_are_500() {
        let resp = error_response(&HubError::storage("disk on fire"));
        assert_eq!(resp.status(), 500);
    }
}
