// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! End-to-end boundary scenarios, driven through the real HTTP router
//! with `tower::ServiceExt::oneshot` — no sockets, real everything else.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use synapse_hub::{Hub, HubOptions, NullNotifier};
use synapse_node::auth::{api_key_digest, TenantResolver};
use synapse_node::config::HttpConfig;
use synapse_node::http::{router, AppState};
use synapse_store::MemoryStore;
use synapse_tools::default_registry;

const T1_KEY: &str = "tenant-one-key";
const T2_KEY: &str = "tenant-two-key";

async fn test_router() -> axum::Router {
    let store = Arc::new(MemoryStore::open_in_memory().unwrap());
    store
        .insert_api_key("T1", &api_key_digest(T1_KEY), &[], "t1")
        .await
        .unwrap();
    store
        .insert_api_key("T2", &api_key_digest(T2_KEY), &[], "t2")
        .await
        .unwrap();

    let hub = Hub::new(
        store.clone(),
        None,
        Arc::new(NullNotifier),
        HubOptions::default(),
    );
    let tools = Arc::new(default_registry(hub.clone()));
    let resolver = Arc::new(TenantResolver::new(
        store, None, "default", None, 10_000, 10_000,
    ));
    let state = AppState {
        hub,
        tools,
        resolver,
        started_at: Instant::now(),
    };
    router(state, &HttpConfig::default())
}

fn rpc_request(key: &str, agent: Option<&str>, method: &str, params: Value) -> Request<Body> {
    let envelope = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("x-api-key", key);
    if let Some(agent) = agent {
        builder = builder.header("x-agent-id", agent);
    }
    builder.body(Body::from(envelope.to_string())).unwrap()
}

fn call(key: &str, agent: Option<&str>, tool: &str, args: Value) -> Request<Body> {
    rpc_request(key, agent, "tools/call", json!({ "name": tool, "arguments": args }))
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Unwrap an MCP success envelope into the tool's structured result.
async fn tool_result(resp: axum::response::Response) -> Value {
    let v = body_json(resp).await;
    assert_eq!(
        v["result"]["isError"], false,
        "expected success, got: {v}"
    );
    serde_json::from_str(v["result"]["content"][0]["text"].as_str().unwrap()).unwrap()
}

// ── Scenario 1: cross-tenant isolation ────────────────────────────────────────

#[tokio::test]
async fn cross_tenant_rows_are_invisible() {
    let app = test_router().await;

    let resp = app
        .clone()
        .oneshot(call(
            T1_KEY,
            None,
            "create_entities",
            json!({"entities": [{"name": "A", "type": "test"}]}),
        ))
        .await
        .unwrap();
    let created = tool_result(resp).await;
    assert_eq!(created["createdIds"].as_array().unwrap().len(), 1);

    // T2's graph is empty.
    let resp = app
        .clone()
        .oneshot(call(T2_KEY, None, "read_graph", json!({})))
        .await
        .unwrap();
    let graph = tool_result(resp).await;
    assert_eq!(graph["stats"]["entityCount"], 0);

    // T2's search finds nothing.
    let resp = app
        .clone()
        .oneshot(call(T2_KEY, None, "search_entities", json!({"query": "A"})))
        .await
        .unwrap();
    let found = tool_result(resp).await;
    assert!(found["results"].as_array().unwrap().is_empty());

    // T2's inbox for any agent is empty.
    let resp = app
        .oneshot(call(T2_KEY, None, "get_ai_messages", json!({"agentId": "any"})))
        .await
        .unwrap();
    let inbox = tool_result(resp).await;
    assert_eq!(inbox["total"], 0);
}

// ── Scenario 2: args cannot spoof tenant ──────────────────────────────────────

#[tokio::test]
async fn tenant_id_in_arguments_is_ignored_for_authorization() {
    let app = test_router().await;

    app.clone()
        .oneshot(call(
            T1_KEY,
            None,
            "create_entities",
            json!({"entities": [{"name": "A", "type": "test"}], "tenantId": "T2"}),
        ))
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(call(T2_KEY, None, "read_graph", json!({})))
        .await
        .unwrap();
    let t2 = tool_result(resp).await;
    assert_eq!(t2["stats"]["entityCount"], 0, "entity must not land in T2");

    let resp = app
        .oneshot(call(T1_KEY, None, "read_graph", json!({})))
        .await
        .unwrap();
    let t1 = tool_result(resp).await;
    assert_eq!(t1["stats"]["entityCount"], 1, "entity lands in the caller's tenant");
}

// ── Scenario 3: broadcast excludes self ───────────────────────────────────────

#[tokio::test]
async fn broadcast_reaches_everyone_but_the_sender() {
    let app = test_router().await;

    for agent in ["alpha", "beta", "gamma"] {
        app.clone()
            .oneshot(call(
                T1_KEY,
                Some(agent),
                "register_agent",
                json!({"id": agent, "name": agent}),
            ))
            .await
            .unwrap();
    }

    let resp = app
        .clone()
        .oneshot(call(
            T1_KEY,
            Some("alpha"),
            "send_ai_message",
            json!({"broadcast": true, "content": "ping"}),
        ))
        .await
        .unwrap();
    let sent = tool_result(resp).await;
    let mut recipients: Vec<String> = sent["recipients"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    recipients.sort();
    assert_eq!(recipients, vec!["beta", "gamma"]);
    assert_eq!(sent["messageIds"].as_array().unwrap().len(), 2);
}

// ── Scenario 4: capability match is AND ───────────────────────────────────────

#[tokio::test]
async fn capability_selector_requires_all_tags() {
    let app = test_router().await;

    for (agent, caps) in [
        ("only-x", json!(["x"])),
        ("both", json!(["x", "y"])),
        ("only-y", json!(["y"])),
    ] {
        app.clone()
            .oneshot(call(
                T1_KEY,
                Some(agent),
                "register_agent",
                json!({"id": agent, "name": agent, "capabilities": caps}),
            ))
            .await
            .unwrap();
    }

    let resp = app
        .oneshot(call(
            T1_KEY,
            Some("sender"),
            "send_ai_message",
            json!({"toCapabilities": ["x", "y"], "content": "task"}),
        ))
        .await
        .unwrap();
    let sent = tool_result(resp).await;
    assert_eq!(sent["recipients"], json!(["both"]));
}

// ── Scenario 5: handoff at-most-once under concurrency ────────────────────────

#[tokio::test]
async fn concurrent_begins_consume_the_handoff_exactly_once() {
    let app = test_router().await;

    app.clone()
        .oneshot(call(
            T1_KEY,
            Some("a1"),
            "end_session",
            json!({"projectId": "p1", "summary": "S"}),
        ))
        .await
        .unwrap();

    let begin = |agent: &'static str| {
        let app = app.clone();
        async move {
            let resp = app
                .oneshot(call(
                    T1_KEY,
                    Some(agent),
                    "begin_session",
                    json!({"projectId": "p1", "depth": "hot"}),
                ))
                .await
                .unwrap();
            tool_result(resp).await
        }
    };

    let (first, second) = tokio::join!(begin("a1"), begin("a2"));
    let got: Vec<bool> = [&first, &second]
        .iter()
        .map(|v| !v["handoff"].is_null())
        .collect();
    assert_eq!(
        got.iter().filter(|b| **b).count(),
        1,
        "exactly one caller receives the handoff: {first} / {second}"
    );
    let winner = if got[0] { &first } else { &second };
    assert_eq!(winner["handoff"]["summary"], "S");
}

// ── Scenario 6: semantic degradation ──────────────────────────────────────────

#[tokio::test]
async fn semantic_search_without_vector_store_degrades_cleanly() {
    let app = test_router().await;

    let resp = app
        .oneshot(call(
            T1_KEY,
            None,
            "search_entities",
            json!({"query": "foo", "mode": "semantic"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let found = tool_result(resp).await;
    assert!(found["results"].as_array().unwrap().is_empty());
    assert_eq!(found["modeUsed"], "none");
}

// ── Wire-level checks ─────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_public_but_mcp_is_not() {
    let app = test_router().await;

    let resp = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(
            Request::post("/mcp")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        resp.headers().get("x-mcp-error-kind").unwrap(),
        "Unauthorized"
    );
}

#[tokio::test]
async fn ready_reports_store_reachability() {
    let app = test_router().await;
    let resp = app
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn tools_list_returns_the_full_sorted_catalogue() {
    let app = test_router().await;
    let resp = app
        .oneshot(rpc_request(T1_KEY, None, "tools/list", json!({})))
        .await
        .unwrap();
    let v = body_json(resp).await;
    let tools = v["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), synapse_tools::TOOL_NAMES.len());
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, synapse_tools::TOOL_NAMES);
}

#[tokio::test]
async fn malformed_body_is_json_rpc_parse_error() {
    let app = test_router().await;
    let resp = app
        .oneshot(
            Request::post("/mcp")
                .header("content-type", "application/json")
                .header("x-api-key", T1_KEY)
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    let v = body_json(resp).await;
    assert_eq!(v["error"]["code"], -32700);
}

#[tokio::test]
async fn wrong_jsonrpc_version_is_invalid_request() {
    let app = test_router().await;
    let resp = app
        .oneshot(
            Request::post("/mcp")
                .header("content-type", "application/json")
                .header("x-api-key", T1_KEY)
                .body(Body::from(
                    json!({"jsonrpc": "1.0", "id": 1, "method": "tools/list"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let v = body_json(resp).await;
    assert_eq!(v["error"]["code"], -32600);
}

#[tokio::test]
async fn unknown_method_is_json_rpc_32601() {
    let app = test_router().await;
    let resp = app
        .oneshot(rpc_request(T1_KEY, None, "tools/destroy", json!({})))
        .await
        .unwrap();
    let v = body_json(resp).await;
    assert_eq!(v["error"]["code"], -32601);
}

#[tokio::test]
async fn tool_failure_rides_result_with_kind_header() {
    let app = test_router().await;
    let resp = app
        .oneshot(call(
            T1_KEY,
            Some("a1"),
            "send_ai_message",
            json!({"content": "nobody will get this"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("x-mcp-error-kind").unwrap(),
        "NoRecipient"
    );
    let v = body_json(resp).await;
    assert_eq!(v["result"]["isError"], true);
}

#[tokio::test]
async fn rest_wrappers_mirror_the_tools() {
    let app = test_router().await;

    // Legacy alias shape on the REST path.
    let resp = app
        .clone()
        .oneshot(
            Request::post("/ai-message")
                .header("content-type", "application/json")
                .header("x-api-key", T1_KEY)
                .header("x-agent-id", "alpha")
                .body(Body::from(
                    json!({"agentId": "beta", "message": "rest says hi"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let sent = body_json(resp).await;
    assert_eq!(sent["recipients"], json!(["beta"]));

    let resp = app
        .oneshot(
            Request::get("/ai-messages/beta?unreadOnly=true&limit=10")
                .header("x-api-key", T1_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let page = body_json(resp).await;
    assert_eq!(page["unread"], 1);
    assert_eq!(page["messages"][0]["content"], "rest says hi");
}

#[tokio::test]
async fn system_status_reports_tenant_scoped_counters() {
    let app = test_router().await;

    app.clone()
        .oneshot(call(
            T1_KEY,
            None,
            "create_entities",
            json!({"entities": [{"name": "A", "type": "t"}]}),
        ))
        .await
        .unwrap();

    let status_for = |key: &'static str| {
        let app = app.clone();
        async move {
            let resp = app
                .oneshot(
                    Request::get("/system/status")
                        .header("x-api-key", key)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            body_json(resp).await
        }
    };

    let t1 = status_for(T1_KEY).await;
    assert_eq!(t1["components"]["store"], "ok");
    assert_eq!(t1["components"]["vectorStore"], "absent");
    assert_eq!(t1["counters"]["entities"], 1);

    let t2 = status_for(T2_KEY).await;
    assert_eq!(t2["counters"]["entities"], 0, "counters are tenant-scoped");
}
