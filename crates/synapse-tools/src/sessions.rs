// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Session tools: begin/end and the tiered context bundle.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use synapse_core::{ContextDepth, HubError, RequestContext, ToolGroup};
use synapse_hub::{Hub, LearningHint};

use crate::{parse_args, to_value, Tool};

fn resolve_agent(ctx: &RequestContext, explicit: Option<String>) -> Result<String, HubError> {
    explicit
        .or_else(|| ctx.agent_id.clone())
        .ok_or_else(|| HubError::invalid_arg("agentId", "no agent id supplied or implied"))
}

fn parse_depth(s: Option<&str>) -> Result<ContextDepth, HubError> {
    match s {
        None => Ok(ContextDepth::default()),
        Some(raw) => ContextDepth::parse(raw)
            .ok_or_else(|| HubError::invalid_arg("depth", "expected hot, warm, or cold")),
    }
}

// ── begin_session ─────────────────────────────────────────────────────────────

pub struct BeginSessionTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeginArgs {
    #[serde(default)]
    agent_id: Option<String>,
    project_id: String,
    #[serde(default)]
    depth: Option<String>,
}

#[async_trait]
impl Tool for BeginSessionTool {
    fn name(&self) -> &str {
        "begin_session"
    }
    fn description(&self) -> &str {
        "Open (or reuse) a session for a project. Consumes the pending \
         handoff — at most one concurrent caller receives it — and \
         returns a context bundle."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" },
                "projectId": { "type": "string" },
                "depth": { "type": "string", "enum": ["hot", "warm", "cold"] }
            },
            "required": ["projectId"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Sessions
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: BeginArgs = parse_args(args)?;
        let agent_id = resolve_agent(ctx, args.agent_id)?;
        let depth = parse_depth(args.depth.as_deref())?;
        let outcome = self
            .hub
            .sessions
            .begin_session(ctx, &agent_id, &args.project_id, depth)
            .await?;
        self.hub.cache.invalidate_agent(&ctx.tenant_id, &agent_id);
        to_value(&outcome)
    }
}

// ── end_session ───────────────────────────────────────────────────────────────

pub struct EndSessionTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndArgs {
    #[serde(default)]
    agent_id: Option<String>,
    project_id: String,
    summary: String,
    #[serde(default)]
    open_items: Vec<String>,
    #[serde(default)]
    learnings: Vec<LearningHint>,
}

#[async_trait]
impl Tool for EndSessionTool {
    fn name(&self) -> &str {
        "end_session"
    }
    fn description(&self) -> &str {
        "Close the open session and write a handoff note (summary + open \
         items) for the next session on this project. Optional learning \
         hints are recorded as individual memory."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" },
                "projectId": { "type": "string" },
                "summary": { "type": "string" },
                "openItems": { "type": "array", "items": { "type": "string" } },
                "learnings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "context": { "type": "string" },
                            "lesson": { "type": "string" },
                            "confidence": { "type": "number" }
                        },
                        "required": ["context", "lesson"]
                    }
                }
            },
            "required": ["projectId", "summary"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Sessions
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: EndArgs = parse_args(args)?;
        let agent_id = resolve_agent(ctx, args.agent_id)?;
        let outcome = self
            .hub
            .sessions
            .end_session(
                ctx,
                &agent_id,
                &args.project_id,
                &args.summary,
                &args.open_items,
                &args.learnings,
            )
            .await?;
        self.hub.cache.invalidate_agent(&ctx.tenant_id, &agent_id);
        to_value(&outcome)
    }
}

// ── get_agent_context ─────────────────────────────────────────────────────────

pub struct GetAgentContextTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextArgs {
    #[serde(default)]
    agent_id: Option<String>,
    project_id: String,
    #[serde(default)]
    depth: Option<String>,
}

#[async_trait]
impl Tool for GetAgentContextTool {
    fn name(&self) -> &str {
        "get_agent_context"
    }
    fn description(&self) -> &str {
        "Assemble the tiered context bundle (hot/warm/cold) for an agent \
         resuming work on a project. Deterministic for a given database \
         state; carries a tokenEstimate for budgeting."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" },
                "projectId": { "type": "string" },
                "depth": { "type": "string", "enum": ["hot", "warm", "cold"] }
            },
            "required": ["projectId"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Sessions
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: ContextArgs = parse_args(args)?;
        let agent_id = resolve_agent(ctx, args.agent_id)?;
        let depth = parse_depth(args.depth.as_deref())?;

        let kind = format!("context:{}:{:?}", args.project_id, depth);
        if let Some(hit) = self.hub.cache.get(&ctx.tenant_id, &agent_id, &kind) {
            return Ok(hit);
        }
        let bundle = self
            .hub
            .sessions
            .context_bundle(ctx, &agent_id, &args.project_id, depth)
            .await?;
        let value = to_value(&bundle)?;
        self.hub
            .cache
            .put(&ctx.tenant_id, &agent_id, &kind, value.clone());
        Ok(value)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_hub::{HubOptions, NullNotifier};
    use synapse_store::MemoryStore;

    fn test_hub() -> Arc<Hub> {
        Hub::new(
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            None,
            Arc::new(NullNotifier),
            HubOptions::default(),
        )
    }

    fn agent_ctx(tenant: &str, agent: &str) -> RequestContext {
        RequestContext::new(tenant).with_agent(agent)
    }

    #[tokio::test]
    async fn end_then_begin_hands_off_once() {
        let hub = test_hub();
        let c = agent_ctx("t1", "a1");

        BeginSessionTool { hub: hub.clone() }
            .call(&c, json!({"projectId": "p1"}))
            .await
            .unwrap();
        EndSessionTool { hub: hub.clone() }
            .call(&c, json!({"projectId": "p1", "summary": "S", "openItems": ["finish tests"]}))
            .await
            .unwrap();

        let begin = BeginSessionTool { hub: hub.clone() };
        let first = begin.call(&c, json!({"projectId": "p1"})).await.unwrap();
        assert_eq!(first["handoff"]["summary"], "S");
        assert_eq!(first["handoff"]["openItems"], json!(["finish tests"]));

        // Session already open; handoff already consumed.
        let second = begin.call(&c, json!({"projectId": "p1"})).await.unwrap();
        assert!(second["handoff"].is_null());
        assert_eq!(second["sessionId"], first["sessionId"]);
    }

    #[tokio::test]
    async fn end_session_records_learning_hints() {
        let hub = test_hub();
        let c = agent_ctx("t1", "a1");
        let out = EndSessionTool { hub }
            .call(
                &c,
                json!({
                    "projectId": "p1",
                    "summary": "done",
                    "learnings": [{"context": "deploy", "lesson": "warm the cache"}]
                }),
            )
            .await
            .unwrap();
        assert_eq!(out["recordedLearnings"], 1);
    }

    #[tokio::test]
    async fn invalid_depth_is_rejected() {
        let hub = test_hub();
        let err = GetAgentContextTool { hub }
            .call(&agent_ctx("t1", "a1"), json!({"projectId": "p1", "depth": "lukewarm"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[tokio::test]
    async fn context_bundle_depth_defaults_to_warm() {
        let hub = test_hub();
        let out = GetAgentContextTool { hub }
            .call(&agent_ctx("t1", "a1"), json!({"projectId": "p1"}))
            .await
            .unwrap();
        assert_eq!(out["meta"]["depth"], "warm");
        assert_eq!(out["meta"]["projectId"], "p1");
    }

    #[tokio::test]
    async fn context_cache_is_invalidated_by_session_end() {
        let hub = test_hub();
        let c = agent_ctx("t1", "a1");
        let context = GetAgentContextTool { hub: hub.clone() };

        let before = context.call(&c, json!({"projectId": "p1"})).await.unwrap();
        assert!(before["warm"]["lastSessionSummary"].is_null());

        EndSessionTool { hub }
            .call(&c, json!({"projectId": "p1", "summary": "checkpoint"}))
            .await
            .unwrap();

        let after = context.call(&c, json!({"projectId": "p1"})).await.unwrap();
        assert_eq!(after["warm"]["lastSessionSummary"], "checkpoint");
    }
}
