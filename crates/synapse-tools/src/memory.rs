// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Individual-memory tools: learnings and preferences.
//!
//! These are agent-private within the tenant.  The agent id defaults to
//! the caller's own (`ctx.agent_id`); naming another agent explicitly is
//! allowed for tooling, consistent with tenant-scoped inbox reads.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use synapse_core::{HubError, RequestContext, ToolGroup};
use synapse_hub::Hub;

use crate::{parse_args, to_value, Tool};

fn resolve_agent(ctx: &RequestContext, explicit: Option<String>) -> Result<String, HubError> {
    explicit
        .or_else(|| ctx.agent_id.clone())
        .ok_or_else(|| HubError::invalid_arg("agentId", "no agent id supplied or implied"))
}

// ── record_learning ───────────────────────────────────────────────────────────

pub struct RecordLearningTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordLearningArgs {
    #[serde(default)]
    agent_id: Option<String>,
    context: String,
    lesson: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

#[async_trait]
impl Tool for RecordLearningTool {
    fn name(&self) -> &str {
        "record_learning"
    }
    fn description(&self) -> &str {
        "Record a durable lesson with a confidence in [0,1]. Learnings \
         seed later context bundles, ranked by recency and confidence."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" },
                "context": { "type": "string" },
                "lesson": { "type": "string" },
                "confidence": { "type": "number" }
            },
            "required": ["context", "lesson"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Memory
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: RecordLearningArgs = parse_args(args)?;
        let agent_id = resolve_agent(ctx, args.agent_id)?;
        let learning = self
            .hub
            .store
            .record_learning(ctx, &agent_id, &args.context, &args.lesson, args.confidence)
            .await?;
        self.hub.cache.invalidate_agent(&ctx.tenant_id, &agent_id);
        to_value(&learning)
    }
}

// ── set_preferences ───────────────────────────────────────────────────────────

pub struct SetPreferencesTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPreferencesArgs {
    #[serde(default)]
    agent_id: Option<String>,
    preferences: serde_json::Map<String, Value>,
}

#[async_trait]
impl Tool for SetPreferencesTool {
    fn name(&self) -> &str {
        "set_preferences"
    }
    fn description(&self) -> &str {
        "Set agent-private key/value preferences, last-writer-wins."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" },
                "preferences": { "type": "object" }
            },
            "required": ["preferences"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Memory
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: SetPreferencesArgs = parse_args(args)?;
        let agent_id = resolve_agent(ctx, args.agent_id)?;
        let updated = self
            .hub
            .store
            .set_preferences(ctx, &agent_id, &args.preferences)
            .await?;
        self.hub.cache.invalidate_agent(&ctx.tenant_id, &agent_id);
        Ok(json!({ "agentId": agent_id, "updated": updated.len() }))
    }
}

// ── get_individual_memory ─────────────────────────────────────────────────────

pub struct GetIndividualMemoryTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetMemoryArgs {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[async_trait]
impl Tool for GetIndividualMemoryTool {
    fn name(&self) -> &str {
        "get_individual_memory"
    }
    fn description(&self) -> &str {
        "Read an agent's private memory: learnings ranked by recency × \
         confidence, plus all preferences."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" },
                "limit": { "type": "integer" }
            }
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Memory
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: GetMemoryArgs = parse_args(args)?;
        let agent_id = resolve_agent(ctx, args.agent_id)?;

        let kind = format!("memory:{}", args.limit);
        if let Some(hit) = self.hub.cache.get(&ctx.tenant_id, &agent_id, &kind) {
            return Ok(hit);
        }
        let memory = self
            .hub
            .store
            .individual_memory(ctx, &agent_id, args.limit)
            .await?;
        let value = to_value(&memory)?;
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
    async fn learning_then_memory_shows_it_first() {
        let hub = test_hub();
        let c = agent_ctx("t1", "a1");
        RecordLearningTool { hub: hub.clone() }
            .call(&c, json!({"context": "ci", "lesson": "pin the toolchain", "confidence": 0.9}))
            .await
            .unwrap();

        let memory = GetIndividualMemoryTool { hub }
            .call(&c, json!({}))
            .await
            .unwrap();
        assert_eq!(memory["learnings"][0]["lesson"], "pin the toolchain");
    }

    #[tokio::test]
    async fn agent_id_defaults_to_caller() {
        let hub = test_hub();
        let c = agent_ctx("t1", "me");
        let out = RecordLearningTool { hub }
            .call(&c, json!({"context": "x", "lesson": "y"}))
            .await
            .unwrap();
        assert_eq!(out["agentId"], "me");
    }

    #[tokio::test]
    async fn no_agent_anywhere_is_invalid() {
        let hub = test_hub();
        let anonymous = RequestContext::new("t1");
        let err = RecordLearningTool { hub }
            .call(&anonymous, json!({"context": "x", "lesson": "y"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[tokio::test]
    async fn set_then_get_preference_round_trips() {
        let hub = test_hub();
        let c = agent_ctx("t1", "a1");
        SetPreferencesTool { hub: hub.clone() }
            .call(&c, json!({"preferences": {"editor": "helix"}}))
            .await
            .unwrap();

        let memory = GetIndividualMemoryTool { hub }
            .call(&c, json!({}))
            .await
            .unwrap();
        assert_eq!(memory["preferences"][0]["key"], "editor");
        assert_eq!(memory["preferences"][0]["value"], "helix");
    }

    #[tokio::test]
    async fn memory_cache_is_invalidated_by_writes() {
        let hub = test_hub();
        let c = agent_ctx("t1", "a1");
        let read = GetIndividualMemoryTool { hub: hub.clone() };

        let before = read.call(&c, json!({})).await.unwrap();
        assert!(before["learnings"].as_array().unwrap().is_empty());

        RecordLearningTool { hub }
            .call(&c, json!({"context": "c", "lesson": "l"}))
            .await
            .unwrap();

        let after = read.call(&c, json!({})).await.unwrap();
        assert_eq!(after["learnings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_is_tenant_scoped() {
        let hub = test_hub();
        RecordLearningTool { hub: hub.clone() }
            .call(&agent_ctx("t1", "a1"), json!({"context": "c", "lesson": "secret"}))
            .await
            .unwrap();

        let other = GetIndividualMemoryTool { hub }
            .call(&agent_ctx("t2", "a1"), json!({}))
            .await
            .unwrap();
        assert!(other["learnings"].as_array().unwrap().is_empty());
    }
}
