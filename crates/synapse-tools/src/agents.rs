// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent lifecycle tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use synapse_core::{AgentStatus, HubError, RequestContext, ToolGroup};
use synapse_hub::Hub;

use crate::{parse_args, to_value, Tool};

// ── register_agent ────────────────────────────────────────────────────────────

pub struct RegisterAgentTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterArgs {
    /// Client-chosen id; generated when absent (the bridge usually
    /// supplies its own).
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[async_trait]
impl Tool for RegisterAgentTool {
    fn name(&self) -> &str {
        "register_agent"
    }
    fn description(&self) -> &str {
        "Register (or refresh) an agent with its capability tags. The id \
         is client-chosen or generated; re-registering updates the record."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "name": { "type": "string" },
                "capabilities": { "type": "array", "items": { "type": "string" } },
                "status": { "type": "string", "enum": ["online", "offline", "busy", "error"] },
                "metadata": { "type": "object" }
            },
            "required": ["name"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Agents
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: RegisterArgs = parse_args(args)?;
        let id = args.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let status = match args.status.as_deref() {
            Some(s) => AgentStatus::parse(s)
                .ok_or_else(|| HubError::invalid_arg("status", "unknown status value"))?,
            None => AgentStatus::Online,
        };
        let metadata = args.metadata.unwrap_or_else(|| json!({}));
        let record = self
            .hub
            .store
            .upsert_agent(ctx, &id, &args.name, &args.capabilities, status, &metadata)
            .await?;
        self.hub.cache.invalidate_agent(&ctx.tenant_id, &id);
        to_value(&record)
    }
}

// ── set_agent_identity ────────────────────────────────────────────────────────

pub struct SetAgentIdentityTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetIdentityArgs {
    agent_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    capabilities: Option<Vec<String>>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[async_trait]
impl Tool for SetAgentIdentityTool {
    fn name(&self) -> &str {
        "set_agent_identity"
    }
    fn description(&self) -> &str {
        "Update an agent's name, capabilities, or metadata. Fields left \
         out keep their current value; an unknown agent is created."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" },
                "name": { "type": "string" },
                "capabilities": { "type": "array", "items": { "type": "string" } },
                "metadata": { "type": "object" }
            },
            "required": ["agentId"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Agents
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: SetIdentityArgs = parse_args(args)?;
        let current = self.hub.store.get_agent(ctx, &args.agent_id).await?;

        let (name, capabilities, status, metadata) = match current {
            Some(existing) => (
                args.name.unwrap_or(existing.name),
                args.capabilities.unwrap_or(existing.capabilities),
                existing.status,
                args.metadata.unwrap_or(existing.metadata),
            ),
            None => (
                args.name.unwrap_or_else(|| args.agent_id.clone()),
                args.capabilities.unwrap_or_default(),
                AgentStatus::Online,
                args.metadata.unwrap_or_else(|| json!({})),
            ),
        };

        let record = self
            .hub
            .store
            .upsert_agent(ctx, &args.agent_id, &name, &capabilities, status, &metadata)
            .await?;
        self.hub.cache.invalidate_agent(&ctx.tenant_id, &args.agent_id);
        to_value(&record)
    }
}

// ── get_agent_status ──────────────────────────────────────────────────────────

pub struct GetAgentStatusTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetStatusArgs {
    #[serde(default)]
    agent_id: Option<String>,
}

#[async_trait]
impl Tool for GetAgentStatusTool {
    fn name(&self) -> &str {
        "get_agent_status"
    }
    fn description(&self) -> &str {
        "Status of one agent (by id) or all agents in the tenant, with \
         capabilities and lastSeen."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" }
            }
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Agents
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: GetStatusArgs = parse_args(args)?;
        match args.agent_id {
            Some(id) => {
                if let Some(hit) = self.hub.cache.get(&ctx.tenant_id, &id, "identity") {
                    return Ok(hit);
                }
                let agent = self
                    .hub
                    .store
                    .get_agent(ctx, &id)
                    .await?
                    .ok_or_else(|| HubError::not_found(format!("agent `{id}`")))?;
                let value = to_value(&agent)?;
                self.hub.cache.put(&ctx.tenant_id, &id, "identity", value.clone());
                Ok(value)
            }
            None => {
                let agents = self.hub.store.list_agents(ctx).await?;
                let count = agents.len();
                Ok(json!({
                    "agents": agents,
                    "count": count,
                    "connected": self.hub.registry.connection_count(),
                }))
            }
        }
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

    fn ctx(tenant: &str) -> RequestContext {
        RequestContext::new(tenant)
    }

    #[tokio::test]
    async fn register_generates_id_when_absent() {
        let hub = test_hub();
        let out = RegisterAgentTool { hub }
            .call(&ctx("t1"), json!({"name": "builder", "capabilities": ["rust"]}))
            .await
            .unwrap();
        assert!(!out["id"].as_str().unwrap().is_empty());
        assert_eq!(out["status"], "online");
        assert_eq!(out["capabilities"], json!(["rust"]));
    }

    #[tokio::test]
    async fn register_with_client_id_is_an_upsert() {
        let hub = test_hub();
        let tool = RegisterAgentTool { hub: hub.clone() };
        tool.call(&ctx("t1"), json!({"id": "a1", "name": "v1"})).await.unwrap();
        tool.call(&ctx("t1"), json!({"id": "a1", "name": "v2"})).await.unwrap();

        let status = GetAgentStatusTool { hub }
            .call(&ctx("t1"), json!({"agentId": "a1"}))
            .await
            .unwrap();
        assert_eq!(status["name"], "v2");
    }

    #[tokio::test]
    async fn invalid_status_value_is_rejected() {
        let hub = test_hub();
        let err = RegisterAgentTool { hub }
            .call(&ctx("t1"), json!({"name": "x", "status": "sleepy"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[tokio::test]
    async fn set_identity_merges_with_existing_fields() {
        let hub = test_hub();
        RegisterAgentTool { hub: hub.clone() }
            .call(
                &ctx("t1"),
                json!({"id": "a1", "name": "orig", "capabilities": ["x"]}),
            )
            .await
            .unwrap();

        let out = SetAgentIdentityTool { hub }
            .call(&ctx("t1"), json!({"agentId": "a1", "capabilities": ["x", "y"]}))
            .await
            .unwrap();
        assert_eq!(out["name"], "orig", "unset fields keep their value");
        assert_eq!(out["capabilities"], json!(["x", "y"]));
    }

    #[tokio::test]
    async fn identity_cache_is_refreshed_by_reregistration() {
        let hub = test_hub();
        let register = RegisterAgentTool { hub: hub.clone() };
        let status = GetAgentStatusTool { hub };

        register.call(&ctx("t1"), json!({"id": "a1", "name": "first"})).await.unwrap();
        let cached = status.call(&ctx("t1"), json!({"agentId": "a1"})).await.unwrap();
        assert_eq!(cached["name"], "first");

        register.call(&ctx("t1"), json!({"id": "a1", "name": "second"})).await.unwrap();
        let fresh = status.call(&ctx("t1"), json!({"agentId": "a1"})).await.unwrap();
        assert_eq!(fresh["name"], "second", "registration must drop the cached identity");
    }

    #[tokio::test]
    async fn status_for_unknown_agent_is_not_found() {
        let hub = test_hub();
        let err = GetAgentStatusTool { hub }
            .call(&ctx("t1"), json!({"agentId": "ghost"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn status_listing_is_tenant_scoped() {
        let hub = test_hub();
        RegisterAgentTool { hub: hub.clone() }
            .call(&ctx("t1"), json!({"id": "a1", "name": "one"}))
            .await
            .unwrap();

        let t2 = GetAgentStatusTool { hub }
            .call(&ctx("t2"), json!({}))
            .await
            .unwrap();
        assert_eq!(t2["count"], 0);
    }
}
