// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Messaging tools.
//!
//! Inbox reads are tenant-scoped observability: any agent in the tenant
//! may read any inbox, but `markAsRead` only takes effect when the caller
//! *is* the inbox owner — the store enforces that, silently.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use synapse_core::{HubError, RequestContext, ToolGroup};
use synapse_hub::{Hub, SendRequest};
use synapse_store::ListMessageOpts;

use crate::{parse_args, to_value, Tool};

// ── send_ai_message ───────────────────────────────────────────────────────────

pub struct SendAiMessageTool {
    pub hub: Arc<Hub>,
}

#[async_trait]
impl Tool for SendAiMessageTool {
    fn name(&self) -> &str {
        "send_ai_message"
    }
    fn description(&self) -> &str {
        "Send an addressed message. Exactly one selector applies, checked \
         in order: broadcast (or to='*'), toCapabilities (AND match), to \
         (direct). Delivery is store-first; WebSocket pushes are \
         best-effort."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "from": { "type": "string" },
                "to": { "type": "string" },
                "toCapabilities": { "type": "array", "items": { "type": "string" } },
                "broadcast": { "type": "boolean" },
                "excludeSelf": { "type": "boolean" },
                "content": { "type": "string" },
                "type": { "type": "string" },
                "priority": { "type": "string", "enum": ["low", "normal", "high", "urgent"] }
            },
            "required": ["content"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Messaging
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let req: SendRequest = parse_args(args)?;
        let outcome = self.hub.router.send(ctx, &req).await?;
        to_value(&outcome)
    }
}

// ── get_ai_messages ───────────────────────────────────────────────────────────

pub struct GetAiMessagesTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetMessagesArgs {
    agent_id: String,
    #[serde(default)]
    unread_only: bool,
    #[serde(default)]
    since_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    mark_as_read: bool,
}

#[async_trait]
impl Tool for GetAiMessagesTool {
    fn name(&self) -> &str {
        "get_ai_messages"
    }
    fn description(&self) -> &str {
        "Read an agent's inbox in insertion order. markAsRead stamps \
         readAt on exactly the returned rows, and only when the caller \
         owns the inbox."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" },
                "unreadOnly": { "type": "boolean" },
                "sinceId": { "type": "string" },
                "limit": { "type": "integer" },
                "markAsRead": { "type": "boolean" }
            },
            "required": ["agentId"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Messaging
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: GetMessagesArgs = parse_args(args)?;
        let opts = ListMessageOpts {
            unread_only: args.unread_only,
            since_id: args.since_id.clone(),
            limit: args.limit,
            mark_as_read: args.mark_as_read,
        };

        // Plain default reads are cacheable; anything parameterized (or
        // mutating, via markAsRead) goes straight to the store.
        let cacheable = !args.unread_only
            && args.since_id.is_none()
            && args.limit.is_none()
            && !args.mark_as_read;
        if cacheable {
            if let Some(hit) = self.hub.cache.get(&ctx.tenant_id, &args.agent_id, "inbox") {
                return Ok(hit);
            }
        }

        let page = self.hub.store.list_messages(ctx, &args.agent_id, &opts).await?;
        let value = to_value(&page)?;
        if cacheable {
            self.hub
                .cache
                .put(&ctx.tenant_id, &args.agent_id, "inbox", value.clone());
        } else if args.mark_as_read {
            self.hub.cache.invalidate_agent(&ctx.tenant_id, &args.agent_id);
        }
        Ok(value)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
