// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Message routing — resolves the recipient set and fans out.
//!
//! Exactly one of three resolution paths is taken, evaluated in order:
//!
//! 1. `broadcast` (or `to = "*"`) — every registered agent in the tenant,
//!    minus the sender when `excludeSelf` (the default).
//! 2. `toCapabilities` — agents whose declared capabilities are a
//!    **superset** of the requested list.  AND semantics: asking for
//!    `["x","y"]` matches `{x,y}` and `{x,y,z}`, never `{x}` or `{y}`.
//! 3. `to` — the single named agent.  The recipient does not have to be
//!    registered; an inbox is just a recipient id.
//!
//! The fan-out writes every row in one transaction (the store does this),
//! then pushes to live WebSocket connections **outside** the transaction.
//! A push failure never unwinds the write: the database is the source of
//! truth, notifications are best-effort.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use synapse_core::{HubError, MessagePriority, RequestContext, SendOutcome};
use synapse_store::MemoryStore;

use crate::registry::AgentRegistry;

fn default_true() -> bool {
    true
}

fn default_type() -> String {
    "info".to_string()
}

/// Wire input for `send_ai_message` (and `POST /ai-message`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub to_capabilities: Vec<String>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default = "default_true")]
    pub exclude_self: bool,
    pub content: String,
    #[serde(default = "default_type", rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub priority: MessagePriority,
}

pub struct Router {
    store: Arc<MemoryStore>,
    registry: Arc<AgentRegistry>,
    cache: Arc<synapse_store::TtlCache>,
}

impl Router {
    pub fn new(
        store: Arc<MemoryStore>,
        registry: Arc<AgentRegistry>,
        cache: Arc<synapse_store::TtlCache>,
    ) -> Self {
        Self { store, registry, cache }
    }

    /// Resolve recipients, write one message per recipient, notify.
    pub async fn send(
        &self,
        ctx: &RequestContext,
        req: &SendRequest,
    ) -> Result<SendOutcome, HubError> {
        if req.content.is_empty() {
            return Err(HubError::invalid_arg("content", "must be non-empty"));
        }

        let from = req
            .from
            .clone()
            .or_else(|| ctx.agent_id.clone())
            .unwrap_or_else(|| "anonymous".to_string());

        let recipients = self.resolve_recipients(ctx, req, &from).await?;
        if recipients.is_empty() {
            return Err(HubError::NoRecipient);
        }

        let outcome = self
            .store
            .insert_messages(ctx, &from, &recipients, &req.content, &req.message_type, req.priority)
            .await?;

        // Store-first, notify-best-effort: pushes happen after commit and
        // their failure is invisible to the sender.
        for (to, id) in outcome.recipients.iter().zip(outcome.message_ids.iter()) {
            self.cache.invalidate_agent(&ctx.tenant_id, to);
            let delivered = self.registry.push_to(
                &ctx.tenant_id,
                to,
                json!({
                    "kind": "message",
                    "messageId": id,
                    "from": from,
                    "to": to,
                    "type": req.message_type,
                    "priority": req.priority,
                }),
            );
            debug!(
                tenant = %ctx.tenant_id,
                to = %to,
                delivered,
                "message routed"
            );
        }

        Ok(outcome)
    }

    /// The three resolution paths, in spec order.
    async fn resolve_recipients(
        &self,
        ctx: &RequestContext,
        req: &SendRequest,
        from: &str,
    ) -> Result<Vec<String>, HubError> {
        if req.broadcast || req.to.as_deref() == Some("*") {
            let mut out: Vec<String> = self
                .store
                .list_agents(ctx)
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect();
            if req.exclude_self {
                out.retain(|id| id != from);
            }
            return Ok(out);
        }

        if !req.to_capabilities.is_empty() {
            let wanted: HashSet<&str> = req.to_capabilities.iter().map(String::as_str).collect();
            let mut out: Vec<String> = self
                .store
                .list_agents(ctx)
                .await?
                .into_iter()
                .filter(|a| {
                    let have: HashSet<&str> = a.capabilities.iter().map(String::as_str).collect();
                    wanted.is_subset(&have)
                })
                .map(|a| a.id)
                .collect();
            if req.exclude_self {
                out.retain(|id| id != from);
            }
            return Ok(out);
        }

        if let Some(to) = &req.to {
            return Ok(vec![to.clone()]);
        }

        Ok(Vec::new())
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
