// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Resolved request identity.
//!
//! A [`RequestContext`] is the **only** source of tenant identity in the
//! whole system.  Tool arguments may contain fields named `tenantId`,
//! `userId` or `projectId` — those are data, never identity.  A handler
//! that consulted `args.tenantId` for authorization would reintroduce the
//! cross-tenant leak this design exists to prevent, so none do.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant used for unauthenticated public paths (`/health`, `/ready`).
/// Carries no tool scope; no tool call ever runs under it.
pub const PUBLIC_TENANT: &str = "_public";

/// Identity of an inbound request after credential resolution.
///
/// Produced by the tenant resolver; consumed by every store / hub
/// operation.  Cloning is cheap enough (a handful of small strings) that
/// handlers may clone freely when spawning background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// The organizational isolation scope every row belongs to.
    pub tenant_id: String,
    /// Present only for JWT-authenticated principals (`sub` claim).
    pub user_id: Option<String>,
    /// Present only for API-key-authenticated principals.
    pub api_key_id: Option<String>,
    /// The calling agent, when the client identified itself (header
    /// `X-Agent-Id` or the `from` field of a tool call).  Used for
    /// `lastSeen` touches and `markAsRead` ownership checks.
    pub agent_id: Option<String>,
    /// Scope list from the API key.  Empty means full access.
    pub scopes: Vec<String>,
    /// Correlation id echoed into every log line for this request.
    pub correlation_id: String,
}

impl RequestContext {
    /// Context for an authenticated principal.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            api_key_id: None,
            agent_id: None,
            scopes: Vec::new(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Context for the public, unauthenticated paths.  No tool scope.
    pub fn public() -> Self {
        let mut ctx = Self::new(PUBLIC_TENANT);
        ctx.scopes = vec!["none".to_string()];
        ctx
    }

    pub fn is_public(&self) -> bool {
        self.tenant_id == PUBLIC_TENANT
    }

    /// Whether this principal may invoke tools in `group`.
    pub fn allows(&self, group: ToolGroup) -> bool {
        !self.is_public() && scope_allows(&self.scopes, group)
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// Coarse authorization group a tool belongs to.
///
/// API-key scopes name groups, not individual tools — the tool set grows
/// faster than anyone wants to re-mint keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolGroup {
    Graph,
    Messaging,
    Agents,
    Memory,
    Sessions,
    Util,
}

impl ToolGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolGroup::Graph => "graph",
            ToolGroup::Messaging => "messaging",
            ToolGroup::Agents => "agents",
            ToolGroup::Memory => "memory",
            ToolGroup::Sessions => "sessions",
            ToolGroup::Util => "util",
        }
    }
}

/// Scope check: an empty list grants everything (the common single-tenant
/// deployment mints keys with no scopes).  Otherwise the list must contain
/// `"*"` or the group name.
pub fn scope_allows(scopes: &[String], group: ToolGroup) -> bool {
    if scopes.is_empty() {
        return true;
    }
    scopes
        .iter()
        .any(|s| s == "*" || s == group.as_str())
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scopes_allow_everything() {
        assert!(scope_allows(&[], ToolGroup::Graph));
        assert!(scope_allows(&[], ToolGroup::Sessions));
    }

    #[test]
    fn wildcard_scope_allows_everything() {
        let scopes = vec!["*".to_string()];
        assert!(scope_allows(&scopes, ToolGroup::Messaging));
    }

    #[test]
    fn named_scope_allows_only_its_group() {
        let scopes = vec!["graph".to_string()];
        assert!(scope_allows(&scopes, ToolGroup::Graph));
        assert!(!scope_allows(&scopes, ToolGroup::Messaging));
    }

    #[test]
    fn public_context_has_no_tool_scope() {
        let ctx = RequestContext::public();
        assert!(ctx.is_public());
        assert!(!ctx.allows(ToolGroup::Graph));
        assert!(!ctx.allows(ToolGroup::Util));
    }

    #[test]
    fn authenticated_context_with_empty_scopes_allows() {
        let ctx = RequestContext::new("t1");
        assert!(ctx.allows(ToolGroup::Sessions));
    }

    #[test]
    fn correlation_ids_are_unique_per_context() {
        let a = RequestContext::new("t1");
        let b = RequestContext::new("t1");
        assert_ne!(a.correlation_id, b.correlation_id);
    }
}
