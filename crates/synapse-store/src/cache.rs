// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tenant+agent-scoped TTL cache.
//!
//! Every key is the composite `{tenantId}:{agentId}:{kind}` — an earlier
//! build of this system cached per-agent without the tenant prefix and
//! leaked inbox previews across tenants.  The composite key is the fix:
//! evicting a tenant prefix is always safe, and a key can never collide
//! across tenants.
//!
//! Reads are advisory.  A miss (absent or expired) falls through to the
//! store; writers invalidate on every mutation of the underlying data.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

pub struct TtlCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    /// Build the composite key.  Callers never concatenate by hand.
    pub fn key(tenant_id: &str, agent_id: &str, kind: &str) -> String {
        format!("{tenant_id}:{agent_id}:{kind}")
    }

    pub fn get(&self, tenant_id: &str, agent_id: &str, kind: &str) -> Option<Value> {
        let key = Self::key(tenant_id, agent_id, kind);
        let entry = self.entries.get(&key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, tenant_id: &str, agent_id: &str, kind: &str, value: Value) {
        self.entries.insert(
            Self::key(tenant_id, agent_id, kind),
            CacheEntry { value, expires_at: Instant::now() + self.ttl },
        );
    }

    /// Drop every entry for one agent in one tenant.
    pub fn invalidate_agent(&self, tenant_id: &str, agent_id: &str) {
        let prefix = format!("{tenant_id}:{agent_id}:");
        self.entries.retain(|k, _| !k.starts_with(&prefix));
    }

    /// Drop every entry for a tenant.  Always safe — no other tenant's
    /// keys share the prefix.
    pub fn invalidate_tenant(&self, tenant_id: &str) {
        let prefix = format!("{tenant_id}:");
        self.entries.retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
