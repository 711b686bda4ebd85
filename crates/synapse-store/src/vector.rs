// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The optional vector sidecar, consumed through a narrow capability.
//!
//! The sidecar is **advisory**: it proposes entity ids with similarity
//! scores, and the caller intersects those ids with tenant-scoped SQL rows
//! before returning anything.  It is never the authority on what exists —
//! a stale or even hostile sidecar can at worst reorder results within the
//! caller's own tenant.
//!
//! Absence is a first-class state.  The whole subsystem is
//! `Option<Arc<dyn VectorStore>>`; when `VECTOR_STORE_URL` is unset,
//! semantic search returns an empty set tagged `mode_used = "none"` and
//! hybrid search degrades to exact.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use synapse_core::HubError;

/// One similarity match proposed by the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMatch {
    pub entity_id: String,
    /// Cosine similarity in [0, 1], higher is closer.
    pub score: f64,
    /// The matched observation text, when the sidecar returns payloads.
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Narrow capability over the per-tenant semantic index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Index one observation.  Metadata carries `{tenantId, entityId}` so
    /// queries can filter server-side as well.
    async fn upsert(
        &self,
        tenant_id: &str,
        entity_id: &str,
        observation_id: &str,
        content: &str,
    ) -> Result<(), HubError>;

    /// Nearest observations for `query` within the tenant.
    async fn query_similar(
        &self,
        tenant_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<VectorMatch>, HubError>;
}

// ── HTTP driver ───────────────────────────────────────────────────────────────

/// REST driver for an external vector service.
///
/// Wire contract (JSON):
/// * `POST {base}/vectors`  — `{tenantId, entityId, observationId, content}`
/// * `POST {base}/query`    — `{tenantId, query, limit}` →
///   `{matches: [{entityId, score, snippet?}]}`
pub struct HttpVectorStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpVectorStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpsertBody<'a> {
    tenant_id: &'a str,
    entity_id: &'a str,
    observation_id: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    tenant_id: &'a str,
    query: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn upsert(
        &self,
        tenant_id: &str,
        entity_id: &str,
        observation_id: &str,
        content: &str,
    ) -> Result<(), HubError> {
        let resp = self
            .client
            .post(format!("{}/vectors", self.base_url))
            .json(&UpsertBody { tenant_id, entity_id, observation_id, content })
            .send()
            .await
            .map_err(|e| HubError::Degraded(format!("vector upsert failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(HubError::Degraded(format!(
                "vector upsert returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn query_similar(
        &self,
        tenant_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<VectorMatch>, HubError> {
        let resp = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&QueryBody { tenant_id, query, limit })
            .send()
            .await
            .map_err(|e| HubError::Degraded(format!("vector query failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(HubError::Degraded(format!(
                "vector query returned {}",
                resp.status()
            )));
        }
        let body: QueryResponse = resp
            .json()
            .await
            .map_err(|e| HubError::Degraded(format!("vector response malformed: {e}")))?;
        Ok(body.matches)
    }
}

// ── Static driver (tests, demos) ──────────────────────────────────────────────

/// In-process stand-in that serves pre-seeded matches per tenant.
///
/// Upserts are accepted and remembered (so tests can assert indexing
/// happened) but do not affect query results — the point of this driver is
/// deterministic ranking, not actual similarity.
#[derive(Default)]
pub struct StaticVectorStore {
    matches: dashmap::DashMap<String, Vec<VectorMatch>>,
    upserts: dashmap::DashMap<String, usize>,
}

impl StaticVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the matches returned for every query in `tenant_id`.
    pub fn seed(&self, tenant_id: &str, matches: Vec<VectorMatch>) {
        self.matches.insert(tenant_id.to_string(), matches);
    }

    /// Observations indexed for a tenant so far.
    pub fn upsert_count(&self, tenant_id: &str) -> usize {
        self.upserts.get(tenant_id).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for StaticVectorStore {
    async fn upsert(
        &self,
        tenant_id: &str,
        _entity_id: &str,
        _observation_id: &str,
        _content: &str,
    ) -> Result<(), HubError> {
        *self.upserts.entry(tenant_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn query_similar(
        &self,
        tenant_id: &str,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<VectorMatch>, HubError> {
        let mut out = self
            .matches
            .get(tenant_id)
            .map(|m| m.value().clone())
            .unwrap_or_default();
        out.truncate(limit);
        Ok(out)
    }
}

/// Log-and-drop wrapper used by write paths: vector indexing is
/// best-effort and must never fail a request.
pub async fn upsert_best_effort(
    vector: Option<&dyn VectorStore>,
    tenant_id: &str,
    entity_id: &str,
    observation_id: &str,
    content: &str,
) {
    let Some(v) = vector else { return };
    if let Err(e) = v.upsert(tenant_id, entity_id, observation_id, content).await {
        warn!(tenant = %tenant_id, "vector indexing skipped: {e}");
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
