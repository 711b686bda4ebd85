// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Hub assembly — the one object that owns every stateful subsystem.
//!
//! There is no ambient global state anywhere in this workspace.  [`Hub`]
//! is constructed once at startup, owns the store, cache, vector sidecar,
//! agent registry, router, and session manager, and is handed to tool
//! handlers explicitly (behind an `Arc`).  Handlers are safe to run in
//! parallel across distinct request contexts; the subsystems do their own
//! locking.

pub mod notify;
pub mod registry;
pub mod router;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

pub use notify::{Notifier, NullNotifier, SlackNotifier};
pub use registry::{AgentRegistry, Connection, NOTIFY_QUEUE_CAP};
pub use router::{Router, SendRequest};
pub use session::{BeginSessionOutcome, EndSessionOutcome, LearningHint, SessionManager};

use synapse_core::{
    EntitySpec, HubError, Observation, RequestContext, SearchMode, SearchResults, UpsertOutcome,
};
use synapse_store::{search, vector, MemoryStore, TtlCache, VectorStore};

/// Construction knobs with production-safe defaults.
#[derive(Clone)]
pub struct HubOptions {
    /// Gates the WARM/COLD context tiers (`ENABLE_ADVANCED_MEMORY`).
    pub advanced_memory: bool,
    /// Cache entry lifetime.
    pub cache_ttl: Duration,
    /// Per-connection WebSocket notification queue capacity.
    pub notify_queue_cap: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            advanced_memory: true,
            cache_ttl: Duration::from_secs(30),
            notify_queue_cap: NOTIFY_QUEUE_CAP,
        }
    }
}

/// Top-level owner of all hub subsystems.
pub struct Hub {
    pub store: Arc<MemoryStore>,
    pub vector: Option<Arc<dyn VectorStore>>,
    pub cache: Arc<TtlCache>,
    pub registry: Arc<AgentRegistry>,
    pub router: Router,
    pub sessions: SessionManager,
}

impl Hub {
    pub fn new(
        store: Arc<MemoryStore>,
        vector: Option<Arc<dyn VectorStore>>,
        notifier: Arc<dyn Notifier>,
        opts: HubOptions,
    ) -> Arc<Self> {
        let cache = Arc::new(TtlCache::new(opts.cache_ttl));
        let registry = Arc::new(AgentRegistry::new(opts.notify_queue_cap));
        let router = Router::new(store.clone(), registry.clone(), cache.clone());
        let sessions = SessionManager::new(
            store.clone(),
            vector.clone(),
            notifier,
            opts.advanced_memory,
        );
        Arc::new(Self {
            store,
            vector,
            cache,
            registry,
            router,
            sessions,
        })
    }

    /// Entity upsert with the write-path side effects in order: store
    /// (authoritative, transactional), vector indexing (best-effort),
    /// cache invalidation.
    pub async fn create_entities(
        &self,
        ctx: &RequestContext,
        specs: &[EntitySpec],
    ) -> Result<UpsertOutcome, HubError> {
        let (outcome, new_obs) = self.store.upsert_entities(ctx, specs).await?;
        self.index_observations(ctx, &new_obs).await;
        self.cache.invalidate_tenant(&ctx.tenant_id);
        Ok(outcome)
    }

    /// Observation append with the same side-effect ordering.
    pub async fn add_observations(
        &self,
        ctx: &RequestContext,
        entity_name: &str,
        contents: &[String],
    ) -> Result<Vec<Observation>, HubError> {
        let obs = self.store.add_observations(ctx, entity_name, contents).await?;
        self.index_observations(ctx, &obs).await;
        self.cache.invalidate_tenant(&ctx.tenant_id);
        Ok(obs)
    }

    /// Search across the four modes; the vector sidecar may be absent.
    pub async fn search(
        &self,
        ctx: &RequestContext,
        query: &str,
        mode: SearchMode,
        limit: usize,
    ) -> Result<SearchResults, HubError> {
        search::search_entities(&self.store, self.vector.as_deref(), ctx, query, mode, limit).await
    }

    async fn index_observations(&self, ctx: &RequestContext, observations: &[Observation]) {
        for obs in observations {
            vector::upsert_best_effort(
                self.vector.as_deref(),
                &ctx.tenant_id,
                &obs.entity_id,
                &obs.id,
                &obs.content,
            )
            .await;
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_store::StaticVectorStore;

    fn ctx(tenant: &str) -> RequestContext {
        RequestContext::new(tenant)
    }

    fn hub_with_vector() -> (Arc<Hub>, Arc<StaticVectorStore>) {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let vector = Arc::new(StaticVectorStore::new());
        let hub = Hub::new(
            store,
            Some(vector.clone()),
            Arc::new(NullNotifier),
            HubOptions::default(),
        );
        (hub, vector)
    }

    #[tokio::test]
    async fn create_entities_indexes_observations_best_effort() {
        let (hub, vector) = hub_with_vector();
        let t1 = ctx("t1");
        hub.create_entities(
            &t1,
            &[EntitySpec {
                name: "svc".into(),
                entity_type: "service".into(),
                observations: vec!["obs-1".into(), "obs-2".into()],
            }],
        )
        .await
        .unwrap();
        assert_eq!(vector.upsert_count("t1"), 2);
    }

    #[tokio::test]
    async fn add_observations_invalidates_tenant_cache() {
        let (hub, _) = hub_with_vector();
        let t1 = ctx("t1");
        hub.create_entities(
            &t1,
            &[EntitySpec { name: "svc".into(), entity_type: "s".into(), observations: vec![] }],
        )
        .await
        .unwrap();

        hub.cache.put("t1", "a1", "bundle", serde_json::json!({"stale": true}));
        hub.add_observations(&t1, "svc", &["new fact".into()]).await.unwrap();
        assert!(hub.cache.get("t1", "a1", "bundle").is_none());
    }

    #[tokio::test]
    async fn hub_without_vector_still_creates_entities() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let hub = Hub::new(store, None, Arc::new(NullNotifier), HubOptions::default());
        let t1 = ctx("t1");
        let out = hub
            .create_entities(
                &t1,
                &[EntitySpec { name: "a".into(), entity_type: "t".into(), observations: vec!["x".into()] }],
            )
            .await
            .unwrap();
        assert_eq!(out.created_ids.len(), 1);
    }
}
