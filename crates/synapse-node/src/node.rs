// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Hub startup — assembles all subsystems and starts them.
//!
//! # Startup sequence
//!
//! [`run`] performs these steps in order:
//!
//! 1. Open (or create) the SQLite store and apply the schema.
//! 2. Provision the default tenant so the bootstrap key resolves.
//! 3. Construct the optional vector sidecar driver (`VECTOR_STORE_URL`).
//! 4. Construct the Slack notifier (`SLACK_WEBHOOK_URL`) or the null sink.
//! 5. Build the [`Hub`] (store, cache, registry, router, sessions).
//! 6. Build the tool registry and the tenant resolver.
//! 7. Spawn the maintenance sweeps (stale agents, handoff retention).
//! 8. Bind the two HTTP listeners (blocks until shutdown).

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use synapse_hub::{Hub, HubOptions, Notifier, NullNotifier, SlackNotifier};
use synapse_store::{HttpVectorStore, MemoryStore, VectorStore};
use synapse_tools::default_registry;

use crate::auth::TenantResolver;
use crate::config::HubConfig;
use crate::http::{self, AppState};

/// How often the stale-agent sweep runs.
const AGENT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// How often the handoff retention purge runs.
const HANDOFF_PURGE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Start the hub.  This is the single entry point for `synapse serve`.
pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    // ── Primary store ─────────────────────────────────────────────────────────
    let store = if config.storage.db_path.as_os_str() == ":memory:" {
        Arc::new(MemoryStore::open_in_memory()?)
    } else {
        if let Some(parent) = config.storage.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        Arc::new(MemoryStore::open(&config.storage.db_path)?)
    };
    store.ensure_tenant(&config.auth.default_tenant).await?;
    info!(db = %config.storage.db_path.display(), "primary store ready");

    // ── Vector sidecar (optional) ─────────────────────────────────────────────
    let vector: Option<Arc<dyn VectorStore>> = match &config.storage.vector_store_url {
        Some(url) => {
            info!(url = %url, "vector sidecar configured");
            Some(Arc::new(HttpVectorStore::new(url.clone())))
        }
        None => {
            info!("no vector sidecar — semantic search disabled");
            None
        }
    };

    // ── Notifier ──────────────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match &config.slack.webhook_url {
        Some(url) => {
            info!("Slack notifications enabled");
            Arc::new(SlackNotifier::new(url.clone()))
        }
        None => Arc::new(NullNotifier),
    };

    // ── Hub assembly ──────────────────────────────────────────────────────────
    let hub = Hub::new(
        store.clone(),
        vector,
        notifier,
        HubOptions {
            advanced_memory: config.storage.enable_advanced_memory,
            cache_ttl: Duration::from_secs(config.storage.cache_ttl_secs),
            ..HubOptions::default()
        },
    );
    let tools = Arc::new(default_registry(hub.clone()));
    let resolver = Arc::new(TenantResolver::new(
        store.clone(),
        config.auth.api_key.as_deref(),
        &config.auth.default_tenant,
        config.auth.jwt_secret.as_deref(),
        config.http.rate_limit_rps,
        config.http.rate_limit_burst,
    ));

    if config.auth.api_key.is_none() && config.auth.jwt_secret.is_none() {
        warn!(
            "no API_KEY or JWT_SECRET configured — only keys minted with \
             `synapse mint-key` will authenticate"
        );
    }

    // ── Maintenance sweeps ────────────────────────────────────────────────────
    let offline_ttl = config.storage.agent_offline_ttl_secs;
    let sweep_store = store.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(AGENT_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let cutoff = Utc::now() - chrono::Duration::seconds(offline_ttl as i64);
            match sweep_store.sweep_stale_agents(cutoff).await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "stale agents marked offline"),
                Err(e) => warn!("stale-agent sweep failed: {e}"),
            }
        }
    });

    let retention_days = config.storage.handoff_retention_days;
    let purge_store = store.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HANDOFF_PURGE_INTERVAL);
        loop {
            tick.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
            match purge_store.purge_handoffs(cutoff).await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "expired handoffs purged"),
                Err(e) => warn!("handoff purge failed: {e}"),
            }
        }
    });

    // ── HTTP servers (block until shutdown) ───────────────────────────────────
    let state = AppState {
        hub,
        tools,
        resolver,
        started_at: Instant::now(),
    };
    http::serve(state, &config.http).await
}
