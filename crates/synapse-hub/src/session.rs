// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Session lifecycle and tiered context assembly.
//!
//! # Handoff protocol
//!
//! ```text
//! agent A                      hub                         agent B
//!    │  end_session(summary)    │                             │
//!    ├─────────────────────────▶│ close session               │
//!    │                          │ write handoff (unconsumed)  │
//!    │                          │ notify Slack (best-effort)  │
//!    │                          │                             │
//!    │                          │      begin_session(project) │
//!    │                          │◀────────────────────────────┤
//!    │                          │ open session                │
//!    │                          │ consume handoff ── at most  │
//!    │                          │ once, conditional update    │
//!    │                          │ assemble context bundle     │
//!    │                          ├────────────────────────────▶│
//! ```
//!
//! # Tiers
//!
//! | Tier | Contents                                                  |
//! |------|-----------------------------------------------------------|
//! | HOT  | identity, unread messages, open session, pending handoff  |
//! | WARM | + learnings (recency × confidence), preferences, last summary |
//! | COLD | + project-relevant entities via hybrid search             |
//!
//! The bundle is deterministic: ordering is `createdAt` then `id`
//! everywhere, and no wall-clock value is embedded.  `tokenEstimate` is
//! the serialized byte length / 4 — coarse, but enough to budget.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use synapse_core::{
    BundleCold, BundleIdentity, BundleMeta, BundleWarm, ContextBundle, ContextDepth, Handoff,
    HubError, RequestContext, SearchMode,
};
use synapse_store::{search, MemoryStore, VectorStore};

use crate::notify::Notifier;

/// Unread messages included in the HOT tier.
const HOT_UNREAD_LIMIT: usize = 20;
/// Learnings included in the WARM tier.
const WARM_LEARNING_LIMIT: usize = 10;
/// Entities included in the COLD tier.
const COLD_ENTITY_LIMIT: usize = 20;

/// Learning hint accepted by `end_session`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningHint {
    pub context: String,
    pub lesson: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Result of `begin_session`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginSessionOutcome {
    pub session_id: String,
    /// The consumed handoff, present for exactly one concurrent caller.
    pub handoff: Option<Handoff>,
    pub context_bundle: ContextBundle,
}

/// Result of `end_session`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionOutcome {
    pub handoff_id: String,
    pub closed_session_id: Option<String>,
    pub recorded_learnings: usize,
}

pub struct SessionManager {
    store: Arc<MemoryStore>,
    vector: Option<Arc<dyn VectorStore>>,
    notifier: Arc<dyn Notifier>,
    /// When false, WARM and COLD tiers are clamped off
    /// (`ENABLE_ADVANCED_MEMORY`).
    advanced_memory: bool,
}

impl SessionManager {
    pub fn new(
        store: Arc<MemoryStore>,
        vector: Option<Arc<dyn VectorStore>>,
        notifier: Arc<dyn Notifier>,
        advanced_memory: bool,
    ) -> Self {
        Self { store, vector, notifier, advanced_memory }
    }

    /// Open (or reuse) a session, consume the pending handoff, and attach
    /// a context bundle.
    pub async fn begin_session(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        project_id: &str,
        depth: ContextDepth,
    ) -> Result<BeginSessionOutcome, HubError> {
        let session = self.store.open_session(ctx, agent_id, project_id).await?;
        let handoff = self.store.consume_handoff(ctx, project_id).await?;
        let context_bundle = self.context_bundle(ctx, agent_id, project_id, depth).await?;

        info!(
            tenant = %ctx.tenant_id,
            agent = %agent_id,
            project = %project_id,
            session = %session.id,
            handoff = handoff.is_some(),
            "session begun"
        );
        Ok(BeginSessionOutcome {
            session_id: session.id,
            handoff,
            context_bundle,
        })
    }

    /// Close the session, write the handoff, record learning hints, and
    /// fire the (best-effort) notification.
    pub async fn end_session(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        project_id: &str,
        summary: &str,
        open_items: &[String],
        learnings: &[LearningHint],
    ) -> Result<EndSessionOutcome, HubError> {
        let closed = self.store.close_session(ctx, agent_id, project_id).await?;
        let handoff = self
            .store
            .write_handoff(ctx, project_id, agent_id, summary, open_items)
            .await?;

        for hint in learnings {
            self.store
                .record_learning(ctx, agent_id, &hint.context, &hint.lesson, hint.confidence)
                .await?;
        }

        self.notifier
            .notify(&format!(
                "session ended — project {project_id}, agent {agent_id}: {summary}"
            ))
            .await;

        info!(
            tenant = %ctx.tenant_id,
            agent = %agent_id,
            project = %project_id,
            handoff = %handoff.id,
            "session ended"
        );
        Ok(EndSessionOutcome {
            handoff_id: handoff.id,
            closed_session_id: closed.map(|s| s.id),
            recorded_learnings: learnings.len(),
        })
    }

    /// Assemble the tiered bundle (`get_agent_context`).
    pub async fn context_bundle(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        project_id: &str,
        depth: ContextDepth,
    ) -> Result<ContextBundle, HubError> {
        let depth = if self.advanced_memory { depth } else { ContextDepth::Hot };

        // HOT tier.
        let agent = self.store.get_agent(ctx, agent_id).await?;
        let identity = BundleIdentity {
            agent_id: agent_id.to_string(),
            name: agent.as_ref().map(|a| a.name.clone()),
            capabilities: agent.map(|a| a.capabilities).unwrap_or_default(),
        };
        let unread_messages = self
            .store
            .unread_messages(ctx, agent_id, HOT_UNREAD_LIMIT)
            .await?;
        let open_session = self.store.find_open_session(ctx, agent_id, project_id).await?;
        let handoff = self.store.peek_handoff(ctx, project_id).await?;

        // WARM tier.
        let warm = if matches!(depth, ContextDepth::Warm | ContextDepth::Cold) {
            let memory = self
                .store
                .individual_memory(ctx, agent_id, WARM_LEARNING_LIMIT)
                .await?;
            let last_session_summary = self.store.last_handoff_summary(ctx, project_id).await?;
            Some(BundleWarm {
                learnings: memory.learnings,
                preferences: memory.preferences,
                last_session_summary,
            })
        } else {
            None
        };

        // COLD tier.
        let cold = if matches!(depth, ContextDepth::Cold) {
            let found = search::search_entities(
                &self.store,
                self.vector.as_deref(),
                ctx,
                project_id,
                SearchMode::Hybrid,
                COLD_ENTITY_LIMIT,
            )
            .await?;
            Some(BundleCold { entities: found.results })
        } else {
            None
        };

        let mut bundle = ContextBundle {
            identity,
            unread_messages,
            open_session,
            handoff,
            warm,
            cold,
            meta: BundleMeta {
                depth,
                token_estimate: 0,
                project_id: project_id.to_string(),
            },
        };
        bundle.meta.token_estimate = token_estimate(&bundle)?;
        Ok(bundle)
    }
}

/// Byte-length/4 heuristic over the serialized bundle (with the estimate
/// field zeroed, so the value is stable).
fn token_estimate(bundle: &ContextBundle) -> Result<u64, HubError> {
    let bytes = serde_json::to_vec(bundle).map_err(HubError::storage)?;
    Ok(bytes.len() as u64 / 4)
}

// ── Unit tests ────────────────────────────────────────────────────────────────
