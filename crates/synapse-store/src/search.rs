// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Entity search across the four modes.
//!
//! | Mode       | Path                                                   |
//! |------------|--------------------------------------------------------|
//! | `exact`    | SQL substring match on names + observation content     |
//! | `semantic` | vector sidecar, intersected with tenant rows; absent   |
//! |            | sidecar → empty set, `mode_used = "none"`              |
//! | `graph`    | exact seeds, then outgoing relations to depth 2        |
//! | `hybrid`   | exact ∪ semantic, re-ranked by exact boost + score     |
//!
//! The tenant filter lives in SQL for every path.  Semantic results only
//! contribute ids; [`MemoryStore::entities_by_ids`] drops any id that does
//! not exist in the caller's tenant before a byte is returned.

use std::collections::{HashMap, HashSet};

use synapse_core::{HubError, ModeUsed, RequestContext, SearchHit, SearchMode, SearchResults};

use crate::store::MemoryStore;
use crate::vector::VectorStore;

/// Graph-mode traversal depth.
const GRAPH_DEPTH: usize = 2;

/// Score boost an exact hit receives over a purely-semantic one in
/// hybrid re-ranking.
const EXACT_BOOST: f64 = 1.0;

pub async fn search_entities(
    store: &MemoryStore,
    vector: Option<&dyn VectorStore>,
    ctx: &RequestContext,
    query: &str,
    mode: SearchMode,
    limit: usize,
) -> Result<SearchResults, HubError> {
    let limit = limit.clamp(1, 200);
    match mode {
        SearchMode::Exact => {
            let results = store.exact_search(ctx, query, limit).await?;
            Ok(SearchResults { results, mode_used: ModeUsed::Exact })
        }
        SearchMode::Semantic => semantic_search(store, vector, ctx, query, limit).await,
        SearchMode::Graph => graph_search(store, ctx, query, limit).await,
        SearchMode::Hybrid => hybrid_search(store, vector, ctx, query, limit).await,
    }
}

/// Semantic: advisory sidecar ids intersected with tenant rows.  No
/// sidecar, or a sidecar failure, degrades to the empty set tagged
/// `mode_used = "none"` — never an error.
async fn semantic_search(
    store: &MemoryStore,
    vector: Option<&dyn VectorStore>,
    ctx: &RequestContext,
    query: &str,
    limit: usize,
) -> Result<SearchResults, HubError> {
    let Some(vector) = vector else {
        return Ok(SearchResults::empty(ModeUsed::None));
    };
    let matches = match vector.query_similar(&ctx.tenant_id, query, limit).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(tenant = %ctx.tenant_id, "semantic search degraded: {e}");
            return Ok(SearchResults::empty(ModeUsed::None));
        }
    };

    let ids: Vec<String> = matches.iter().map(|m| m.entity_id.clone()).collect();
    let entities = store.entities_by_ids(ctx, &ids).await?;
    let by_id: HashMap<&str, _> = entities.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut results = Vec::new();
    for m in &matches {
        if let Some(entity) = by_id.get(m.entity_id.as_str()) {
            results.push(SearchHit {
                entity: (*entity).clone(),
                score: m.score,
                matched: m.snippet.clone().into_iter().collect(),
            });
        }
    }
    results.truncate(limit);
    Ok(SearchResults { results, mode_used: ModeUsed::Semantic })
}

/// Graph: exact seed matches, then iterative breadth-first expansion over
/// outgoing relations with a visited set, depth-bounded.  The visited set
/// is what keeps cyclic graphs from looping.
async fn graph_search(
    store: &MemoryStore,
    ctx: &RequestContext,
    query: &str,
    limit: usize,
) -> Result<SearchResults, HubError> {
    let seeds = store.exact_search(ctx, query, limit).await?;

    let mut visited: HashSet<String> = seeds.iter().map(|h| h.entity.id.clone()).collect();
    let mut results = seeds;
    let mut frontier: Vec<String> = results.iter().map(|h| h.entity.id.clone()).collect();

    for depth in 1..=GRAPH_DEPTH {
        if frontier.is_empty() || results.len() >= limit {
            break;
        }
        let relations = store.outgoing_relations(ctx, &frontier).await?;
        let next_ids: Vec<String> = relations
            .iter()
            .map(|r| r.to_entity_id.clone())
            .filter(|id| visited.insert(id.clone()))
            .collect();

        // Each hop away from a seed halves the score.
        let hop_score = 1.0 / (1 << depth) as f64;
        for entity in store.entities_by_ids(ctx, &next_ids).await? {
            if results.len() >= limit {
                break;
            }
            results.push(SearchHit { entity, score: hop_score, matched: Vec::new() });
        }
        frontier = next_ids;
    }

    results.truncate(limit);
    Ok(SearchResults { results, mode_used: ModeUsed::Graph })
}

/// Hybrid: union of exact and semantic, re-ranked by exact boost + vector
/// score.  Without a sidecar this is exact search under another name, and
/// the result says so.
async fn hybrid_search(
    store: &MemoryStore,
    vector: Option<&dyn VectorStore>,
    ctx: &RequestContext,
    query: &str,
    limit: usize,
) -> Result<SearchResults, HubError> {
    let exact = store.exact_search(ctx, query, limit).await?;
    let semantic = semantic_search(store, vector, ctx, query, limit).await?;

    if semantic.mode_used == ModeUsed::None {
        return Ok(SearchResults { results: exact, mode_used: ModeUsed::Exact });
    }

    let mut merged: HashMap<String, SearchHit> = HashMap::new();
    for hit in exact {
        merged.insert(
            hit.entity.id.clone(),
            SearchHit { score: EXACT_BOOST, ..hit },
        );
    }
    for hit in semantic.results {
        match merged.get_mut(&hit.entity.id) {
            Some(existing) => {
                existing.score += hit.score;
                if existing.matched.is_empty() {
                    existing.matched = hit.matched;
                }
            }
            None => {
                merged.insert(hit.entity.id.clone(), hit);
            }
        }
    }

    let mut results: Vec<SearchHit> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity.id.cmp(&b.entity.id))
    });
    results.truncate(limit);
    Ok(SearchResults { results, mode_used: ModeUsed::Hybrid })
}

// ── Unit tests ────────────────────────────────────────────────────────────────
