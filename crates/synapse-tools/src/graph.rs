// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Knowledge-graph tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use synapse_core::{EntitySpec, HubError, RelationSpec, RequestContext, SearchMode, ToolGroup};
use synapse_hub::Hub;

use crate::{parse_args, to_value, Tool};

// ── create_entities ───────────────────────────────────────────────────────────

pub struct CreateEntitiesTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
struct CreateEntitiesArgs {
    entities: Vec<EntitySpec>,
}

#[async_trait]
impl Tool for CreateEntitiesTool {
    fn name(&self) -> &str {
        "create_entities"
    }
    fn description(&self) -> &str {
        "Create knowledge-graph entities. Idempotent on (type, name): \
         an existing entity is returned, not duplicated. Inline \
         observations are appended either way."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "type": { "type": "string" },
                            "observations": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["name", "type"]
                    }
                }
            },
            "required": ["entities"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Graph
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: CreateEntitiesArgs = parse_args(args)?;
        let outcome = self.hub.create_entities(ctx, &args.entities).await?;
        to_value(&outcome)
    }
}

// ── add_observations ──────────────────────────────────────────────────────────

pub struct AddObservationsTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddObservationsArgs {
    entity_name: String,
    observations: Vec<String>,
}

#[async_trait]
impl Tool for AddObservationsTool {
    fn name(&self) -> &str {
        "add_observations"
    }
    fn description(&self) -> &str {
        "Append observations to a named entity. Fails with NotFound when \
         the entity name is absent in this tenant."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entityName": { "type": "string" },
                "observations": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["entityName", "observations"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Graph
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: AddObservationsArgs = parse_args(args)?;
        let obs = self
            .hub
            .add_observations(ctx, &args.entity_name, &args.observations)
            .await?;
        Ok(json!({
            "entityName": args.entity_name,
            "added": obs.len(),
            "observationIds": obs.iter().map(|o| o.id.clone()).collect::<Vec<_>>(),
        }))
    }
}

// ── create_relations ──────────────────────────────────────────────────────────

pub struct CreateRelationsTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
struct CreateRelationsArgs {
    relations: Vec<RelationSpec>,
}

#[async_trait]
impl Tool for CreateRelationsTool {
    fn name(&self) -> &str {
        "create_relations"
    }
    fn description(&self) -> &str {
        "Create directed typed edges between named entities. Idempotent \
         on (from, to, type)."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "relations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "from": { "type": "string" },
                            "to": { "type": "string" },
                            "relationType": { "type": "string" }
                        },
                        "required": ["from", "to", "relationType"]
                    }
                }
            },
            "required": ["relations"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Graph
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: CreateRelationsArgs = parse_args(args)?;
        let outcome = self.hub.store.create_relations(ctx, &args.relations).await?;
        to_value(&outcome)
    }
}

// ── read_graph ────────────────────────────────────────────────────────────────

pub struct ReadGraphTool {
    pub hub: Arc<Hub>,
}

#[async_trait]
impl Tool for ReadGraphTool {
    fn name(&self) -> &str {
        "read_graph"
    }
    fn description(&self) -> &str {
        "Read this tenant's full knowledge graph: entities, relations, and counts."
    }
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Graph
    }
    async fn call(&self, ctx: &RequestContext, _args: Value) -> Result<Value, HubError> {
        let graph = self.hub.store.read_graph(ctx).await?;
        to_value(&graph)
    }
}

// ── search_entities ───────────────────────────────────────────────────────────

pub struct SearchEntitiesTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    mode: SearchMode,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[async_trait]
impl Tool for SearchEntitiesTool {
    fn name(&self) -> &str {
        "search_entities"
    }
    fn description(&self) -> &str {
        "Search entities. Modes: exact (substring), semantic (vector \
         sidecar, degrades to none), graph (follow relations, depth 2), \
         hybrid (exact + semantic re-ranked, the default)."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "mode": { "type": "string", "enum": ["exact", "semantic", "graph", "hybrid"] },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Graph
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: SearchArgs = parse_args(args)?;
        let results = self.hub.search(ctx, &args.query, args.mode, args.limit).await?;
        to_value(&results)
    }
}

// ── search_nodes (deprecated alias) ───────────────────────────────────────────

pub struct SearchNodesTool {
    pub hub: Arc<Hub>,
}

#[derive(Deserialize)]
struct SearchNodesArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[async_trait]
impl Tool for SearchNodesTool {
    fn name(&self) -> &str {
        "search_nodes"
    }
    fn description(&self) -> &str {
        "Deprecated alias for search_entities with mode=graph. Kept for \
         older bridge clients; behavior is identical."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Graph
    }
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: SearchNodesArgs = parse_args(args)?;
        let results = self
            .hub
            .search(ctx, &args.query, SearchMode::Graph, args.limit)
            .await?;
        to_value(&results)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
