// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Persisted data model and wire types.
//!
//! Everything here serializes in camelCase — that is the MCP wire
//! convention the IDE bridges already speak.  The `tenant_id` column is a
//! storage-layer concern and deliberately absent from these types: a
//! record that has been loaded already passed the tenant filter, and
//! echoing the tenant back to clients invites someone to trust it.
//!
//! Ordering rule used everywhere a list is returned: `createdAt`
//! ascending, ties broken by `id`.  That makes every read deterministic
//! for a given database state, which the context bundle relies on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Knowledge graph ───────────────────────────────────────────────────────────

/// Human-meaningful node in the tenant's knowledge graph.
///
/// `(type, name)` is unique within a tenant; creating a duplicate is an
/// idempotent upsert that returns the existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only textual fact about an entity.  Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: String,
    pub entity_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Directed typed edge.  `(from, to, type)` is unique within a tenant and
/// both endpoints always belong to the same tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: String,
    pub from_entity_id: String,
    pub to_entity_id: String,
    pub relation_type: String,
    pub created_at: DateTime<Utc>,
}

/// Input shape for `create_entities`.  Observations supplied inline are
/// appended after the upsert resolves the entity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySpec {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

/// A `(from, to, type)` triple as supplied by `create_relations`, named by
/// entity **name** rather than id — the tool resolves names to ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationSpec {
    pub from: String,
    pub to: String,
    pub relation_type: String,
}

/// Full tenant graph as returned by `read_graph`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub stats: GraphStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub entity_count: u64,
    pub relation_count: u64,
    pub observation_count: u64,
}

/// Result of an idempotent entity upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOutcome {
    /// Ids of rows created by this call.
    pub created_ids: Vec<String>,
    /// Ids of rows that already existed for the supplied `(type, name)`.
    pub existing_ids: Vec<String>,
}

// ── Search ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Exact,
    Semantic,
    Graph,
    Hybrid,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Hybrid
    }
}

/// What the search actually executed.  Differs from the requested mode
/// when the vector sidecar is absent: `semantic` degrades to `none`,
/// `hybrid` degrades to `exact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeUsed {
    Exact,
    Semantic,
    Graph,
    Hybrid,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub entity: Entity,
    /// Exact boost + vector score; exact-only hits score 1.0.
    pub score: f64,
    /// Observation snippets that matched (exact mode) or were nearest
    /// (semantic mode).  May be empty for graph-traversal hits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub results: Vec<SearchHit>,
    pub mode_used: ModeUsed,
}

impl SearchResults {
    pub fn empty(mode_used: ModeUsed) -> Self {
        Self {
            results: Vec::new(),
            mode_used,
        }
    }
}

// ── Agents ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(AgentStatus::Online),
            "offline" => Some(AgentStatus::Offline),
            "busy" => Some(AgentStatus::Busy),
            "error" => Some(AgentStatus::Error),
            _ => None,
        }
    }
}

/// A named participant in the tenant: IDE client, CLI, or autonomous
/// worker.  Capabilities are free-form tags the router matches with AND
/// semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

// ── Messaging ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(MessagePriority::Low),
            "normal" => Some(MessagePriority::Normal),
            "high" => Some(MessagePriority::High),
            "urgent" => Some(MessagePriority::Urgent),
            _ => None,
        }
    }
}

/// An addressed message.  Immutable after insert except for the single
/// `readAt` stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub priority: MessagePriority,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Result of a `send_ai_message` fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub message_ids: Vec<String>,
    pub recipients: Vec<String>,
}

/// Inbox page as returned by `get_ai_messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxPage {
    pub messages: Vec<Message>,
    /// Total messages for this recipient in the tenant.
    pub total: u64,
    /// Unread messages remaining **after** this call (a `markAsRead`
    /// read decrements this).
    pub unread: u64,
}

// ── Individual memory ─────────────────────────────────────────────────────────

/// Durable agent-private note used to seed later context bundles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Learning {
    pub id: String,
    pub agent_id: String,
    pub context: String,
    pub lesson: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Agent-private key/value preference, last-writer-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Bundle returned by `get_individual_memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualMemory {
    pub agent_id: String,
    /// Learnings ranked by recency × confidence, newest first on ties.
    pub learnings: Vec<Learning>,
    pub preferences: Vec<Preference>,
}

// ── Sessions & handoffs ───────────────────────────────────────────────────────

/// A work session.  At most one open session per
/// `(tenant, agent, project)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub agent_id: String,
    pub project_id: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Cross-session note written by `end_session`, consumed at most once by
/// the next `begin_session` for the same project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    pub id: String,
    pub project_id: String,
    pub authoring_agent_id: String,
    pub summary: String,
    #[serde(default)]
    pub open_items: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

// ── Context bundle ────────────────────────────────────────────────────────────

/// How many tiers of the context bundle to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextDepth {
    Hot,
    Warm,
    Cold,
}

impl Default for ContextDepth {
    fn default() -> Self {
        ContextDepth::Warm
    }
}

impl ContextDepth {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hot" => Some(ContextDepth::Hot),
            "warm" => Some(ContextDepth::Warm),
            "cold" => Some(ContextDepth::Cold),
            _ => None,
        }
    }
}

/// HOT tier: who the agent is and what is immediately actionable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIdentity {
    pub agent_id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// WARM tier additions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleWarm {
    /// Top-N learnings by recency × confidence.
    pub learnings: Vec<Learning>,
    pub preferences: Vec<Preference>,
    /// Summary written by the most recent closed session's handoff for
    /// this project, consumed or not.
    pub last_session_summary: Option<String>,
}

/// COLD tier additions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleCold {
    /// Entities relevant to the project via hybrid search, with the
    /// observations that matched.
    pub entities: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
    pub depth: ContextDepth,
    /// Coarse budget hint: serialized bytes / 4.  No wall-clock input —
    /// the bundle must be byte-identical for identical database state.
    pub token_estimate: u64,
    pub project_id: String,
}

/// The tiered context bundle returned by `get_agent_context` and embedded
/// in `begin_session`.  Deterministic: same database state and same
/// `(tenant, agent, project, depth)` give byte-identical output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBundle {
    pub identity: BundleIdentity,
    pub unread_messages: Vec<Message>,
    pub open_session: Option<SessionRecord>,
    /// Latest unconsumed handoff for the project (not consumed by this
    /// read — only `begin_session` consumes).
    pub handoff: Option<Handoff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warm: Option<BundleWarm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cold: Option<BundleCold>,
    pub meta: BundleMeta,
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_serializes_in_camel_case_with_type_field() {
        let e = Entity {
            id: "e1".into(),
            name: "billing".into(),
            entity_type: "service".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "service");
        assert!(v.get("createdAt").is_some());
        assert!(v.get("entity_type").is_none());
    }

    #[test]
    fn message_priority_defaults_to_normal() {
        assert_eq!(MessagePriority::default(), MessagePriority::Normal);
        assert_eq!(MessagePriority::parse("urgent"), Some(MessagePriority::Urgent));
        assert_eq!(MessagePriority::parse("shouty"), None);
    }

    #[test]
    fn agent_status_round_trips_through_str() {
        for s in [
            AgentStatus::Online,
            AgentStatus::Offline,
            AgentStatus::Busy,
            AgentStatus::Error,
        ] {
            assert_eq!(AgentStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn search_mode_deserializes_lowercase() {
        let m: SearchMode = serde_json::from_str("\"semantic\"").unwrap();
        assert_eq!(m, SearchMode::Semantic);
    }

    #[test]
    fn context_depth_parse() {
        assert_eq!(ContextDepth::parse("hot"), Some(ContextDepth::Hot));
        assert_eq!(ContextDepth::parse("COLD"), None);
    }

    #[test]
    fn bundle_omits_absent_tiers() {
        let bundle = ContextBundle {
            identity: BundleIdentity {
                agent_id: "a1".into(),
                name: None,
                capabilities: vec![],
            },
            unread_messages: vec![],
            open_session: None,
            handoff: None,
            warm: None,
            cold: None,
            meta: BundleMeta {
                depth: ContextDepth::Hot,
                token_estimate: 0,
                project_id: "p1".into(),
            },
        };
        let v = serde_json::to_value(&bundle).unwrap();
        assert!(v.get("warm").is_none());
        assert!(v.get("cold").is_none());
        assert_eq!(v["meta"]["depth"], "hot");
    }

    #[test]
    fn message_read_at_serializes_as_null_until_stamped() {
        let m = Message {
            id: "m1".into(),
            from: "alpha".into(),
            to: "beta".into(),
            content: "ping".into(),
            message_type: "info".into(),
            priority: MessagePriority::Normal,
            created_at: Utc::now(),
            read_at: None,
        };
        let v = serde_json::to_value(&m).unwrap();
        assert!(v["readAt"].is_null());
        assert_eq!(v["type"], "info");
    }
}
