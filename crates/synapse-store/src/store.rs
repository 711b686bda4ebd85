// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! [`MemoryStore`] — all durable state, tenant-scoped at the SQL layer.
//!
//! Every public operation takes a [`RequestContext`] and binds
//! `ctx.tenant_id` into the query.  There is no code path that reads or
//! writes a row without that filter; the two maintenance sweeps
//! ([`MemoryStore::sweep_stale_agents`], [`MemoryStore::purge_handoffs`])
//! are the deliberate exceptions and run on behalf of the server, not a
//! request.
//!
//! Failure semantics: SQLite errors surface as `HubError::Storage` and are
//! safe to retry — every write here is an upsert or an insert keyed by a
//! fresh UUID.  Uniqueness violations on upsert paths are handled inline
//! (`INSERT OR IGNORE` + re-select) and are not errors.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use synapse_core::{
    AgentRecord, AgentStatus, Entity, EntitySpec, GraphSnapshot, GraphStats, Handoff, HubError,
    IndividualMemory, InboxPage, Learning, Message, MessagePriority, Observation, Preference,
    Relation, RelationSpec, RequestContext, SearchHit, SendOutcome, SessionRecord, UpsertOutcome,
};

use crate::schema;

/// Options for [`MemoryStore::list_messages`].
#[derive(Debug, Clone, Default)]
pub struct ListMessageOpts {
    pub unread_only: bool,
    /// Return only messages strictly after the one with this id.
    pub since_id: Option<String>,
    /// Page size; defaults to 50, capped at 500.
    pub limit: Option<usize>,
    /// Stamp `readAt` on the returned rows.  Honored only when the caller
    /// is the inbox owner; silently ignored otherwise.
    pub mark_as_read: bool,
}

/// Resolved API key row (never contains the key itself, only metadata).
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub id: String,
    pub tenant_id: String,
    pub scopes: Vec<String>,
}

/// The primary relational store.
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &std::path::Path) -> Result<Self, HubError> {
        let conn = Connection::open(path).map_err(db_err)?;
        schema::initialize(&conn).map_err(db_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database, used by tests and `--ephemeral` runs.
    pub fn open_in_memory() -> Result<Self, HubError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        schema::initialize(&conn).map_err(db_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Liveness probe for `/ready`.
    pub async fn ping(&self) -> Result<(), HubError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(db_err)
    }

    // ── Tenants, API keys, memberships ───────────────────────────────────────

    pub async fn ensure_tenant(&self, tenant_id: &str) -> Result<(), HubError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO tenants (id, created_at) VALUES (?1, ?2)",
            params![tenant_id, fmt_ts(&Utc::now())],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn tenant_exists(&self, tenant_id: &str) -> Result<bool, HubError> {
        let conn = self.conn.lock().await;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tenants WHERE id = ?1",
                params![tenant_id],
                |r| r.get(0),
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    /// Store a new API key hash.  The raw key never reaches this layer.
    pub async fn insert_api_key(
        &self,
        tenant_id: &str,
        key_hash_hex: &str,
        scopes: &[String],
        label: &str,
    ) -> Result<String, HubError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO tenants (id, created_at) VALUES (?1, ?2)",
            params![tenant_id, fmt_ts(&Utc::now())],
        )
        .map_err(db_err)?;
        conn.execute(
            "INSERT INTO api_keys (id, tenant_id, key_hash, scopes, label, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                tenant_id,
                key_hash_hex,
                serde_json::to_string(scopes).unwrap_or_else(|_| "[]".into()),
                label,
                fmt_ts(&Utc::now())
            ],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    /// Resolve an API key by its SHA-256 digest.  Revoked keys resolve to
    /// nothing, indistinguishable from unknown keys.
    pub async fn lookup_api_key(&self, key_hash_hex: &str) -> Result<Option<ApiKeyRecord>, HubError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, tenant_id, scopes FROM api_keys
             WHERE key_hash = ?1 AND revoked = 0",
            params![key_hash_hex],
            |r| {
                let scopes_json: String = r.get(2)?;
                Ok(ApiKeyRecord {
                    id: r.get(0)?,
                    tenant_id: r.get(1)?,
                    scopes: serde_json::from_str(&scopes_json).unwrap_or_default(),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    pub async fn add_membership(&self, tenant_id: &str, principal: &str) -> Result<(), HubError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO tenant_members (tenant_id, principal) VALUES (?1, ?2)",
            params![tenant_id, principal],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Whether `principal` (a user id or API-key id) is recorded as a
    /// member of `tenant_id`.  Gates the `X-Tenant-Id` override.
    pub async fn has_membership(&self, tenant_id: &str, principal: &str) -> Result<bool, HubError> {
        let conn = self.conn.lock().await;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tenant_members WHERE tenant_id = ?1 AND principal = ?2",
                params![tenant_id, principal],
                |r| r.get(0),
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    // ── Knowledge graph ──────────────────────────────────────────────────────

    /// Idempotent entity upsert on `(type, name)`.  Inline observations
    /// are appended whether the entity was created or already existed.
    ///
    /// Returns the outcome plus the observations inserted by this call
    /// (the hub forwards those to the vector sidecar).
    pub async fn upsert_entities(
        &self,
        ctx: &RequestContext,
        specs: &[EntitySpec],
    ) -> Result<(UpsertOutcome, Vec<Observation>), HubError> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;

        let mut outcome = UpsertOutcome::default();
        let mut new_obs = Vec::new();

        for (i, spec) in specs.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(HubError::invalid_arg(
                    format!("entities[{i}].name"),
                    "must be non-empty",
                ));
            }
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM entities
                     WHERE tenant_id = ?1 AND entity_type = ?2 AND name = ?3",
                    params![ctx.tenant_id, spec.entity_type, spec.name],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?;

            let entity_id = match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE entities SET updated_at = ?1 WHERE tenant_id = ?2 AND id = ?3",
                        params![fmt_ts(&now), ctx.tenant_id, id],
                    )
                    .map_err(db_err)?;
                    outcome.existing_ids.push(id.clone());
                    id
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO entities (id, tenant_id, name, entity_type, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                        params![id, ctx.tenant_id, spec.name, spec.entity_type, fmt_ts(&now)],
                    )
                    .map_err(db_err)?;
                    outcome.created_ids.push(id.clone());
                    id
                }
            };

            for content in &spec.observations {
                let obs = Observation {
                    id: Uuid::new_v4().to_string(),
                    entity_id: entity_id.clone(),
                    content: content.clone(),
                    created_at: now,
                };
                tx.execute(
                    "INSERT INTO observations (id, tenant_id, entity_id, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![obs.id, ctx.tenant_id, obs.entity_id, obs.content, fmt_ts(&now)],
                )
                .map_err(db_err)?;
                new_obs.push(obs);
            }
        }

        tx.commit().map_err(db_err)?;
        debug!(
            tenant = %ctx.tenant_id,
            created = outcome.created_ids.len(),
            existing = outcome.existing_ids.len(),
            "entities upserted"
        );
        Ok((outcome, new_obs))
    }

    /// Append observations to a named entity.  `NotFound` when the name
    /// does not resolve within the tenant.
    pub async fn add_observations(
        &self,
        ctx: &RequestContext,
        entity_name: &str,
        contents: &[String],
    ) -> Result<Vec<Observation>, HubError> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;

        let entity_id: String = tx
            .query_row(
                "SELECT id FROM entities WHERE tenant_id = ?1 AND name = ?2
                 ORDER BY created_at, id LIMIT 1",
                params![ctx.tenant_id, entity_name],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| HubError::not_found(format!("entity `{entity_name}`")))?;

        let mut out = Vec::with_capacity(contents.len());
        for content in contents {
            let obs = Observation {
                id: Uuid::new_v4().to_string(),
                entity_id: entity_id.clone(),
                content: content.clone(),
                created_at: now,
            };
            tx.execute(
                "INSERT INTO observations (id, tenant_id, entity_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![obs.id, ctx.tenant_id, obs.entity_id, obs.content, fmt_ts(&now)],
            )
            .map_err(db_err)?;
            out.push(obs);
        }
        tx.commit().map_err(db_err)?;
        Ok(out)
    }

    /// Idempotent relation creation.  Endpoint names resolve within the
    /// tenant, so both ends of an edge always share one tenant.
    pub async fn create_relations(
        &self,
        ctx: &RequestContext,
        specs: &[RelationSpec],
    ) -> Result<UpsertOutcome, HubError> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;

        let resolve = |name: &str| -> Result<String, HubError> {
            tx.query_row(
                "SELECT id FROM entities WHERE tenant_id = ?1 AND name = ?2
                 ORDER BY created_at, id LIMIT 1",
                params![ctx.tenant_id, name],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| HubError::not_found(format!("entity `{name}`")))
        };

        let mut outcome = UpsertOutcome::default();
        for spec in specs {
            let from_id = resolve(&spec.from)?;
            let to_id = resolve(&spec.to)?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM relations
                     WHERE tenant_id = ?1 AND from_entity_id = ?2
                       AND to_entity_id = ?3 AND relation_type = ?4",
                    params![ctx.tenant_id, from_id, to_id, spec.relation_type],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?;

            match existing {
                Some(id) => outcome.existing_ids.push(id),
                None => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO relations
                         (id, tenant_id, from_entity_id, to_entity_id, relation_type, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![id, ctx.tenant_id, from_id, to_id, spec.relation_type, fmt_ts(&now)],
                    )
                    .map_err(db_err)?;
                    outcome.created_ids.push(id);
                }
            }
        }
        tx.commit().map_err(db_err)?;
        Ok(outcome)
    }

    /// The calling tenant's full graph, deterministically ordered.
    pub async fn read_graph(&self, ctx: &RequestContext) -> Result<GraphSnapshot, HubError> {
        let conn = self.conn.lock().await;

        let mut stmt = conn
            .prepare(
                "SELECT id, name, entity_type, created_at, updated_at FROM entities
                 WHERE tenant_id = ?1 ORDER BY created_at, id",
            )
            .map_err(db_err)?;
        let entities = stmt
            .query_map(params![ctx.tenant_id], row_to_entity)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, from_entity_id, to_entity_id, relation_type, created_at FROM relations
                 WHERE tenant_id = ?1 ORDER BY created_at, id",
            )
            .map_err(db_err)?;
        let relations = stmt
            .query_map(params![ctx.tenant_id], row_to_relation)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let observation_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM observations WHERE tenant_id = ?1",
                params![ctx.tenant_id],
                |r| r.get(0),
            )
            .map_err(db_err)?;

        let stats = GraphStats {
            entity_count: entities.len() as u64,
            relation_count: relations.len() as u64,
            observation_count: observation_count as u64,
        };
        Ok(GraphSnapshot { entities, relations, stats })
    }

    /// Exact substring search over entity names and observation content.
    /// Case-insensitive; the tenant filter is in the SQL, always.
    pub async fn exact_search(
        &self,
        ctx: &RequestContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, HubError> {
        let pattern = format!("%{}%", query.to_lowercase());
        let conn = self.conn.lock().await;

        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT e.id, e.name, e.entity_type, e.created_at, e.updated_at
                 FROM entities e
                 LEFT JOIN observations o
                   ON o.tenant_id = e.tenant_id AND o.entity_id = e.id
                 WHERE e.tenant_id = ?1
                   AND (LOWER(e.name) LIKE ?2 OR LOWER(o.content) LIKE ?2)
                 ORDER BY e.created_at, e.id
                 LIMIT ?3",
            )
            .map_err(db_err)?;
        let entities = stmt
            .query_map(params![ctx.tenant_id, pattern, limit as i64], row_to_entity)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let mut hits = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut stmt = conn
                .prepare(
                    "SELECT content FROM observations
                     WHERE tenant_id = ?1 AND entity_id = ?2 AND LOWER(content) LIKE ?3
                     ORDER BY created_at, id LIMIT 3",
                )
                .map_err(db_err)?;
            let matched = stmt
                .query_map(params![ctx.tenant_id, entity.id, pattern], |r| r.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            hits.push(SearchHit { entity, score: 1.0, matched });
        }
        Ok(hits)
    }

    /// Load entities by id, preserving tenant scope.  Ids from outside the
    /// tenant silently resolve to nothing — this is the intersection step
    /// the semantic path relies on.
    pub async fn entities_by_ids(
        &self,
        ctx: &RequestContext,
        ids: &[String],
    ) -> Result<Vec<Entity>, HubError> {
        let conn = self.conn.lock().await;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let entity = conn
                .query_row(
                    "SELECT id, name, entity_type, created_at, updated_at FROM entities
                     WHERE tenant_id = ?1 AND id = ?2",
                    params![ctx.tenant_id, id],
                    row_to_entity,
                )
                .optional()
                .map_err(db_err)?;
            if let Some(e) = entity {
                out.push(e);
            }
        }
        Ok(out)
    }

    /// Outgoing edges from any of `from_ids` (one BFS step).
    pub async fn outgoing_relations(
        &self,
        ctx: &RequestContext,
        from_ids: &[String],
    ) -> Result<Vec<Relation>, HubError> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        for from_id in from_ids {
            let mut stmt = conn
                .prepare(
                    "SELECT id, from_entity_id, to_entity_id, relation_type, created_at
                     FROM relations WHERE tenant_id = ?1 AND from_entity_id = ?2
                     ORDER BY created_at, id",
                )
                .map_err(db_err)?;
            let rels = stmt
                .query_map(params![ctx.tenant_id, from_id], row_to_relation)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            out.extend(rels);
        }
        Ok(out)
    }

    // ── Messaging ────────────────────────────────────────────────────────────

    /// Fan-out insert: one immutable message row per recipient, all in a
    /// single transaction with identical `createdAt`, so an observer never
    /// sees a partial broadcast.
    pub async fn insert_messages(
        &self,
        ctx: &RequestContext,
        from: &str,
        recipients: &[String],
        content: &str,
        message_type: &str,
        priority: MessagePriority,
    ) -> Result<SendOutcome, HubError> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;

        let mut message_ids = Vec::with_capacity(recipients.len());
        for to in recipients {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO messages
                 (id, tenant_id, from_agent, to_agent, content, message_type, priority, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    ctx.tenant_id,
                    from,
                    to,
                    content,
                    message_type,
                    priority.as_str(),
                    fmt_ts(&now)
                ],
            )
            .map_err(db_err)?;
            message_ids.push(id);
        }
        tx.commit().map_err(db_err)?;

        Ok(SendOutcome {
            message_ids,
            recipients: recipients.to_vec(),
        })
    }

    /// Inbox page in insertion order.  `markAsRead` stamps `readAt` on
    /// precisely the returned rows, and only when the caller owns the
    /// inbox (`ctx.agent_id == agent_id`); otherwise it is ignored with
    /// no error.
    pub async fn list_messages(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        opts: &ListMessageOpts,
    ) -> Result<InboxPage, HubError> {
        let limit = opts.limit.unwrap_or(50).min(500);
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;

        // Resolve the pagination cursor inside the same transaction.
        let cursor: Option<(String, String)> = match &opts.since_id {
            Some(id) => tx
                .query_row(
                    "SELECT created_at, id FROM messages WHERE tenant_id = ?1 AND id = ?2",
                    params![ctx.tenant_id, id],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(db_err)?,
            None => None,
        };

        let (cursor_ts, cursor_id) = match &cursor {
            Some((ts, id)) => (ts.as_str(), id.as_str()),
            // Sorts before every RFC 3339 timestamp.
            None => ("", ""),
        };

        let unread_filter = if opts.unread_only { "AND read_at IS NULL" } else { "" };
        let sql = format!(
            "SELECT id, from_agent, to_agent, content, message_type, priority, created_at, read_at
             FROM messages
             WHERE tenant_id = ?1 AND to_agent = ?2
               AND (created_at > ?3 OR (created_at = ?3 AND id > ?4))
               {unread_filter}
             ORDER BY created_at, id
             LIMIT ?5"
        );
        let mut stmt = tx.prepare(&sql).map_err(db_err)?;
        let mut messages = stmt
            .query_map(
                params![ctx.tenant_id, agent_id, cursor_ts, cursor_id, limit as i64],
                row_to_message,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        drop(stmt);

        let is_owner = ctx.agent_id.as_deref() == Some(agent_id);
        if opts.mark_as_read && is_owner {
            let stamp = fmt_ts(&Utc::now());
            for m in messages.iter_mut().filter(|m| m.read_at.is_none()) {
                tx.execute(
                    "UPDATE messages SET read_at = ?1
                     WHERE tenant_id = ?2 AND id = ?3 AND read_at IS NULL",
                    params![stamp, ctx.tenant_id, m.id],
                )
                .map_err(db_err)?;
                m.read_at = Some(parse_ts_lossy(&stamp));
            }
        }

        let total: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE tenant_id = ?1 AND to_agent = ?2",
                params![ctx.tenant_id, agent_id],
                |r| r.get(0),
            )
            .map_err(db_err)?;
        let unread: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE tenant_id = ?1 AND to_agent = ?2 AND read_at IS NULL",
                params![ctx.tenant_id, agent_id],
                |r| r.get(0),
            )
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(InboxPage {
            messages,
            total: total as u64,
            unread: unread as u64,
        })
    }

    /// Stamp `readAt` on specific message ids.  Honored only for rows
    /// addressed to the caller's own agent; other rows are skipped
    /// silently.  Returns how many rows were stamped.
    pub async fn mark_read(
        &self,
        ctx: &RequestContext,
        ids: &[String],
    ) -> Result<u64, HubError> {
        let Some(owner) = ctx.agent_id.as_deref() else {
            return Ok(0);
        };
        let stamp = fmt_ts(&Utc::now());
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let mut stamped = 0u64;
        for id in ids {
            stamped += tx
                .execute(
                    "UPDATE messages SET read_at = ?1
                     WHERE tenant_id = ?2 AND id = ?3 AND to_agent = ?4 AND read_at IS NULL",
                    params![stamp, ctx.tenant_id, id, owner],
                )
                .map_err(db_err)? as u64;
        }
        tx.commit().map_err(db_err)?;
        Ok(stamped)
    }

    /// Unread messages for an agent, oldest first (HOT context tier).
    pub async fn unread_messages(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, HubError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, from_agent, to_agent, content, message_type, priority, created_at, read_at
                 FROM messages
                 WHERE tenant_id = ?1 AND to_agent = ?2 AND read_at IS NULL
                 ORDER BY created_at, id LIMIT ?3",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![ctx.tenant_id, agent_id, limit as i64], row_to_message)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        rows
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    /// Insert or refresh an agent row; registration is last-writer-wins on
    /// name, capabilities and metadata.
    pub async fn upsert_agent(
        &self,
        ctx: &RequestContext,
        id: &str,
        name: &str,
        capabilities: &[String],
        status: AgentStatus,
        metadata: &serde_json::Value,
    ) -> Result<AgentRecord, HubError> {
        let now = Utc::now();
        let caps_json = serde_json::to_string(capabilities).unwrap_or_else(|_| "[]".into());
        let meta_json = serde_json::to_string(metadata).unwrap_or_else(|_| "{}".into());
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO agents (id, tenant_id, name, capabilities, status, last_seen, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (tenant_id, id) DO UPDATE SET
                 name = excluded.name,
                 capabilities = excluded.capabilities,
                 status = excluded.status,
                 last_seen = excluded.last_seen,
                 metadata = excluded.metadata",
            params![id, ctx.tenant_id, name, caps_json, status.as_str(), fmt_ts(&now), meta_json],
        )
        .map_err(db_err)?;
        Ok(AgentRecord {
            id: id.to_string(),
            name: name.to_string(),
            capabilities: capabilities.to_vec(),
            status,
            last_seen: now,
            metadata: metadata.clone(),
        })
    }

    pub async fn get_agent(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Option<AgentRecord>, HubError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, name, capabilities, status, last_seen, metadata FROM agents
             WHERE tenant_id = ?1 AND id = ?2",
            params![ctx.tenant_id, id],
            row_to_agent,
        )
        .optional()
        .map_err(db_err)
    }

    pub async fn list_agents(&self, ctx: &RequestContext) -> Result<Vec<AgentRecord>, HubError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, capabilities, status, last_seen, metadata FROM agents
                 WHERE tenant_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![ctx.tenant_id], row_to_agent)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err);
        rows
    }

    /// Refresh `lastSeen` (and optionally status) for a known agent.
    /// Unknown agents are a no-op — tool calls may carry an agent id that
    /// never registered.
    pub async fn touch_agent(
        &self,
        ctx: &RequestContext,
        id: &str,
        status: Option<AgentStatus>,
    ) -> Result<(), HubError> {
        let conn = self.conn.lock().await;
        match status {
            Some(s) => conn.execute(
                "UPDATE agents SET last_seen = ?1, status = ?2 WHERE tenant_id = ?3 AND id = ?4",
                params![fmt_ts(&Utc::now()), s.as_str(), ctx.tenant_id, id],
            ),
            None => conn.execute(
                "UPDATE agents SET last_seen = ?1 WHERE tenant_id = ?2 AND id = ?3",
                params![fmt_ts(&Utc::now()), ctx.tenant_id, id],
            ),
        }
        .map_err(db_err)?;
        Ok(())
    }

    /// Maintenance sweep: flip agents with no activity since `cutoff` to
    /// offline.  Runs across tenants on behalf of the server itself.
    /// Stale rows are kept, never deleted.
    pub async fn sweep_stale_agents(&self, cutoff: DateTime<Utc>) -> Result<u64, HubError> {
        let conn = self.conn.lock().await;
        let n = conn
            .execute(
                "UPDATE agents SET status = 'offline'
                 WHERE last_seen < ?1 AND status != 'offline'",
                params![fmt_ts(&cutoff)],
            )
            .map_err(db_err)?;
        Ok(n as u64)
    }

    // ── Individual memory ────────────────────────────────────────────────────

    pub async fn record_learning(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        context: &str,
        lesson: &str,
        confidence: f64,
    ) -> Result<Learning, HubError> {
        let learning = Learning {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            context: context.to_string(),
            lesson: lesson.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO learnings (id, tenant_id, agent_id, context, lesson, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                learning.id,
                ctx.tenant_id,
                learning.agent_id,
                learning.context,
                learning.lesson,
                learning.confidence,
                fmt_ts(&learning.created_at)
            ],
        )
        .map_err(db_err)?;
        Ok(learning)
    }

    /// Last-writer-wins preference upsert.
    pub async fn set_preferences(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        prefs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<Preference>, HubError> {
        let now = Utc::now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let mut out = Vec::with_capacity(prefs.len());
        for (key, value) in prefs {
            tx.execute(
                "INSERT INTO preferences (tenant_id, agent_id, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (tenant_id, agent_id, key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![
                    ctx.tenant_id,
                    agent_id,
                    key,
                    serde_json::to_string(value).unwrap_or_else(|_| "null".into()),
                    fmt_ts(&now)
                ],
            )
            .map_err(db_err)?;
            out.push(Preference {
                key: key.clone(),
                value: value.clone(),
                updated_at: now,
            });
        }
        tx.commit().map_err(db_err)?;
        Ok(out)
    }

    /// Learnings ranked by recency × confidence plus all preferences.
    ///
    /// Ranking is a pure function of database state (recency weight comes
    /// from row order, not wall-clock age), so two calls against the same
    /// state return the same bytes.
    pub async fn individual_memory(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        limit: usize,
    ) -> Result<IndividualMemory, HubError> {
        let conn = self.conn.lock().await;

        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, context, lesson, confidence, created_at FROM learnings
                 WHERE tenant_id = ?1 AND agent_id = ?2
                 ORDER BY created_at DESC, id DESC LIMIT 50",
            )
            .map_err(db_err)?;
        let recent = stmt
            .query_map(params![ctx.tenant_id, agent_id], row_to_learning)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let mut ranked: Vec<(f64, Learning)> = recent
            .into_iter()
            .enumerate()
            .map(|(i, l)| (l.confidence / (1.0 + i as f64), l))
            .collect();
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        let learnings: Vec<Learning> = ranked.into_iter().take(limit).map(|(_, l)| l).collect();

        let mut stmt = conn
            .prepare(
                "SELECT key, value, updated_at FROM preferences
                 WHERE tenant_id = ?1 AND agent_id = ?2 ORDER BY key",
            )
            .map_err(db_err)?;
        let preferences = stmt
            .query_map(params![ctx.tenant_id, agent_id], |r| {
                let value_json: String = r.get(1)?;
                let updated: String = r.get(2)?;
                Ok(Preference {
                    key: r.get(0)?,
                    value: serde_json::from_str(&value_json)
                        .unwrap_or(serde_json::Value::Null),
                    updated_at: parse_ts_lossy(&updated),
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        Ok(IndividualMemory {
            agent_id: agent_id.to_string(),
            learnings,
            preferences,
        })
    }

    // ── Sessions & handoffs ──────────────────────────────────────────────────

    pub async fn find_open_session(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        project_id: &str,
    ) -> Result<Option<SessionRecord>, HubError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, agent_id, project_id, opened_at, closed_at FROM sessions
             WHERE tenant_id = ?1 AND agent_id = ?2 AND project_id = ?3 AND closed_at IS NULL",
            params![ctx.tenant_id, agent_id, project_id],
            row_to_session,
        )
        .optional()
        .map_err(db_err)
    }

    /// Open a session, or return the already-open one (session singleton).
    pub async fn open_session(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        project_id: &str,
    ) -> Result<SessionRecord, HubError> {
        if let Some(open) = self.find_open_session(ctx, agent_id, project_id).await? {
            return Ok(open);
        }
        let session = SessionRecord {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            project_id: project_id.to_string(),
            opened_at: Utc::now(),
            closed_at: None,
        };
        let inserted = {
            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT OR IGNORE INTO sessions (id, tenant_id, agent_id, project_id, opened_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.id,
                    ctx.tenant_id,
                    agent_id,
                    project_id,
                    fmt_ts(&session.opened_at)
                ],
            )
            .map_err(db_err)?
        };
        if inserted == 0 {
            // Lost the race against a concurrent begin_session: reuse.
            return self
                .find_open_session(ctx, agent_id, project_id)
                .await?
                .ok_or_else(|| HubError::storage("open session vanished during race"));
        }
        Ok(session)
    }

    /// Close the open session if one exists.
    pub async fn close_session(
        &self,
        ctx: &RequestContext,
        agent_id: &str,
        project_id: &str,
    ) -> Result<Option<SessionRecord>, HubError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "UPDATE sessions SET closed_at = ?1
             WHERE tenant_id = ?2 AND agent_id = ?3 AND project_id = ?4 AND closed_at IS NULL
             RETURNING id, agent_id, project_id, opened_at, closed_at",
            params![fmt_ts(&Utc::now()), ctx.tenant_id, agent_id, project_id],
            row_to_session,
        )
        .optional()
        .map_err(db_err)
    }

    pub async fn write_handoff(
        &self,
        ctx: &RequestContext,
        project_id: &str,
        author_agent_id: &str,
        summary: &str,
        open_items: &[String],
    ) -> Result<Handoff, HubError> {
        let handoff = Handoff {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            authoring_agent_id: author_agent_id.to_string(),
            summary: summary.to_string(),
            open_items: open_items.to_vec(),
            created_at: Utc::now(),
            consumed_at: None,
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO handoffs
             (id, tenant_id, project_id, author_agent_id, summary, open_items, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                handoff.id,
                ctx.tenant_id,
                handoff.project_id,
                handoff.authoring_agent_id,
                handoff.summary,
                serde_json::to_string(&handoff.open_items).unwrap_or_else(|_| "[]".into()),
                fmt_ts(&handoff.created_at)
            ],
        )
        .map_err(db_err)?;
        Ok(handoff)
    }

    /// Consume the most recent unconsumed handoff for the project.
    ///
    /// The conditional `UPDATE … WHERE consumed_at IS NULL RETURNING` is
    /// what makes consumption at-most-once under concurrent
    /// `begin_session` calls: only one caller's update matches.
    pub async fn consume_handoff(
        &self,
        ctx: &RequestContext,
        project_id: &str,
    ) -> Result<Option<Handoff>, HubError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "UPDATE handoffs SET consumed_at = ?1
             WHERE tenant_id = ?2 AND id = (
                 SELECT id FROM handoffs
                 WHERE tenant_id = ?2 AND project_id = ?3 AND consumed_at IS NULL
                 ORDER BY created_at DESC, id DESC LIMIT 1
             ) AND consumed_at IS NULL
             RETURNING id, project_id, author_agent_id, summary, open_items, created_at, consumed_at",
            params![fmt_ts(&Utc::now()), ctx.tenant_id, project_id],
            row_to_handoff,
        )
        .optional()
        .map_err(db_err)
    }

    /// Non-consuming read of the latest unconsumed handoff (context tier).
    pub async fn peek_handoff(
        &self,
        ctx: &RequestContext,
        project_id: &str,
    ) -> Result<Option<Handoff>, HubError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, project_id, author_agent_id, summary, open_items, created_at, consumed_at
             FROM handoffs
             WHERE tenant_id = ?1 AND project_id = ?2 AND consumed_at IS NULL
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![ctx.tenant_id, project_id],
            row_to_handoff,
        )
        .optional()
        .map_err(db_err)
    }

    /// Summary of the most recent handoff for the project regardless of
    /// consumption state (WARM tier: "last session's summary").
    pub async fn last_handoff_summary(
        &self,
        ctx: &RequestContext,
        project_id: &str,
    ) -> Result<Option<String>, HubError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT summary FROM handoffs
             WHERE tenant_id = ?1 AND project_id = ?2
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![ctx.tenant_id, project_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    /// Retention sweep: delete unconsumed handoffs older than `cutoff`.
    pub async fn purge_handoffs(&self, cutoff: DateTime<Utc>) -> Result<u64, HubError> {
        let conn = self.conn.lock().await;
        let n = conn
            .execute(
                "DELETE FROM handoffs WHERE consumed_at IS NULL AND created_at < ?1",
                params![fmt_ts(&cutoff)],
            )
            .map_err(db_err)?;
        Ok(n as u64)
    }

    // ── Status counters ──────────────────────────────────────────────────────

    /// Coarse tenant-scoped row counts for `/system/status`.
    pub async fn tenant_counters(&self, ctx: &RequestContext) -> Result<serde_json::Value, HubError> {
        let conn = self.conn.lock().await;
        let count = |sql: &str| -> Result<i64, HubError> {
            conn.query_row(sql, params![ctx.tenant_id], |r| r.get(0)).map_err(db_err)
        };
        Ok(serde_json::json!({
            "entities": count("SELECT COUNT(*) FROM entities WHERE tenant_id = ?1")?,
            "relations": count("SELECT COUNT(*) FROM relations WHERE tenant_id = ?1")?,
            "observations": count("SELECT COUNT(*) FROM observations WHERE tenant_id = ?1")?,
            "agents": count("SELECT COUNT(*) FROM agents WHERE tenant_id = ?1")?,
            "messages": count("SELECT COUNT(*) FROM messages WHERE tenant_id = ?1")?,
            "unreadMessages": count(
                "SELECT COUNT(*) FROM messages WHERE tenant_id = ?1 AND read_at IS NULL")?,
            "openSessions": count(
                "SELECT COUNT(*) FROM sessions WHERE tenant_id = ?1 AND closed_at IS NULL")?,
            "unconsumedHandoffs": count(
                "SELECT COUNT(*) FROM handoffs WHERE tenant_id = ?1 AND consumed_at IS NULL")?,
        }))
    }
}

// ── Row mapping & helpers ─────────────────────────────────────────────────────

fn fmt_ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp we wrote ourselves; epoch on the (impossible) miss
/// rather than a panic in a row-mapping closure.
fn parse_ts_lossy(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

fn db_err(e: rusqlite::Error) -> HubError {
    HubError::storage(e)
}

fn row_to_entity(r: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: r.get(0)?,
        name: r.get(1)?,
        entity_type: r.get(2)?,
        created_at: parse_ts_lossy(&r.get::<_, String>(3)?),
        updated_at: parse_ts_lossy(&r.get::<_, String>(4)?),
    })
}

fn row_to_relation(r: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: r.get(0)?,
        from_entity_id: r.get(1)?,
        to_entity_id: r.get(2)?,
        relation_type: r.get(3)?,
        created_at: parse_ts_lossy(&r.get::<_, String>(4)?),
    })
}

fn row_to_message(r: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let priority: String = r.get(5)?;
    Ok(Message {
        id: r.get(0)?,
        from: r.get(1)?,
        to: r.get(2)?,
        content: r.get(3)?,
        message_type: r.get(4)?,
        priority: MessagePriority::parse(&priority).unwrap_or_default(),
        created_at: parse_ts_lossy(&r.get::<_, String>(6)?),
        read_at: r
            .get::<_, Option<String>>(7)?
            .map(|s| parse_ts_lossy(&s)),
    })
}

fn row_to_agent(r: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
    let caps_json: String = r.get(2)?;
    let status: String = r.get(3)?;
    let meta_json: String = r.get(5)?;
    Ok(AgentRecord {
        id: r.get(0)?,
        name: r.get(1)?,
        capabilities: serde_json::from_str(&caps_json).unwrap_or_default(),
        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Offline),
        last_seen: parse_ts_lossy(&r.get::<_, String>(4)?),
        metadata: serde_json::from_str(&meta_json).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_learning(r: &rusqlite::Row<'_>) -> rusqlite::Result<Learning> {
    Ok(Learning {
        id: r.get(0)?,
        agent_id: r.get(1)?,
        context: r.get(2)?,
        lesson: r.get(3)?,
        confidence: r.get(4)?,
        created_at: parse_ts_lossy(&r.get::<_, String>(5)?),
    })
}

fn row_to_session(r: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: r.get(0)?,
        agent_id: r.get(1)?,
        project_id: r.get(2)?,
        opened_at: parse_ts_lossy(&r.get::<_, String>(3)?),
        closed_at: r
            .get::<_, Option<String>>(4)?
            .map(|s| parse_ts_lossy(&s)),
    })
}

fn row_to_handoff(r: &rusqlite::Row<'_>) -> rusqlite::Result<Handoff> {
    let items_json: String = r.get(4)?;
    Ok(Handoff {
        id: r.get(0)?,
        project_id: r.get(1)?,
        authoring_agent_id: r.get(2)?,
        summary: r.get(3)?,
        open_items: serde_json::from_str(&items_json).unwrap_or_default(),
        created_at: parse_ts_lossy(&r.get::<_, String>(5)?),
        consumed_at: r
            .get::<_, Option<String>>(6)?
            .map(|s| parse_ts_lossy(&s)),
    })
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(tenant: &str) -> RequestContext {
        RequestContext::new(tenant)
    }

    fn agent_ctx(tenant: &str, agent: &str) -> RequestContext {
        RequestContext::new(tenant).with_agent(agent)
    }

    async fn store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn upsert_entities_is_idempotent_on_type_and_name() {
        let s = store().await;
        let t1 = ctx("t1");
        let spec = vec![EntitySpec {
            name: "A".into(),
            entity_type: "test".into(),
            observations: vec![],
        }];

        let (first, _) = s.upsert_entities(&t1, &spec).await.unwrap();
        assert_eq!(first.created_ids.len(), 1);
        assert!(first.existing_ids.is_empty());

        let (second, _) = s.upsert_entities(&t1, &spec).await.unwrap();
        assert!(second.created_ids.is_empty());
        assert_eq!(second.existing_ids, first.created_ids);

        let graph = s.read_graph(&t1).await.unwrap();
        assert_eq!(graph.stats.entity_count, 1);
    }

    #[tokio::test]
    async fn cross_tenant_reads_see_nothing() {
        let s = store().await;
        let t1 = ctx("t1");
        let t2 = ctx("t2");
        s.upsert_entities(
            &t1,
            &[EntitySpec {
                name: "A".into(),
                entity_type: "test".into(),
                observations: vec!["secret".into()],
            }],
        )
        .await
        .unwrap();

        let graph = s.read_graph(&t2).await.unwrap();
        assert!(graph.entities.is_empty());
        assert_eq!(graph.stats.observation_count, 0);

        let hits = s.exact_search(&t2, "A", 10).await.unwrap();
        assert!(hits.is_empty());
        let hits = s.exact_search(&t2, "secret", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn add_observations_requires_entity_in_tenant() {
        let s = store().await;
        let t1 = ctx("t1");
        let err = s
            .add_observations(&t1, "missing", &["x".into()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn relations_are_idempotent_and_tenant_scoped() {
        let s = store().await;
        let t1 = ctx("t1");
        s.upsert_entities(
            &t1,
            &[
                EntitySpec { name: "A".into(), entity_type: "t".into(), observations: vec![] },
                EntitySpec { name: "B".into(), entity_type: "t".into(), observations: vec![] },
            ],
        )
        .await
        .unwrap();

        let spec = vec![RelationSpec {
            from: "A".into(),
            to: "B".into(),
            relation_type: "uses".into(),
        }];
        let first = s.create_relations(&t1, &spec).await.unwrap();
        assert_eq!(first.created_ids.len(), 1);
        let second = s.create_relations(&t1, &spec).await.unwrap();
        assert!(second.created_ids.is_empty());
        assert_eq!(second.existing_ids, first.created_ids);

        // Unknown endpoint name in this tenant.
        let err = s
            .create_relations(
                &ctx("t2"),
                &[RelationSpec { from: "A".into(), to: "B".into(), relation_type: "uses".into() }],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn fan_out_inserts_share_created_at() {
        let s = store().await;
        let t1 = ctx("t1");
        let outcome = s
            .insert_messages(&t1, "alpha", &["beta".into(), "gamma".into()], "ping", "info", MessagePriority::Normal)
            .await
            .unwrap();
        assert_eq!(outcome.message_ids.len(), 2);

        let beta = s.unread_messages(&t1, "beta", 10).await.unwrap();
        let gamma = s.unread_messages(&t1, "gamma", 10).await.unwrap();
        assert_eq!(beta.len(), 1);
        assert_eq!(gamma.len(), 1);
        assert_eq!(beta[0].created_at, gamma[0].created_at);
        assert_eq!(beta[0].content, "ping");
    }

    #[tokio::test]
    async fn mark_as_read_only_for_owner() {
        let s = store().await;
        let t1 = ctx("t1");
        s.insert_messages(&t1, "alpha", &["beta".into()], "hi", "info", MessagePriority::Normal)
            .await
            .unwrap();

        // Non-owner read with markAsRead: ignored, no error.
        let observer = agent_ctx("t1", "gamma");
        let page = s
            .list_messages(&observer, "beta", &ListMessageOpts { mark_as_read: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.unread, 1, "non-owner must not stamp readAt");

        // Owner read with markAsRead: stamps exactly the returned rows.
        let owner = agent_ctx("t1", "beta");
        let page = s
            .list_messages(&owner, "beta", &ListMessageOpts { mark_as_read: true, ..Default::default() })
            .await
            .unwrap();
        assert!(page.messages[0].read_at.is_some());
        assert_eq!(page.unread, 0);
    }

    #[tokio::test]
    async fn mark_read_by_id_respects_ownership() {
        let s = store().await;
        let t1 = ctx("t1");
        let out = s
            .insert_messages(&t1, "alpha", &["beta".into()], "x", "info", MessagePriority::Normal)
            .await
            .unwrap();
        let ids = out.message_ids;

        // Not the addressee: nothing stamped.
        assert_eq!(s.mark_read(&agent_ctx("t1", "gamma"), &ids).await.unwrap(), 0);
        // No agent identity at all: nothing stamped.
        assert_eq!(s.mark_read(&t1, &ids).await.unwrap(), 0);
        // The addressee stamps exactly once.
        assert_eq!(s.mark_read(&agent_ctx("t1", "beta"), &ids).await.unwrap(), 1);
        assert_eq!(s.mark_read(&agent_ctx("t1", "beta"), &ids).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn since_id_paginates_in_insertion_order() {
        let s = store().await;
        let t1 = ctx("t1");
        let mut ids = Vec::new();
        for i in 0..3 {
            let out = s
                .insert_messages(&t1, "a", &["b".into()], &format!("m{i}"), "info", MessagePriority::Normal)
                .await
                .unwrap();
            ids.push(out.message_ids[0].clone());
            // Distinct createdAt values keep the ordering assertions
            // independent of the random-id tiebreaker.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let page = s
            .list_messages(
                &ctx("t1"),
                "b",
                &ListMessageOpts { since_id: Some(ids[0].clone()), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].content, "m1");
        assert_eq!(page.messages[1].content, "m2");
    }

    #[tokio::test]
    async fn session_singleton_reuses_open_session() {
        let s = store().await;
        let t1 = ctx("t1");
        let first = s.open_session(&t1, "a1", "p1").await.unwrap();
        let second = s.open_session(&t1, "a1", "p1").await.unwrap();
        assert_eq!(first.id, second.id);

        let closed = s.close_session(&t1, "a1", "p1").await.unwrap().unwrap();
        assert!(closed.closed_at.is_some());

        let third = s.open_session(&t1, "a1", "p1").await.unwrap();
        assert_ne!(third.id, first.id);
    }

    #[tokio::test]
    async fn handoff_is_consumed_at_most_once() {
        let s = store().await;
        let t1 = ctx("t1");
        s.write_handoff(&t1, "p1", "a1", "S", &["item".into()])
            .await
            .unwrap();

        let first = s.consume_handoff(&t1, "p1").await.unwrap();
        assert_eq!(first.as_ref().map(|h| h.summary.as_str()), Some("S"));
        assert!(first.unwrap().consumed_at.is_some());

        let second = s.consume_handoff(&t1, "p1").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn handoff_is_tenant_scoped() {
        let s = store().await;
        s.write_handoff(&ctx("t1"), "p1", "a1", "S", &[]).await.unwrap();
        assert!(s.consume_handoff(&ctx("t2"), "p1").await.unwrap().is_none());
        assert!(s.consume_handoff(&ctx("t1"), "p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn preferences_are_last_writer_wins() {
        let s = store().await;
        let t1 = ctx("t1");
        let mut prefs = serde_json::Map::new();
        prefs.insert("editor".into(), serde_json::json!("vim"));
        s.set_preferences(&t1, "a1", &prefs).await.unwrap();

        prefs.insert("editor".into(), serde_json::json!("helix"));
        s.set_preferences(&t1, "a1", &prefs).await.unwrap();

        let memory = s.individual_memory(&t1, "a1", 10).await.unwrap();
        assert_eq!(memory.preferences.len(), 1);
        assert_eq!(memory.preferences[0].value, serde_json::json!("helix"));
    }

    #[tokio::test]
    async fn learnings_rank_by_recency_times_confidence() {
        let s = store().await;
        let t1 = ctx("t1");
        s.record_learning(&t1, "a1", "old", "low confidence old", 0.2).await.unwrap();
        s.record_learning(&t1, "a1", "new", "high confidence new", 0.9).await.unwrap();

        let memory = s.individual_memory(&t1, "a1", 10).await.unwrap();
        assert_eq!(memory.learnings[0].context, "new");
    }

    #[tokio::test]
    async fn confidence_is_clamped_to_unit_interval() {
        let s = store().await;
        let t1 = ctx("t1");
        let l = s.record_learning(&t1, "a1", "c", "l", 7.5).await.unwrap();
        assert_eq!(l.confidence, 1.0);
        let l = s.record_learning(&t1, "a1", "c", "l", -3.0).await.unwrap();
        assert_eq!(l.confidence, 0.0);
    }

    #[tokio::test]
    async fn sweep_marks_stale_agents_offline() {
        let s = store().await;
        let t1 = ctx("t1");
        s.upsert_agent(&t1, "a1", "alpha", &[], AgentStatus::Online, &serde_json::json!({}))
            .await
            .unwrap();
        // Cutoff in the future: everything is stale.
        let n = s
            .sweep_stale_agents(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(n, 1);
        let a = s.get_agent(&t1, "a1").await.unwrap().unwrap();
        assert_eq!(a.status, AgentStatus::Offline);
    }

    #[tokio::test]
    async fn purge_handoffs_removes_only_old_unconsumed() {
        let s = store().await;
        let t1 = ctx("t1");
        s.write_handoff(&t1, "p1", "a1", "keep", &[]).await.unwrap();
        // Nothing is older than a cutoff in the past.
        assert_eq!(s.purge_handoffs(Utc::now() - chrono::Duration::days(1)).await.unwrap(), 0);
        // Everything unconsumed is older than a future cutoff.
        assert_eq!(s.purge_handoffs(Utc::now() + chrono::Duration::days(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.db");
        {
            let s = MemoryStore::open(&path).unwrap();
            s.upsert_entities(
                &ctx("t1"),
                &[EntitySpec { name: "persisted".into(), entity_type: "t".into(), observations: vec![] }],
            )
            .await
            .unwrap();
        }
        let s = MemoryStore::open(&path).unwrap();
        let graph = s.read_graph(&ctx("t1")).await.unwrap();
        assert_eq!(graph.stats.entity_count, 1);
        assert_eq!(graph.entities[0].name, "persisted");
    }

    #[tokio::test]
    async fn api_key_lookup_ignores_revoked() {
        let s = store().await;
        let id = s.insert_api_key("t1", "abc123", &[], "test").await.unwrap();
        let rec = s.lookup_api_key("abc123").await.unwrap().unwrap();
        assert_eq!(rec.id, id);
        assert_eq!(rec.tenant_id, "t1");
        assert!(s.lookup_api_key("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn membership_gates_are_exact() {
        let s = store().await;
        s.ensure_tenant("t2").await.unwrap();
        s.add_membership("t2", "user-1").await.unwrap();
        assert!(s.has_membership("t2", "user-1").await.unwrap());
        assert!(!s.has_membership("t2", "user-2").await.unwrap());
        assert!(!s.has_membership("t1", "user-1").await.unwrap());
    }
}
