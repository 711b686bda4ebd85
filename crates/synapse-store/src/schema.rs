// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! SQLite schema — one table per record type, every table keyed by a
//! leading `tenant_id`.
//!
//! Timestamps are RFC 3339 TEXT (lexicographic order equals chronological
//! order).  List fields (`capabilities`, `open_items`, `scopes`) and
//! `metadata` are JSON TEXT.  Uniqueness constraints carry the
//! interesting semantics directly:
//!
//! * `entities(tenant_id, entity_type, name)` unique — idempotent upsert
//! * `relations(tenant_id, from_entity_id, to_entity_id, relation_type)`
//!   unique — idempotent edge creation
//! * `sessions` partial unique index on open rows — session singleton
//! * handoff consumption is a conditional `UPDATE … WHERE consumed_at IS
//!   NULL RETURNING`, so at-most-once holds under concurrent consumers

use rusqlite::Connection;

/// Full DDL, idempotent (`IF NOT EXISTS` throughout).
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id          TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL REFERENCES tenants(id),
    key_hash    TEXT NOT NULL UNIQUE,
    scopes      TEXT NOT NULL DEFAULT '[]',
    label       TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL,
    revoked     INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_api_keys_tenant ON api_keys(tenant_id);

CREATE TABLE IF NOT EXISTS tenant_members (
    tenant_id   TEXT NOT NULL REFERENCES tenants(id),
    principal   TEXT NOT NULL,
    PRIMARY KEY (tenant_id, principal)
);

CREATE TABLE IF NOT EXISTS entities (
    id          TEXT NOT NULL,
    tenant_id   TEXT NOT NULL,
    name        TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (tenant_id, id),
    UNIQUE (tenant_id, entity_type, name)
);
CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(tenant_id, name);

CREATE TABLE IF NOT EXISTS observations (
    id          TEXT NOT NULL,
    tenant_id   TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (tenant_id, id)
);
CREATE INDEX IF NOT EXISTS idx_observations_entity ON observations(tenant_id, entity_id);

CREATE TABLE IF NOT EXISTS relations (
    id             TEXT NOT NULL,
    tenant_id      TEXT NOT NULL,
    from_entity_id TEXT NOT NULL,
    to_entity_id   TEXT NOT NULL,
    relation_type  TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    PRIMARY KEY (tenant_id, id),
    UNIQUE (tenant_id, from_entity_id, to_entity_id, relation_type)
);
CREATE INDEX IF NOT EXISTS idx_relations_from ON relations(tenant_id, from_entity_id);

CREATE TABLE IF NOT EXISTS agents (
    id           TEXT NOT NULL,
    tenant_id    TEXT NOT NULL,
    name         TEXT NOT NULL,
    capabilities TEXT NOT NULL DEFAULT '[]',
    status       TEXT NOT NULL DEFAULT 'online',
    last_seen    TEXT NOT NULL,
    metadata     TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (tenant_id, id)
);

CREATE TABLE IF NOT EXISTS messages (
    id           TEXT NOT NULL,
    tenant_id    TEXT NOT NULL,
    from_agent   TEXT NOT NULL,
    to_agent     TEXT NOT NULL,
    content      TEXT NOT NULL,
    message_type TEXT NOT NULL DEFAULT 'info',
    priority     TEXT NOT NULL DEFAULT 'normal',
    created_at   TEXT NOT NULL,
    read_at      TEXT,
    PRIMARY KEY (tenant_id, id)
);
CREATE INDEX IF NOT EXISTS idx_messages_inbox
    ON messages(tenant_id, to_agent, created_at, id);

CREATE TABLE IF NOT EXISTS learnings (
    id          TEXT NOT NULL,
    tenant_id   TEXT NOT NULL,
    agent_id    TEXT NOT NULL,
    context     TEXT NOT NULL,
    lesson      TEXT NOT NULL,
    confidence  REAL NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (tenant_id, id)
);
CREATE INDEX IF NOT EXISTS idx_learnings_agent ON learnings(tenant_id, agent_id, created_at);

CREATE TABLE IF NOT EXISTS preferences (
    tenant_id   TEXT NOT NULL,
    agent_id    TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (tenant_id, agent_id, key)
);

CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT NOT NULL,
    tenant_id   TEXT NOT NULL,
    agent_id    TEXT NOT NULL,
    project_id  TEXT NOT NULL,
    opened_at   TEXT NOT NULL,
    closed_at   TEXT,
    PRIMARY KEY (tenant_id, id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_singleton
    ON sessions(tenant_id, agent_id, project_id) WHERE closed_at IS NULL;

CREATE TABLE IF NOT EXISTS handoffs (
    id               TEXT NOT NULL,
    tenant_id        TEXT NOT NULL,
    project_id       TEXT NOT NULL,
    author_agent_id  TEXT NOT NULL,
    summary          TEXT NOT NULL,
    open_items       TEXT NOT NULL DEFAULT '[]',
    created_at       TEXT NOT NULL,
    consumed_at      TEXT,
    PRIMARY KEY (tenant_id, id)
);
CREATE INDEX IF NOT EXISTS idx_handoffs_project
    ON handoffs(tenant_id, project_id, created_at);
"#;

/// Apply pragmas and the schema to a fresh or existing connection.
pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    // journal_mode returns the resulting mode as a row ("wal", or
    // "memory" for in-memory databases) — read and discard it.
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;
    conn.execute_batch(SCHEMA)
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_cleanly_in_memory() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        // Applying twice must be a no-op.
        initialize(&conn).unwrap();
    }

    #[test]
    fn entity_uniqueness_is_per_tenant() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let insert = "INSERT INTO entities (id, tenant_id, name, entity_type, created_at, updated_at)
                      VALUES (?1, ?2, ?3, ?4, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')";
        conn.execute(insert, ("e1", "t1", "A", "test")).unwrap();
        // Same (type, name) in a different tenant is fine.
        conn.execute(insert, ("e2", "t2", "A", "test")).unwrap();
        // Same (type, name) in the same tenant violates the constraint.
        let err = conn.execute(insert, ("e3", "t1", "A", "test"));
        assert!(err.is_err());
    }

    #[test]
    fn open_session_singleton_allows_closed_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let insert = "INSERT INTO sessions (id, tenant_id, agent_id, project_id, opened_at, closed_at)
                      VALUES (?1, 't1', 'a1', 'p1', '2026-01-01T00:00:00Z', ?2)";
        conn.execute(insert, ("s1", Some("2026-01-01T01:00:00Z"))).unwrap();
        conn.execute(insert, ("s2", Option::<&str>::None)).unwrap();
        // A second OPEN session for the same triple is refused.
        let err = conn.execute(insert, ("s3", Option::<&str>::None));
        assert!(err.is_err());
    }
}
