// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent registry — the persisted agent table plus the transient
//! WebSocket connection map.
//!
//! # Backpressure
//!
//! Each live connection carries a bounded notification queue (cap 64).
//! When the queue is full the **oldest unsent** notification is dropped
//! and `missed_notifications` is incremented.  Storage stays
//! authoritative: a client that missed pushes recovers by calling
//! `get_ai_messages`.
//!
//! # Liveness
//!
//! A dropped socket is removed lazily — either the writer task unbinds on
//! write failure, or the next `push_to` finds the entry replaced.  Stale
//! *persisted* agents are flipped to `offline` by the periodic sweep; the
//! rows are never deleted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Notify;

/// Default per-connection notification queue capacity.
pub const NOTIFY_QUEUE_CAP: usize = 64;

/// One live WebSocket connection's outbound queue.
pub struct Connection {
    queue: Mutex<VecDeque<Value>>,
    notify: Notify,
    capacity: usize,
}

impl Connection {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue a notification; returns `true` when an older one had to be
    /// dropped to make room.
    fn push(&self, value: Value) -> bool {
        let mut q = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = if q.len() >= self.capacity {
            q.pop_front();
            true
        } else {
            false
        };
        q.push_back(value);
        drop(q);
        self.notify.notify_one();
        dropped
    }

    /// Wait for the next queued notification.  Used by the WS writer task.
    pub async fn next(&self) -> Value {
        loop {
            {
                let mut q = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(v) = q.pop_front() {
                    return v;
                }
            }
            self.notify.notified().await;
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Connection map keyed by `{tenant}:{agent}` — the same composite-key
/// rule as the cache, for the same reason.
pub struct AgentRegistry {
    connections: DashMap<String, Arc<Connection>>,
    missed_notifications: AtomicU64,
    queue_capacity: usize,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(NOTIFY_QUEUE_CAP)
    }
}

impl AgentRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            missed_notifications: AtomicU64::new(0),
            queue_capacity,
        }
    }

    fn key(tenant_id: &str, agent_id: &str) -> String {
        format!("{tenant_id}:{agent_id}")
    }

    /// Bind (or replace) the live connection for an agent.  The previous
    /// connection, if any, is simply dropped — its writer task will fail
    /// its next read and exit.
    pub fn bind(&self, tenant_id: &str, agent_id: &str) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(self.queue_capacity));
        self.connections
            .insert(Self::key(tenant_id, agent_id), conn.clone());
        conn
    }

    /// Remove the binding, but only if `conn` is still the current one —
    /// a reconnect may already have replaced it.
    pub fn unbind(&self, tenant_id: &str, agent_id: &str, conn: &Arc<Connection>) {
        let key = Self::key(tenant_id, agent_id);
        self.connections
            .remove_if(&key, |_, current| Arc::ptr_eq(current, conn));
    }

    /// Push a notification to an agent's live connection, if any.
    /// Returns `true` when a connection existed (delivery still
    /// best-effort beyond the queue).
    pub fn push_to(&self, tenant_id: &str, agent_id: &str, value: Value) -> bool {
        match self.connections.get(&Self::key(tenant_id, agent_id)) {
            Some(conn) => {
                if conn.push(value) {
                    self.missed_notifications.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn missed_notifications(&self) -> u64 {
        self.missed_notifications.load(Ordering::Relaxed)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
