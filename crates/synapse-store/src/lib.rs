// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tenant-scoped persistence.
//!
//! # Layering
//!
//! ```text
//! MemoryStore (SQLite, authoritative)
//!     │  every query carries `tenant_id = ?`
//!     ├── search::search_entities()   exact / graph in SQL,
//!     │                               semantic via the vector sidecar
//!     ├── VectorStore (optional)      advisory re-ranker, never authoritative
//!     └── TtlCache                    composite keys `{tenant}:{agent}:{kind}`
//! ```
//!
//! The SQLite database is the single source of truth.  The vector sidecar
//! is consulted opportunistically: its results are intersected with
//! tenant-scoped rows before anything is returned, and any sidecar failure
//! degrades the search instead of failing the request.
//!
//! # Concurrency
//!
//! One `rusqlite::Connection` behind a `tokio::sync::Mutex`.  Every
//! operation is a short transaction (single-digit milliseconds); the hub's
//! throughput ceiling is the network, not this lock.  WAL mode keeps
//! readers from blocking the writer across processes (backup tooling).

pub mod cache;
pub mod schema;
pub mod search;
pub mod store;
pub mod vector;

pub use cache::TtlCache;
pub use store::{ApiKeyRecord, ListMessageOpts, MemoryStore};
pub use vector::{HttpVectorStore, StaticVectorStore, VectorMatch, VectorStore};
