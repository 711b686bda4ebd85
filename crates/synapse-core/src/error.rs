// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The closed set of error kinds that cross the trust boundary.
//!
//! Every error carries a stable machine-readable kind (for automation —
//! surfaced as the `X-Mcp-Error-Kind` header on the MCP wire) and a
//! free-form human message.  Nothing else leaves the process: no stack
//! traces, no SQL, no internal paths.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// Schema violation or missing required field.  `path` is the JSON
    /// field path the client has to fix.  Not retriable.
    #[error("invalid argument at `{path}`: {message}")]
    InvalidArgument { path: String, message: String },

    /// Missing or invalid credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// JWT organization claim does not name a provisioned tenant.
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    /// The credential is valid but its scopes do not cover the tool.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Named entity, agent, session, or handoff absent in this tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// Deliberate-create hit an existing row, or a refused state change.
    #[error("conflict: {0}")]
    Conflict(String),

    /// `send_message` recipient resolution yielded the empty set.
    #[error("no recipient matched the selector")]
    NoRecipient,

    /// Token bucket empty for this API key.
    #[error("rate limited")]
    RateLimited,

    /// Primary store transient failure.  Retriable; every operation in
    /// the store is idempotent or upsert-shaped, so retries are safe.
    #[error("storage error: {0}")]
    Storage(String),

    /// Non-fatal capability loss (semantic search without a vector
    /// store).  Callers continue; the result carries `mode_used`.
    #[error("degraded capability: {0}")]
    Degraded(String),
}

impl HubError {
    /// Stable kind string for automation.
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::InvalidArgument { .. } => "InvalidArgument",
            HubError::Unauthorized(_) => "Unauthorized",
            HubError::UnknownTenant(_) => "UnknownTenant",
            HubError::Forbidden(_) => "Forbidden",
            HubError::NotFound(_) => "NotFound",
            HubError::Conflict(_) => "Conflict",
            HubError::NoRecipient => "NoRecipient",
            HubError::RateLimited => "RateLimited",
            HubError::Storage(_) => "StorageError",
            HubError::Degraded(_) => "DegradedCapability",
        }
    }

    /// HTTP status the REST surface maps this kind onto.
    pub fn http_status(&self) -> u16 {
        match self {
            HubError::InvalidArgument { .. } => 400,
            HubError::Unauthorized(_) => 401,
            HubError::UnknownTenant(_) => 401,
            HubError::Forbidden(_) => 403,
            HubError::NotFound(_) => 404,
            HubError::Conflict(_) => 409,
            HubError::NoRecipient => 422,
            HubError::RateLimited => 429,
            HubError::Storage(_) => 500,
            HubError::Degraded(_) => 200,
        }
    }

    /// Shorthand for the most common construction.
    pub fn invalid_arg(path: impl Into<String>, message: impl Into<String>) -> Self {
        HubError::InvalidArgument {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        HubError::Storage(err.to_string())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        HubError::NotFound(what.into())
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
