// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The MCP tool surface.
//!
//! Every operation a client can invoke through `tools/call` lives here as
//! a [`Tool`] implementation holding an `Arc<Hub>`.  The
//! [`ToolRegistry`] maps names to handlers, validates arguments against
//! each tool's declared schema, normalizes legacy wire aliases, and
//! enforces scope groups — so individual tools only ever see well-formed,
//! authorized input.
//!
//! Tool families:
//!
//! * knowledge graph — `create_entities`, `add_observations`,
//!   `create_relations`, `read_graph`, `search_entities`
//!   (+ deprecated alias `search_nodes`)
//! * messaging — `send_ai_message`, `get_ai_messages`
//! * agents — `register_agent`, `set_agent_identity`, `get_agent_status`
//! * individual memory — `record_learning`, `set_preferences`,
//!   `get_individual_memory`
//! * sessions — `begin_session`, `end_session`, `get_agent_context`
//! * utilities — `translate_path`

pub mod agents;
pub mod graph;
pub mod memory;
pub mod messaging;
pub mod path;
pub mod registry;
pub mod sessions;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use synapse_core::{HubError, RequestContext, ToolGroup};

pub use registry::{default_registry, ToolRegistry, ToolSchema, TOOL_NAMES};

/// Trait every hub tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn input_schema(&self) -> Value;
    /// Scope group this tool belongs to.
    fn group(&self) -> ToolGroup;
    /// Execute with validated arguments.  The returned value is the
    /// structured result the dispatcher wraps for the wire.
    async fn call(&self, ctx: &RequestContext, args: Value) -> Result<Value, HubError>;
}

/// Parse a tool's argument object into its typed shape, mapping serde
/// failures onto `InvalidArgument` (serde's message names the field).
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, HubError> {
    serde_json::from_value(args).map_err(|e| HubError::invalid_arg("arguments", e.to_string()))
}

/// JSON-encode a serializable result; encoding failure is a storage-class
/// internal error, never a panic.
pub(crate) fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, HubError> {
    serde_json::to_value(value).map_err(HubError::storage)
}
