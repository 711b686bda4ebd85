// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool registry and dispatch.
//!
//! Dispatch order for `tools/call`:
//!
//! 1. look up the named tool (`NotFound` for unknown names),
//! 2. check the caller's scope against the tool's group (`Forbidden`),
//! 3. normalize legacy wire aliases (`agentId → to`, `message → content`
//!    on the send path),
//! 4. validate required fields and top-level types against the tool's
//!    declared schema (`InvalidArgument` with a field path),
//! 5. invoke the handler.
//!
//! The handler's own serde parse is a second, stricter net; the schema
//! pass exists so the error names the *field*, not a serde internals
//! message, for the common misuse cases.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use synapse_core::{HubError, RequestContext};
use synapse_hub::Hub;

use crate::{agents, graph, memory, messaging, path, sessions, Tool};

/// Every tool the hub exposes, sorted, for deterministic `tools/list`.
pub const TOOL_NAMES: &[&str] = &[
    "add_observations",
    "begin_session",
    "create_entities",
    "create_relations",
    "end_session",
    "get_agent_context",
    "get_agent_status",
    "get_ai_messages",
    "get_individual_memory",
    "read_graph",
    "record_learning",
    "register_agent",
    "search_entities",
    "search_nodes",
    "send_ai_message",
    "set_agent_identity",
    "set_preferences",
    "translate_path",
];

/// A tool schema as listed by `tools/list`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Validate and execute one tool call.
    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        name: &str,
        args: Value,
    ) -> Result<Value, HubError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| HubError::not_found(format!("tool `{name}`")))?;

        if !ctx.allows(tool.group()) {
            return Err(HubError::Forbidden(format!(
                "scope `{}` required for `{name}`",
                tool.group().as_str()
            )));
        }

        let args = normalize_aliases(name, args);
        validate_against_schema(&tool.input_schema(), &args)?;

        debug!(
            tenant = %ctx.tenant_id,
            correlation = %ctx.correlation_id,
            tool = %name,
            "dispatching tool call"
        );
        tool.call(ctx, args).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the full hub registry.
pub fn default_registry(hub: Arc<Hub>) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(graph::CreateEntitiesTool { hub: hub.clone() });
    reg.register(graph::AddObservationsTool { hub: hub.clone() });
    reg.register(graph::CreateRelationsTool { hub: hub.clone() });
    reg.register(graph::ReadGraphTool { hub: hub.clone() });
    reg.register(graph::SearchEntitiesTool { hub: hub.clone() });
    reg.register(graph::SearchNodesTool { hub: hub.clone() });
    reg.register(messaging::SendAiMessageTool { hub: hub.clone() });
    reg.register(messaging::GetAiMessagesTool { hub: hub.clone() });
    reg.register(agents::RegisterAgentTool { hub: hub.clone() });
    reg.register(agents::SetAgentIdentityTool { hub: hub.clone() });
    reg.register(agents::GetAgentStatusTool { hub: hub.clone() });
    reg.register(memory::RecordLearningTool { hub: hub.clone() });
    reg.register(memory::SetPreferencesTool { hub: hub.clone() });
    reg.register(memory::GetIndividualMemoryTool { hub: hub.clone() });
    reg.register(sessions::BeginSessionTool { hub: hub.clone() });
    reg.register(sessions::EndSessionTool { hub: hub.clone() });
    reg.register(sessions::GetAgentContextTool { hub });
    reg.register(path::TranslatePathTool);
    reg
}

// ── Alias normalization ───────────────────────────────────────────────────────

/// Legacy wire aliases accepted for backward compatibility.  Applied only
/// where the legacy field does not collide with a real one —
/// `get_ai_messages` genuinely takes `agentId`.
fn normalize_aliases(tool_name: &str, mut args: Value) -> Value {
    if tool_name != "send_ai_message" {
        return args;
    }
    if let Some(obj) = args.as_object_mut() {
        if !obj.contains_key("to") {
            if let Some(v) = obj.remove("agentId") {
                obj.insert("to".to_string(), v);
            }
        }
        if !obj.contains_key("content") {
            if let Some(v) = obj.remove("message") {
                obj.insert("content".to_string(), v);
            }
        }
    }
    args
}

// ── Schema validation ─────────────────────────────────────────────────────────

/// Check `required` fields and top-level property types against a tool's
/// declared JSON Schema.  Deliberately shallow — the typed serde parse in
/// the handler is the full check; this pass produces field-path errors.
fn validate_against_schema(schema: &Value, args: &Value) -> Result<(), HubError> {
    let Some(obj) = args.as_object() else {
        return Err(HubError::invalid_arg("arguments", "must be a JSON object"));
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(field) {
                return Err(HubError::invalid_arg(field, "required field is missing"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (field, prop) in props {
            let Some(value) = obj.get(field) else { continue };
            if value.is_null() {
                continue;
            }
            let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "boolean" => value.is_boolean(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(HubError::invalid_arg(
                    field,
                    format!("expected {expected}"),
                ));
            }
        }
    }
    Ok(())
}

// ── Unit tests ────────────────────────────────────────────────────────────────
