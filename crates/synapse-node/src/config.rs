// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Hub configuration: YAML layers, deep-merged, then environment
//! overrides.
//!
//! Search order (later overrides earlier):
//! 1. `/etc/synapse/hub.yaml`
//! 2. `~/.config/synapse/hub.yaml`
//! 3. `.synapse/hub.yaml` (workspace-local)
//! 4. Path given to [`load`] explicitly.
//! 5. Environment variables (always last — deploys pass secrets via env,
//!    never via files in source control).
//!
//! | Variable                 | Field                              |
//! |--------------------------|------------------------------------|
//! | `API_KEY`                | `auth.api_key` (bootstrap key)     |
//! | `JWT_SECRET`             | `auth.jwt_secret`                  |
//! | `NEURAL_MCP_PORT`        | `http.mcp_port` (default 6174)     |
//! | `MESSAGE_HUB_PORT`       | `http.message_hub_port` (3004)     |
//! | `REQUEST_TIMEOUT_MS`     | `http.request_timeout_ms` (30000)  |
//! | `RATE_LIMIT_RPS`         | `http.rate_limit_rps` (20)         |
//! | `RATE_LIMIT_BURST`       | `http.rate_limit_burst` (60)       |
//! | `VECTOR_STORE_URL`       | `storage.vector_store_url`         |
//! | `ENABLE_ADVANCED_MEMORY` | `storage.enable_advanced_memory`   |
//! | `HANDOFF_RETENTION_DAYS` | `storage.handoff_retention_days`   |
//! | `SLACK_WEBHOOK_URL`      | `slack.webhook_url`                |

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Top-level hub configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub slack: SlackConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind host for both listeners. Default: loopback only.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// MCP JSON-RPC port.
    #[serde(default = "default_mcp_port")]
    pub mcp_port: u16,

    /// REST message-hub port.
    #[serde(default = "default_hub_port")]
    pub message_hub_port: u16,

    /// Per-request deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Token-bucket refill rate per API key, requests per second.
    #[serde(default = "default_rps")]
    pub rate_limit_rps: u32,

    /// Token-bucket burst per API key.
    #[serde(default = "default_burst")]
    pub rate_limit_burst: u32,

    /// Maximum request body size in bytes (default: 2 MiB).
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}
fn default_mcp_port() -> u16 {
    6174
}
fn default_hub_port() -> u16 {
    3004
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_rps() -> u32 {
    20
}
fn default_burst() -> u32 {
    60
}
fn default_max_body() -> usize {
    2 * 1024 * 1024
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            mcp_port: default_mcp_port(),
            message_hub_port: default_hub_port(),
            request_timeout_ms: default_timeout_ms(),
            rate_limit_rps: default_rps(),
            rate_limit_burst: default_burst(),
            max_body_bytes: default_max_body(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path.  `:memory:` (or `--ephemeral`) for tests.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Vector sidecar base URL; absence disables semantic search.
    pub vector_store_url: Option<String>,

    /// Gate for the WARM/COLD context tiers.
    #[serde(default = "default_true")]
    pub enable_advanced_memory: bool,

    /// Cache entry TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Unconsumed handoffs older than this are purged.
    #[serde(default = "default_retention")]
    pub handoff_retention_days: u32,

    /// Agents silent for this long flip to offline.
    #[serde(default = "default_offline_ttl")]
    pub agent_offline_ttl_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".synapse/hub.db")
}
fn default_true() -> bool {
    true
}
fn default_cache_ttl() -> u64 {
    30
}
fn default_retention() -> u32 {
    90
}
fn default_offline_ttl() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            vector_store_url: None,
            enable_advanced_memory: true,
            cache_ttl_secs: default_cache_ttl(),
            handoff_retention_days: default_retention(),
            agent_offline_ttl_secs: default_offline_ttl(),
        }
    }
}

/// Authentication configuration.  Secrets arrive via environment, never
/// from files in source control.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bootstrap API key (`API_KEY`).  Resolves to `default_tenant` with
    /// full scope.  Optional — production deploys mint per-tenant keys
    /// with `synapse mint-key` instead.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// HS256 secret for signed identity tokens (`JWT_SECRET`).  Unset
    /// disables the JWT mode entirely.
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,

    /// Tenant the bootstrap key resolves to.
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
}

fn default_tenant() -> String {
    "default".to_string()
}

/// Slack notification configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Incoming-webhook URL; absence disables notifications.
    #[serde(skip_serializing)]
    pub webhook_url: Option<String>,
}

// ── Loader ────────────────────────────────────────────────────────────────────

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    paths.push(PathBuf::from("/etc/synapse/hub.yaml"));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/synapse/hub.yaml"));
    }
    paths.push(PathBuf::from(".synapse/hub.yaml"));
    paths
}

pub fn load(extra: Option<&Path>) -> anyhow::Result<HubConfig> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading hub config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit hub config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: HubConfig = if matches!(&merged, serde_yaml::Value::Mapping(m) if m.is_empty())
    {
        HubConfig::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

/// Apply environment overrides.  The variable source is injected so
/// tests never mutate process environment.
pub fn apply_env_overrides(
    config: &mut HubConfig,
    var: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = var("API_KEY") {
        config.auth.api_key = Some(v);
    }
    if let Some(v) = var("JWT_SECRET") {
        config.auth.jwt_secret = Some(v);
    }
    if let Some(v) = var("NEURAL_MCP_PORT").and_then(|v| v.parse().ok()) {
        config.http.mcp_port = v;
    }
    if let Some(v) = var("MESSAGE_HUB_PORT").and_then(|v| v.parse().ok()) {
        config.http.message_hub_port = v;
    }
    if let Some(v) = var("REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.http.request_timeout_ms = v;
    }
    if let Some(v) = var("RATE_LIMIT_RPS").and_then(|v| v.parse().ok()) {
        config.http.rate_limit_rps = v;
    }
    if let Some(v) = var("RATE_LIMIT_BURST").and_then(|v| v.parse().ok()) {
        config.http.rate_limit_burst = v;
    }
    if let Some(v) = var("VECTOR_STORE_URL") {
        config.storage.vector_store_url = if v.is_empty() { None } else { Some(v) };
    }
    if let Some(v) = var("ENABLE_ADVANCED_MEMORY") {
        config.storage.enable_advanced_memory =
            matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
    }
    if let Some(v) = var("HANDOFF_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
        config.storage.handoff_retention_days = v;
    }
    if let Some(v) = var("SLACK_WEBHOOK_URL") {
        config.slack.webhook_url = if v.is_empty() { None } else { Some(v) };
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
