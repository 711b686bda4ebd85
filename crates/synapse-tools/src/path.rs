// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `translate_path` — map absolute paths between agent environments.
//!
//! IDE clients on Windows, their WSL shells, and containerized workers
//! all name the same file differently.  This tool is a pure string
//! mapping (no filesystem access):
//!
//! | Source              | windows          | wsl               | container*            |
//! |---------------------|------------------|-------------------|-----------------------|
//! | `C:\work\x`         | unchanged        | `/mnt/c/work/x`   | `/workspace/work/x`   |
//! | `/mnt/c/work/x`     | `C:\work\x`      | unchanged         | `/workspace/work/x`   |
//! | `/home/dev/x`       | not mappable     | unchanged         | `/workspace/home/dev/x` |
//!
//! *container root defaults to `/workspace`, overridable per call.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use synapse_core::{HubError, RequestContext, ToolGroup};

use crate::{parse_args, Tool};

pub struct TranslatePathTool;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateArgs {
    path: String,
    /// `windows`, `wsl`, or `container`.
    target: String,
    #[serde(default = "default_container_root")]
    container_root: String,
}

fn default_container_root() -> String {
    "/workspace".to_string()
}

#[async_trait]
impl Tool for TranslatePathTool {
    fn name(&self) -> &str {
        "translate_path"
    }
    fn description(&self) -> &str {
        "Translate an absolute path between agent environments (windows, \
         wsl, container). Pure string mapping; no filesystem access."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "target": { "type": "string", "enum": ["windows", "wsl", "container"] },
                "containerRoot": { "type": "string" }
            },
            "required": ["path", "target"]
        })
    }
    fn group(&self) -> ToolGroup {
        ToolGroup::Util
    }
    async fn call(&self, _ctx: &RequestContext, args: Value) -> Result<Value, HubError> {
        let args: TranslateArgs = parse_args(args)?;
        let translated = match args.target.as_str() {
            "windows" => to_windows(&args.path)?,
            "wsl" => to_wsl(&args.path),
            "container" => to_container(&args.path, &args.container_root),
            other => {
                return Err(HubError::invalid_arg(
                    "target",
                    format!("unknown target `{other}`"),
                ))
            }
        };
        Ok(json!({
            "original": args.path,
            "translated": translated,
            "target": args.target,
        }))
    }
}

/// `C:\x` / `C:/x` → `('c', "x")`; anything else is not a Windows path.
fn split_windows(path: &str) -> Option<(char, &str)> {
    let mut chars = path.chars();
    let drive = chars.next()?;
    if !drive.is_ascii_alphabetic() || chars.next()? != ':' {
        return None;
    }
    let rest = &path[2..];
    let rest = rest.trim_start_matches(['\\', '/']);
    Some((drive.to_ascii_lowercase(), rest))
}

/// `/mnt/c/x` → `('c', "x")`.
fn split_wsl(path: &str) -> Option<(char, &str)> {
    let rest = path.strip_prefix("/mnt/")?;
    let mut chars = rest.chars();
    let drive = chars.next()?;
    if !drive.is_ascii_alphabetic() {
        return None;
    }
    match chars.next() {
        None => Some((drive, "")),
        Some('/') => Some((drive, &rest[2..])),
        Some(_) => None,
    }
}

fn to_wsl(path: &str) -> String {
    match split_windows(path) {
        Some((drive, rest)) => {
            let rest = rest.replace('\\', "/");
            if rest.is_empty() {
                format!("/mnt/{drive}")
            } else {
                format!("/mnt/{drive}/{rest}")
            }
        }
        None => path.to_string(),
    }
}

fn to_windows(path: &str) -> Result<String, HubError> {
    if split_windows(path).is_some() {
        return Ok(path.to_string());
    }
    match split_wsl(path) {
        Some((drive, rest)) => {
            let drive = drive.to_ascii_uppercase();
            let rest = rest.replace('/', "\\");
            if rest.is_empty() {
                Ok(format!("{drive}:\\"))
            } else {
                Ok(format!("{drive}:\\{rest}"))
            }
        }
        None => Err(HubError::invalid_arg(
            "path",
            "POSIX path outside /mnt/<drive> has no Windows equivalent",
        )),
    }
}

fn to_container(path: &str, container_root: &str) -> String {
    let root = container_root.trim_end_matches('/');
    let tail = if let Some((_, rest)) = split_windows(path) {
        rest.replace('\\', "/")
    } else if let Some((_, rest)) = split_wsl(path) {
        rest.to_string()
    } else {
        path.trim_start_matches('/').to_string()
    };
    if tail.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{tail}")
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
