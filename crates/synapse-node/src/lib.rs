// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The stateless HTTP front of the hub.
//!
//! Two listeners share one router and one [`AppState`](http::AppState):
//! the MCP port (`NEURAL_MCP_PORT`, default 6174) and the message-hub
//! port (`MESSAGE_HUB_PORT`, default 3004).  Identity is resolved once
//! per request by the [`auth::TenantResolver`] and injected as a
//! `RequestContext` extension; no handler ever derives a tenant from
//! anything else.

pub mod auth;
pub mod config;
pub mod http;
pub mod node;

pub use config::{load, HubConfig};
pub use node::run;
