// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-tenant AI-agent collaboration hub.
#[derive(Parser, Debug)]
#[command(name = "synapse", version, about)]
pub struct Cli {
    /// Path to an explicit hub config file (merged over the defaults).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging to stderr (same as RUST_LOG=debug).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the hub (MCP + message-hub HTTP listeners, WebSocket).
    ///
    /// Reads config layers from /etc/synapse/hub.yaml,
    /// ~/.config/synapse/hub.yaml and .synapse/hub.yaml, then applies
    /// environment overrides (API_KEY, NEURAL_MCP_PORT, …).
    Serve {
        /// Use an in-memory database (state is lost on exit).
        #[arg(long)]
        ephemeral: bool,
    },

    /// Print the effective configuration (secrets redacted) and exit.
    ShowConfig,

    /// Mint a tenant API key.
    ///
    /// The raw key is printed once — only its SHA-256 digest is stored.
    MintKey {
        /// Tenant the key resolves to (created if absent).
        #[arg(long, short = 't')]
        tenant: String,

        /// Scope groups granted to the key (repeatable).  Empty means
        /// full access.
        #[arg(long, short = 's')]
        scope: Vec<String>,

        /// Human-readable label for audits.
        #[arg(long, short = 'l', default_value = "")]
        label: String,
    },
}
