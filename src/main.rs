// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = synapse_node::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { ephemeral } => {
            if ephemeral {
                config.storage.db_path = ":memory:".into();
            }
            synapse_node::run(config).await
        }
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::MintKey { tenant, scope, label } => mint_key(config, tenant, scope, label).await,
    }
}

/// Mint a tenant API key directly against the configured database.
///
/// Runs offline — the hub does not have to be up.  The raw key is shown
/// exactly once; only its SHA-256 digest lands in the key table.
async fn mint_key(
    config: synapse_node::HubConfig,
    tenant: String,
    scopes: Vec<String>,
    label: String,
) -> anyhow::Result<()> {
    use synapse_node::auth::{api_key_digest, generate_api_key};
    use synapse_store::MemoryStore;

    if let Some(parent) = config.storage.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let store = MemoryStore::open(&config.storage.db_path)
        .map_err(|e| anyhow::anyhow!("opening {}: {e}", config.storage.db_path.display()))?;

    let raw = generate_api_key();
    let key_id = store
        .insert_api_key(&tenant, &api_key_digest(&raw), &scopes, &label)
        .await
        .map_err(|e| anyhow::anyhow!("storing key: {e}"))?;

    println!("API key for tenant `{tenant}` (shown once — save it now!):");
    println!("  {raw}");
    println!();
    println!("  key id: {key_id}");
    if scopes.is_empty() {
        println!("  scopes: (full access)");
    } else {
        println!("  scopes: {}", scopes.join(", "));
    }
    println!();
    println!("Usage:  X-API-Key: {raw}");
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
