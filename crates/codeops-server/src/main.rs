//! CodeOps Vault server binary
//!
//! Wires configuration, the crypto engine, the in-memory store and every
//! core service behind the HTTP surface, and runs the two periodic
//! schedulers on their own tasks.

use std::path::PathBuf;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use codeops_core::config::VaultConfig;
use codeops_core::scheduler;
use codeops_server::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "codeops-vault")]
#[command(about = "Team-scoped secrets management service")]
struct Args {
    /// Path to a TOML configuration file. Environment variables
    /// (CODEOPS_VAULT_*) override file values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = VaultConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    config.validate()?;

    let state = AppState::build(&config)?;

    let schedulers = scheduler::start(state.rotation.clone(), state.leases.clone(), &config);

    let app = router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "codeops-vault listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handles) = schedulers {
        handles.shutdown();
    }
    info!("codeops-vault stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
