use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use objstore_mgmt::cli::{Cli, Command};
use objstore_mgmt::{AdminService, ObjstoreConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(config.log_json.then(|| fmt::layer().json()))
        .with((!config.log_json).then(fmt::layer))
        .with(filter)
        .init();

    match &cli.command {
        Command::Serve => serve(config).await,
        _ => cli.run(config).await,
    }
}

async fn serve(config: ObjstoreConfig) -> Result<()> {
    tracing::info!("objstore service starting...");
    let service = Arc::new(AdminService::from_config(&config).await?);
    let scheduled = service.start();
    tracing::info!(scheduled, "replication scheduler running");

    let sweep_token = service.shutdown_token().child_token();
    let lifecycle = service.lifecycle().clone();
    let interval = Duration::from_secs(config.lifecycle.sweep_interval_secs.max(1));
    let sweep_handle = {
        let token = sweep_token.clone();
        tokio::spawn(async move { lifecycle.run(interval, token).await })
    };

    let stop = CancellationToken::new();
    let signal = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal.cancel(),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let served = objstore_mgmt::http::serve(service.clone(), config.bind_addr, async move {
        stop.cancelled().await
    })
    .await;

    tracing::info!("objstore service shutting down");
    service.shutdown().await;
    sweep_token.cancel();
    if let Err(e) = sweep_handle.await {
        tracing::error!("Lifecycle sweep task error: {}", e);
    }
    served
}
