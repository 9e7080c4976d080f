// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # chainreg Indexer Node
//!
//! Entry point for the `chainreg-node` binary. Parses CLI arguments,
//! initializes logging and metrics, connects to the chain daemon and keeps
//! the registry index in sync while serving lookups.
//!
//! Subcommands:
//!
//! - `run`     start background sync and the query API
//! - `check`   one sync pass plus a validity check, then exit
//! - `version` print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

use chainreg_protocol::daemon::{RpcDaemon, RpcDaemonConfig};
use chainreg_protocol::lookup::{LookupManager, SyncObserver};
use chainreg_protocol::storage::RegistryDb;

use cli::{ChainregCli, Commands, DaemonArgs};
use logging::LogFormat;
use metrics::IndexerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ChainregCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Check(args) => check_once(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Builds the daemon client and the manager, restoring a snapshot from the
/// data directory when one is configured.
fn build_manager(args: &DaemonArgs, observer: Arc<dyn SyncObserver>) -> Result<LookupManager> {
    let mut config = RpcDaemonConfig::new(&args.daemon_url);
    if let Some(user) = &args.rpc_user {
        config = config.with_auth(user, args.rpc_password.clone().unwrap_or_default());
    }
    let daemon = RpcDaemon::new(config)
        .with_context(|| format!("failed to create daemon client for {}", args.daemon_url))?;

    let manager =
        LookupManager::new(Arc::new(daemon), args.network.params()).with_observer(observer);

    let Some(data_dir) = &args.data_dir else {
        tracing::info!("no data directory configured, index is memory-only");
        return Ok(manager);
    };

    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let store = RegistryDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "snapshot store opened");

    manager
        .with_store(store)
        .context("failed to restore index snapshot")
}

/// Rebuilds the index if a restored snapshot no longer matches the chain.
async fn verify_restored(manager: &LookupManager) -> Result<()> {
    if manager.status().await.indexed_blocks == 0 {
        return Ok(());
    }

    let valid = manager
        .check_validity()
        .await
        .context("failed to verify restored snapshot against the daemon")?;
    if !valid {
        tracing::warn!("restored snapshot is not on the daemon's chain, rebuilding");
        manager
            .rebuild_lookup()
            .await
            .context("failed to rebuild index")?;
    }
    Ok(())
}

/// Starts background sync, the API server and the metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.daemon.log_format),
    );

    tracing::info!(
        network = %args.daemon.network,
        daemon = %args.daemon.daemon_url,
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        "starting chainreg-node"
    );

    // --- Metrics ---
    let indexer_metrics = Arc::new(IndexerMetrics::new());

    // --- Manager ---
    let mut manager = build_manager(&args.daemon, indexer_metrics.clone())?;
    if let Some(ms) = args.sync_interval_ms {
        manager = manager.with_sync_interval(Duration::from_millis(ms));
    }
    let manager = Arc::new(manager);
    verify_restored(&manager).await?;

    // --- Background sync ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_manager = Arc::clone(&manager);
    let sync_rx = shutdown_rx.clone();
    let sync_loop = tokio::spawn(async move { sync_manager.run(sync_rx).await });

    // --- Application state ---
    let shutdown_tx = Arc::new(shutdown_tx);
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        manager: Arc::clone(&manager),
        metrics: Arc::clone(&indexer_metrics),
        shutdown_tx: Arc::clone(&shutdown_tx),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = metrics::metrics_router(Arc::clone(&indexer_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    let mut rpc_shutdown = shutdown_rx;
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = rpc_shutdown.wait_for(|stop| *stop) => {
            tracing::info!("shutdown requested over rpc");
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    // Let a pass in flight finish so its progress is persisted.
    manager.shutdown();
    shutdown_tx.send_replace(true);
    if let Err(e) = sync_loop.await {
        tracing::error!("sync loop task failed: {}", e);
    }

    tracing::info!("chainreg-node stopped");
    Ok(())
}

/// One sync pass against the daemon followed by a validity check.
async fn check_once(args: cli::CheckArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.daemon.log_format),
    );

    let indexer_metrics = Arc::new(IndexerMetrics::new());
    let manager = build_manager(&args.daemon, indexer_metrics.clone())?;
    verify_restored(&manager).await?;

    let advanced = manager
        .update_lookup()
        .await
        .context("sync pass failed")?;
    let valid = manager
        .check_validity()
        .await
        .context("validity check failed")?;
    let status = manager.status().await;

    println!("Registry index summary");
    println!("  Network        : {}", status.network);
    println!("  Indexed height : {}", status.height);
    println!("  Entries        : {}", status.entries);
    println!("  Blocks applied : {}", indexer_metrics.blocks_indexed_total.get());
    println!("  Advanced       : {}", advanced);
    println!("  Valid          : {}", valid);

    if !valid {
        anyhow::bail!("index does not match the daemon's chain; run a rebuild");
    }
    Ok(())
}

fn print_version() {
    println!("chainreg-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc         {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// If a handler cannot be installed that branch never resolves.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
