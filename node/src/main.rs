// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tribune Claim Node
//!
//! Entry point for the `tribune-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores or creates the ledger, and
//! serves the REST/WebSocket API.
//!
//! - `run`     start the node
//! - `inspect` print the ledger held in a data directory
//! - `version` print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use tribune_contracts::ClaimHandler;
use tribune_protocol::access::AdminRegistry;
use tribune_protocol::config::{EVENT_CHANNEL_CAPACITY, PROTOCOL_VERSION};
use tribune_protocol::token::InMemoryToken;

use cli::{Commands, TribuneNodeCli};
use metrics::NodeMetrics;
use state::{LedgerClock, LedgerStore, NodeLedger};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TribuneNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Inspect(args) => inspect(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the API server and the metrics endpoint, and runs until a
/// shutdown signal arrives.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, args.log_format);

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = ?args.data_dir,
        "starting tribune-node"
    );

    // --- Ledger ---
    let store = match &args.data_dir {
        Some(dir) => Some(
            LedgerStore::open(dir)
                .with_context(|| format!("failed to open ledger store at {}", dir.display()))?,
        ),
        None => None,
    };
    let restored = match &store {
        Some(store) => store.load().context("failed to load stored ledger")?,
        None => None,
    };
    let (ledger, clock) = match restored {
        Some(stored) => {
            tracing::info!(
                claims = stored.ledger.claims_count(),
                custody_held = stored.ledger.custody_held(),
                saved_at = %stored.saved_at,
                "ledger restored from store"
            );
            (stored.ledger, LedgerClock::resume(stored.saved_at))
        }
        None => {
            let ledger = fresh_ledger(&args)?;
            let mut clock = LedgerClock::new();
            if let Some(store) = &store {
                store
                    .persist_all(&ledger, clock.now())
                    .context("failed to persist fresh ledger")?;
                store.flush().await.context("failed to flush fresh ledger")?;
            }
            (ledger, clock)
        }
    };

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);
    node_metrics.observe_ledger(ledger.claims_count(), ledger.custody_held());

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            PROTOCOL_VERSION,
        ),
        node: Arc::new(Mutex::new(api::Node::new(ledger, clock))),
        event_tx,
        metrics: Arc::clone(&node_metrics),
        store,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
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
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("tribune-node stopped");
    Ok(())
}

/// Builds an empty ledger owned by `--owner`, with `--admin` entries
/// registered.
fn fresh_ledger(args: &cli::RunArgs) -> Result<NodeLedger> {
    let mut access = AdminRegistry::new(args.owner);
    for admin in &args.admins {
        access
            .set_administrator(args.owner, *admin, true)
            .context("failed to register administrator")?;
    }

    tracing::info!(
        owner = %args.owner,
        admins = args.admins.len(),
        custody = %args.custody,
        min_stake = args.min_stake,
        "created fresh ledger"
    );
    Ok(ClaimHandler::new(
        InMemoryToken::new(args.owner),
        access,
        args.custody,
        args.min_stake,
    ))
}

/// Prints a summary of the stored ledger, or one claim in full, to stdout.
fn inspect(args: cli::InspectArgs) -> Result<()> {
    let path = &args.data_dir;
    let store = LedgerStore::open(path)
        .with_context(|| format!("failed to open ledger store at {}", path.display()))?;
    let stored = store
        .load()
        .context("failed to load stored ledger")?
        .with_context(|| format!("no ledger stored at {}", path.display()))?;
    let ledger = &stored.ledger;

    if let Some(id) = args.claim {
        let claim = ledger.claim(id)?;
        println!("{}", serde_json::to_string_pretty(claim)?);
        return Ok(());
    }

    let open = ledger.claims().filter(|(_, claim)| !claim.is_closed()).count();

    println!("Data dir       : {}", path.display());
    println!("  Saved at     : {}", stored.saved_at);
    println!("  Custody      : {}", ledger.custody());
    println!("  Custody held : {}", ledger.custody_held());
    println!("  Min stake    : {}", ledger.min_stake());
    println!("  Claims       : {} ({} open)", ledger.claims_count(), open);
    for (id, claim) in ledger.claims() {
        println!(
            "    #{:<4} deal {:<10} {:<32} staked {}",
            id,
            claim.deal_id,
            claim.state.to_string(),
            claim.staked_total()
        );
    }
    Ok(())
}

fn print_version() {
    println!("tribune-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
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
