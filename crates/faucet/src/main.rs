//! Faucet service binary

use clap::Parser;
use drip_common::utils::logging::init_logging;
use drip_faucet::api::{router, AppState};
use drip_faucet::store::open_store;
use drip_faucet::{FaucetConfig, FaucetService, JsonRpcLedgerClient, StoreBackend};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Private key
    #[arg(long)]
    private_key: Option<String>,

    /// Dispense amount (decimal, e.g. 0.25)
    #[arg(long)]
    amount: Option<String>,

    /// Rate-limit store backend (sled, file, memory)
    #[arg(long)]
    store_backend: Option<String>,

    /// Rate-limit store location
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => FaucetConfig::from_file(path)?,
        None => FaucetConfig::from_env(),
    };

    // Override with CLI arguments
    if let Some(addr) = args.server_addr {
        config.server_addr = addr;
    }
    if let Some(rpc_url) = args.rpc_url {
        config.rpc_url = rpc_url;
    }
    if let Some(key) = args.private_key {
        config.private_key = Some(key);
    }
    if let Some(amount) = args.amount {
        config.amount = amount;
    }
    if let Some(backend) = args.store_backend {
        config.store.backend = backend.parse::<StoreBackend>()?;
    }
    if let Some(path) = args.store_path {
        config.store.path = Some(path);
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    // Keep the guard alive so buffered file logs get flushed on exit
    let _log_guard = init_logging(&config.logging)?;

    info!("Starting Drip Faucet v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(e.into());
    }

    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  RPC URL: {}", config.rpc_url);
    info!("  Dispense amount: {} {}", config.amount, config.asset_symbol);
    info!("  Cooldown: {}", drip_faucet::config::describe_duration_ms(config.policy.cooldown_period_ms));
    info!("  Daily cap: {} per IP", config.policy.daily_cap);
    info!("  Burst limit: {}", config.policy.burst_limit_description());

    let store = open_store(&config.store)?;

    let private_key = config.private_key.clone().unwrap_or_default();
    let ledger = JsonRpcLedgerClient::new(
        config.rpc_url.clone(),
        &private_key,
        config.ledger.clone(),
        config.chain_id,
    )?;

    let compaction_interval = config.compaction_interval_secs;
    let addr: SocketAddr = config.server_addr.parse()?;

    let service = Arc::new(FaucetService::new(config, store, Arc::new(ledger))?);
    info!("Faucet service initialized");

    // Balance check failures are not fatal
    if let Err(e) = service.check_balance().await {
        warn!("Starting without a balance check: {}", e);
    }

    let state = AppState::new(service.clone());
    let throttle = state.throttle.clone();
    let app = router(state);

    // Start compaction task
    if compaction_interval > 0 {
        let service = service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(compaction_interval));
            loop {
                interval.tick().await;
                let removed = service.compact().await;
                throttle.retain_recent();
                if removed > 0 {
                    info!("Compacted {} expired rate-limit entries", removed);
                }
            }
        });
    }

    // Start server
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
