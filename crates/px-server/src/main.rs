//! # px-server
//!
//! Price cache service: keeps a durable minute-candle history per symbol in
//! sync with each configured exchange, and serves it together with live
//! trade prices and best bid/ask over HTTP/WebSocket.
//!
//! # Usage
//!
//! ```bash
//! px-server config.json --log-level info
//! ```

mod error;
mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashMap;
use anyhow::{Context, Result};
use clap::Parser;
use px_history::{ExchangeHistory, SyncConfig};
use px_stream::{HubRegistry, OrderbookCache};
use tokio::sync::watch;
use tracing::{error, info};

use state::{AppState, ExchangeState};

/// Price history cache and live price stream server.
#[derive(Parser)]
#[command(name = "px-server", about = "Price history cache and live price stream server")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log directory for file output; overrides `service.log_path`.
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration and logging
    let config = px_core::config::load_config(&cli.config)?;
    let log_dir = cli.log_dir.clone().or_else(|| config.service.log_path.clone());
    let module_name = config.service.module_name();
    px_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &module_name);

    info!(
        "px-server starting: config={}, log_level={}, {} exchange(s)",
        cli.config.display(),
        cli.log_level,
        config.exchanges.len()
    );

    // 2. Per-exchange history, hubs and orderbook cache
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let data_dir = config.service.data_dir();
    let mut exchanges = AHashMap::new();
    let mut jobs = Vec::new();

    for ex_cfg in &config.exchanges {
        let exchange = px_exchange::create_exchange(ex_cfg)
            .with_context(|| format!("creating exchange '{}'", ex_cfg.exchange))?;
        let sync_config = SyncConfig::from_exchange(ex_cfg);
        let history = ExchangeHistory::open(&data_dir, Arc::clone(&exchange), sync_config)
            .with_context(|| format!("opening history cache of '{}'", exchange.name()))?;
        history
            .refresh_symbols()
            .await
            .with_context(|| format!("{}: could not fetch symbols", exchange.name()))?;

        jobs.push(history.spawn_sync_job(shutdown_rx.clone()));
        info!(
            "exchange '{}': {} symbols tracked, sync job started",
            exchange.name(),
            history.index().len()
        );

        let ex_state = ExchangeState {
            hubs: HubRegistry::from_config(Arc::clone(&exchange), ex_cfg),
            orderbooks: OrderbookCache::new(
                Arc::clone(&exchange),
                ex_cfg.effective_orderbook_refresh(),
            ),
            history,
            exchange,
        };
        exchanges.insert(ex_state.exchange.name().to_lowercase(), Arc::new(ex_state));
    }

    // 3. HTTP server
    let state = AppState::new(exchanges, shutdown_rx.clone());
    let app = routes::router(state.clone());
    let listen = config.service.listen();
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!("listening on http://{listen}, press Ctrl+C to stop");

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("signal handler failed: {e}");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("http server")?;

    // 4. Drain background work
    for job in jobs {
        if let Err(e) = job.await {
            error!("sync job ended abnormally: {e}");
        }
    }
    state.stop_hubs().await;

    info!("all tasks stopped, goodbye");
    Ok(())
}
