//! spotpriced — the spotprice daemon.
//!
//! Assembles the spotprice subsystems:
//! - State store (redb)
//! - EC2 price source
//! - Collector loop
//! - Query API + chart page
//!
//! # Usage
//!
//! ```text
//! spotpriced collect --once                 # one cycle, for cron
//! spotpriced collect --interval 3600        # collector daemon
//! spotpriced serve --port 8080              # query server only
//! spotpriced --data-dir /var/lib/spotprice standalone
//! ```

mod cli;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use spotprice_collector::{Collector, CollectorSettings};
use spotprice_core::SpotpriceConfig;
use spotprice_source::{Ec2Client, PriceSource, RegionFilter};
use spotprice_state::StateStore;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    init_tracing(&config.log.level, cli.log_json);

    match cli.command {
        Command::Collect { once: true, .. } => run_collect_once(config).await,
        Command::Collect { once: false, .. } => run_collect(config).await,
        Command::Serve { .. } => run_serve(config).await,
        Command::Standalone { .. } => run_standalone(config).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Install the global subscriber once. `RUST_LOG` wins over the config.
fn init_tracing(default_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn open_store(config: &SpotpriceConfig) -> anyhow::Result<StateStore> {
    if let Some(dir) = config.store.path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
        }
    }
    let state = StateStore::open(&config.store.path)
        .with_context(|| format!("opening state store {}", config.store.path.display()))?;
    info!(path = ?config.store.path, "state store opened");
    Ok(state)
}

fn build_collector(config: &SpotpriceConfig, state: StateStore) -> anyhow::Result<Collector> {
    let filter = RegionFilter::new(config.collector.excluded_region_prefixes.iter().cloned());
    let source: Arc<dyn PriceSource> = Arc::new(
        Ec2Client::from_config(&config.source, filter).context("configuring EC2 client")?,
    );
    info!(
        bootstrap_region = %config.source.bootstrap_region,
        excluded = ?config.collector.excluded_region_prefixes,
        "EC2 price source initialized"
    );
    Ok(Collector::new(
        source,
        state,
        CollectorSettings::from(&config.collector),
    ))
}

fn bind_addr(config: &SpotpriceConfig) -> anyhow::Result<SocketAddr> {
    format!("{}:{}", config.server.address, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.address, config.server.port
            )
        })
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("shutdown signal received");
}

async fn run_collect_once(config: SpotpriceConfig) -> anyhow::Result<()> {
    let state = open_store(&config)?;
    let collector = build_collector(&config, state)?;
    let report = collector.run_once().await?;
    info!(
        regions = report.regions,
        records = report.records,
        new = report.observations_new,
        skipped = report.skipped,
        "one-shot collection finished"
    );
    Ok(())
}

async fn run_collect(config: SpotpriceConfig) -> anyhow::Result<()> {
    let state = open_store(&config)?;
    let collector = build_collector(&config, state)?;
    let interval = Duration::from_secs(config.collector.interval_secs);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = collector.run(interval, shutdown_rx);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result?,
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            run.await?;
        }
    }

    info!("spotpriced collector stopped");
    Ok(())
}

async fn run_serve(config: SpotpriceConfig) -> anyhow::Result<()> {
    let state = open_store(&config)?;
    let router = spotprice_api::build_router(state);
    let addr = bind_addr(&config)?;

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("spotpriced server stopped");
    Ok(())
}

async fn run_standalone(config: SpotpriceConfig) -> anyhow::Result<()> {
    info!("spotpriced starting in standalone mode");

    let state = open_store(&config)?;
    let collector = build_collector(&config, state.clone())?;
    let interval = Duration::from_secs(config.collector.interval_secs);
    let addr = bind_addr(&config)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    {
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = tx.send(true);
        });
    }

    // ── Collector loop ─────────────────────────────────────────

    let collector_handle = {
        let tx = shutdown_tx.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let result = collector.run(interval, rx).await;
            // A collector that gave up takes the server down with it.
            let _ = tx.send(true);
            result
        })
    };

    // ── API server ─────────────────────────────────────────────

    let router = spotprice_api::build_router(state);
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    collector_handle.await??;

    info!("spotpriced stopped");
    Ok(())
}
