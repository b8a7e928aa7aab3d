//! Reservoir - connection pool and sharded cache service

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod maintenance;

use config::Config;
use maintenance::spawn_maintenance_task;
use reservoir_cache::ShardedCache;
use reservoir_pool::{ResourcePool, SimulatedConnector};
use reservoir_remote::InMemoryRemote;

/// Reservoir - bounded connection pool with a two-tier sharded cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", env = "RESERVOIR_CONFIG")]
    config: String,

    /// Log level, overrides the config file
    #[arg(long, env = "RESERVOIR_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let (config, source) = Config::load(&args.config)?;
    config.validate()?;

    // Initialize logging
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.format);

    info!("Starting Reservoir v{}", env!("CARGO_PKG_VERSION"));
    info!("{}", source);

    if config.metrics.enabled {
        let addr = config.metrics_address()?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    // Initialize connection pool
    let pool = Arc::new(ResourcePool::new(
        config.pool.identifier.clone(),
        config.pool.to_pool_config(),
        SimulatedConnector,
    )?);

    // Initialize sharded cache
    let remote = Arc::new(InMemoryRemote::new());
    let cache = Arc::new(ShardedCache::new(
        config.cache.local_capacity()?,
        config.cache.peers.clone(),
        remote,
    ));
    if cache.node_count() == 0 {
        info!("No cache peers configured, running in local-only mode");
    } else {
        info!("Cache peers: {}", cache.node_count());
    }

    let maintenance = spawn_maintenance_task(
        pool.clone(),
        cache.clone(),
        Duration::from_secs(config.maintenance.interval_secs),
    );

    shutdown_signal().await;

    maintenance.abort();
    pool.shutdown();

    info!("Reservoir stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
