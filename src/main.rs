//! storefront-sync - Catalog, inventory and order synchronization between
//! e-commerce platforms
//!
//! This is the main entry point for the storefront-sync application.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use storefront_sync::config::Config;
use storefront_sync::engine::SyncEngine;
use storefront_sync::models::EntityType;
use storefront_sync::registry::PlatformRegistry;
use storefront_sync::telemetry::init_tracing;

/// storefront-sync - Keep two storefronts' catalog, stock and orders in step
#[derive(Parser, Debug)]
#[command(name = "storefront-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "STOREFRONT_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run sync passes every interval until interrupted (default)
    Run,
    /// Run a single pass and print its result as JSON
    Once {
        /// products, inventory, orders or customers
        entity: EntityType,
    },
    /// Probe every initialized platform
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.sync.source,
        target = %config.sync.target,
        "Starting storefront-sync"
    );

    let registry = Arc::new(PlatformRegistry::from_config(&config)?);
    let engine = Arc::new(SyncEngine::new(Arc::clone(&registry), config.sync.clone()));

    let source = config.identity(&config.sync.source);
    let target = config.identity(&config.sync.target);
    if !engine.initialize(&source, &target).await {
        anyhow::bail!("No platform could be initialized");
    }

    let shutdown = CancellationToken::new();
    let sweeper = config.cache.enabled.then(|| {
        registry.cache().spawn_sweeper(
            Duration::from_secs(config.cache.sweep_interval_secs),
            shutdown.clone(),
        )
    });

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&engine).await,
        Command::Once { entity } => once(&engine, entity).await,
        Command::Check => check(&registry).await,
    };

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            error!(error = %e, "Cache sweeper terminated abnormally");
        }
    }

    info!("storefront-sync shutdown complete");
    result
}

/// Run the continuous loop until a shutdown signal arrives
async fn run(engine: &Arc<SyncEngine>) -> anyhow::Result<()> {
    engine.start_sync().await?;
    shutdown_signal().await;
    engine.stop_sync().await;

    for result in engine.get_history(usize::MAX) {
        info!(
            entity = %result.entity,
            outcome = ?result.outcome(),
            started_at = %result.started_at,
            "Recorded pass"
        );
    }
    Ok(())
}

/// Run a single pass and print it
async fn once(engine: &SyncEngine, entity: EntityType) -> anyhow::Result<()> {
    let result = engine.sync_entity(entity).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        anyhow::bail!("{} pass finished with {} failures", entity, result.failed_count);
    }
    Ok(())
}

/// Probe every platform and print the results
async fn check(registry: &PlatformRegistry) -> anyhow::Result<()> {
    let results = registry.check_all_connections().await;
    println!("{}", serde_json::to_string_pretty(&results)?);

    let down: Vec<&String> = results
        .iter()
        .filter_map(|(tag, connected)| (!connected).then_some(tag))
        .collect();
    if !down.is_empty() {
        anyhow::bail!("Unreachable platforms: {:?}", down);
    }
    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping after the current pass");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping after the current pass");
        }
    }
}
