//! ProxyChain - Entry Point
//!
//! Wires the node loader, relay supervisor and proxy manager together, then
//! runs the refresh service and the API server until a shutdown signal.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxychain::api::ApiServer;
use proxychain::config::{Config, LogConfig};
use proxychain::error::Result;
use proxychain::normalizer::{FileSourceReader, NodeLoader};
use proxychain::pool::{ProcessRelaySupervisor, ProxyManager};
use proxychain::services::{RefreshConfig, RefreshHandle, RefreshService};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting ProxyChain");
    std::fs::create_dir_all(&config.storage.data_dir)?;

    let loader = NodeLoader::new(config.sources.clone(), Arc::new(FileSourceReader));
    let relays = ProcessRelaySupervisor::new(config.relay.clone());
    let manager = Arc::new(ProxyManager::new(
        &config,
        Arc::new(loader),
        Arc::new(relays),
    ));
    info!(
        protocols = ?config.pool.enabled_protocols,
        relay_enabled = config.relay.enabled,
        "Proxy manager ready"
    );

    // Refresh service (initial refresh + optional periodic ticks)
    let (refresh_handle, refresh_shutdown) = RefreshHandle::new();
    let refresh_service = RefreshService::new(
        manager.clone(),
        RefreshConfig::from_seconds(config.pool.refresh_interval_seconds),
    );
    let refresh_task = tokio::spawn(async move {
        refresh_service.run(refresh_shutdown).await;
    });

    // API server
    let (shutdown_tx, api_shutdown) = watch::channel(false);
    let api_server = ApiServer::new(manager.clone(), Arc::new(config.clone()));
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("API listening on {}", config.api_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    refresh_handle.shutdown();
    let _ = tokio::join!(api_task, refresh_task);

    manager.shutdown().await;
    info!("ProxyChain stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("proxychain={},tower_http=info", log.level))
    });
    let registry = tracing_subscriber::registry().with(filter);

    if log.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
