//! Shroud - Entry Point
//!
//! Starts the HTTP server with graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shroud::api::ApiServer;
use shroud::config::{Config, LogConfig};
use shroud::proxy::ProxyHandler;

#[tokio::main]
async fn main() -> shroud::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);
    info!("Starting Shroud");

    let candidates = config.transport_candidates();
    info!(
        transports = %candidates
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> "),
        listen = %config.listen_addr(),
        allowed_hosts = config.proxy.allowed_hosts.len(),
        api_key = config.proxy.api_key.is_some(),
        "Configuration loaded"
    );

    let handler = Arc::new(ProxyHandler::from_config(&config)?);
    let server = ApiServer::new(
        config.server.clone(),
        &config.proxy.api_key_header,
        handler,
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut server_task = tokio::spawn(async move { server.run(shutdown_rx).await });

    // Wait for shutdown signal, or for the server to stop on its own
    tokio::select! {
        result = &mut server_task => return joined(result),
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    let _ = shutdown_tx.send(true);
    joined(server_task.await)?;

    info!("Shroud stopped");
    Ok(())
}

fn joined(
    result: std::result::Result<shroud::Result<()>, tokio::task::JoinError>,
) -> shroud::Result<()> {
    result.map_err(|e| shroud::ShroudError::Internal(e.to_string()))?
}

/// Install the global subscriber; `RUST_LOG` overrides `LOG_LEVEL`
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("shroud={},tower_http=info", log.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
