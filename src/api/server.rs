//! HTTP server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ServerConfig;
use crate::error::{Result, ShroudError};
use crate::proxy::ProxyHandler;

use super::middleware::{cors, CorsPolicy, RequestLogging};
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ProxyHandler>,
    pub started_at: Instant,
}

/// HTTP server
pub struct ApiServer {
    config: ServerConfig,
    cors: CorsPolicy,
    state: AppState,
}

impl ApiServer {
    /// Create a new server; `api_key_header` is advertised to browsers in preflights
    pub fn new(config: ServerConfig, api_key_header: &str, handler: Arc<ProxyHandler>) -> Self {
        let cors = CorsPolicy::new(&config.cors_origin, api_key_header);

        Self {
            config,
            cors,
            state: AppState {
                handler,
                started_at: Instant::now(),
            },
        }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(from_fn(RequestLogging::log_request))
            .layer(from_fn_with_state(self.cors.clone(), cors))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown` flips
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| ShroudError::InvalidConfig(format!("Invalid listen address: {}", e)))?;

        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Shroud listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| ShroudError::Internal(e.to_string()))?;

        info!("Server shut down");
        Ok(())
    }
}
