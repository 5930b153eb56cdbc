//! API route definitions

use axum::routing::{any, get};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/proxy", any(handlers::proxy::proxy))
        .with_state(state)
}
