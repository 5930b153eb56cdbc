//! Health check endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let transports: Vec<String> = state
        .handler
        .selector()
        .candidates()
        .iter()
        .map(ToString::to_string)
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "shroud",
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "transports": transports,
        })),
    )
}
