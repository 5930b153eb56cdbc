//! Proxy endpoint

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;

use crate::api::server::AppState;

/// `ANY /proxy?url=<target>`
pub async fn proxy(State(state): State<AppState>, req: Request<Body>) -> Response {
    state.handler.handle(req).await
}
