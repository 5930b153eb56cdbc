//! HTTP surface
//!
//! Serves the proxy endpoint and a health check behind CORS, request
//! logging and tracing layers.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
