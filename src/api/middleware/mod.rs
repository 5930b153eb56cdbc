//! API middleware

mod cors;
mod logging;

pub use cors::{cors, CorsPolicy};
pub use logging::RequestLogging;
