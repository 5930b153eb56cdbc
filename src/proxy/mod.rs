//! Proxy pipeline
//!
//! - Target validation against the host allow-list
//! - Header filtering in both directions
//! - Ordered transport fallback (relays, then direct)
//! - Request handling with redirect following and content rewriting

pub mod client;
pub mod egress;
pub mod guard;
pub mod handler;
pub mod headers;
pub mod transport;

pub use client::HttpUpstream;
pub use guard::HostGuard;
pub use handler::{ProxyHandler, ProxyHandlerConfig};
pub use headers::HeaderSanitizer;
pub use transport::{Clock, FetchOutcome, RetryPolicy, TokioClock, TransportSelector, Upstream};
