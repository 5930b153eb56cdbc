//! Shroud - rewriting web proxy
//!
//! Fetches a target URL on behalf of a browser and rewrites the returned
//! HTML and CSS so that every embedded resource is fetched through the proxy
//! as well.
//!
//! ## Features
//!
//! - Host allow-list and optional API key
//! - Transport fallback: SOCKS5 or HTTP CONNECT relays, then direct, with backoff
//! - Structural HTML rewriting (attributes, `srcset`, inline and block styles)
//! - CSS `url()` and `@import` rewriting
//! - gzip/deflate decoding before rewriting
//! - Redirect following with per-hop host checks

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod rewrite;

pub use config::Config;
pub use error::{Result, ShroudError};
