//! Content rewriting
//!
//! Every URL in a rewritten document is routed back through the proxy
//! endpoint. Which rewriter runs is decided by the response content type
//! alone, independent of the transport that fetched it.

pub mod css;
pub mod html;
pub mod url;

use std::io::Read;

use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};

use crate::error::{Result, ShroudError};

pub use self::css::transform_css;
pub use self::html::{rewrite_srcset, transform_html};
pub use self::url::{is_excluded, to_direct, to_proxied, RewriteContext};

/// Documents the proxy knows how to rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
}

impl ContentKind {
    /// Classify a `Content-Type` value; parameters are ignored
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/html" | "application/xhtml+xml" => Some(ContentKind::Html),
            "text/css" => Some(ContentKind::Css),
            _ => None,
        }
    }
}

/// Undo the `Content-Encoding` of an upstream body
///
/// Decoded output larger than `limit` bytes is a `TransformFailure`.
pub fn decode_content(
    body: &[u8],
    content_encoding: Option<&str>,
    limit: usize,
) -> Result<Vec<u8>> {
    let encoding = content_encoding
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut decoded = Vec::with_capacity(body.len().saturating_mul(2).min(limit));
    let read = match encoding.as_str() {
        "" | "identity" => return Ok(body.to_vec()),
        "gzip" | "x-gzip" => GzDecoder::new(body).take(cap).read_to_end(&mut decoded),
        "deflate" => ZlibDecoder::new(body).take(cap).read_to_end(&mut decoded),
        other => {
            return Err(ShroudError::TransformFailure(format!(
                "unsupported content encoding '{}'",
                other
            )))
        }
    };
    read.map_err(|e| ShroudError::TransformFailure(format!("{} decode failed: {}", encoding, e)))?;

    if decoded.len() > limit {
        return Err(ShroudError::TransformFailure(format!(
            "{} body expands beyond {} bytes",
            encoding, limit
        )));
    }

    Ok(decoded)
}

/// Decode and rewrite a body of the given kind
///
/// The returned bytes are always identity-encoded.
pub fn transform_body(
    kind: ContentKind,
    body: &[u8],
    content_encoding: Option<&str>,
    limit: usize,
    ctx: &RewriteContext,
) -> Result<Bytes> {
    let decoded = decode_content(body, content_encoding, limit)?;

    match kind {
        ContentKind::Html => transform_html(&decoded, ctx).map(Bytes::from),
        ContentKind::Css => {
            let css = std::str::from_utf8(&decoded).map_err(|e| {
                ShroudError::TransformFailure(format!("stylesheet is not UTF-8: {}", e))
            })?;
            Ok(Bytes::from(transform_css(css, ctx)))
        }
    }
}
