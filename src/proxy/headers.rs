//! Header filtering in both directions
//!
//! Inbound, everything that identifies the caller or the proxy hop is
//! dropped before the request reaches the target. Outbound, hop-by-hop
//! headers are dropped before the response reaches the caller.

use http::header::{HeaderName, CONNECTION};
use http::HeaderMap;

/// Request headers describing the caller or the hop to the proxy
const CALLER_HEADERS: &[&str] = &[
    "host",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-port",
    "x-real-ip",
    "forwarded",
    "via",
    "proxy-authorization",
    "content-length",
];

/// Headers describing a body that is rewritten before it leaves the proxy
const PAYLOAD_HEADERS: &[&str] = &["content-length", "content-encoding", "etag", "content-md5"];

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Header names listed in `Connection`, which are hop-by-hop for this message
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn copy_filtered(headers: &HeaderMap, mut keep: impl FnMut(&HeaderName) -> bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if keep(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Filters request and response headers
#[derive(Debug, Clone)]
pub struct HeaderSanitizer {
    /// Headers that steer the proxy itself and are never forwarded
    control: Vec<HeaderName>,
}

impl HeaderSanitizer {
    pub fn new(control: impl IntoIterator<Item = HeaderName>) -> Self {
        Self {
            control: control.into_iter().collect(),
        }
    }

    /// Headers of the inbound request that may be forwarded to the target
    pub fn sanitize_inbound(&self, headers: &HeaderMap) -> HeaderMap {
        let connection = connection_tokens(headers);
        copy_filtered(headers, |name| {
            let name_str = name.as_str();
            !CALLER_HEADERS.contains(&name_str)
                && !is_hop_by_hop_header(name_str)
                && !connection.iter().any(|t| t == name_str)
                && !self.control.contains(name)
        })
    }

    /// Headers of the upstream response that may be returned to the caller
    pub fn sanitize_outbound(headers: &HeaderMap) -> HeaderMap {
        let connection = connection_tokens(headers);
        copy_filtered(headers, |name| {
            !is_hop_by_hop_header(name.as_str()) && !connection.iter().any(|t| t == name.as_str())
        })
    }
}

/// Drop upstream CORS headers; the proxy answers with its own policy
pub fn strip_cors(headers: &mut HeaderMap) {
    let cors: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("access-control-"))
        .cloned()
        .collect();
    for name in cors {
        headers.remove(&name);
    }
}

/// Drop headers that describe the upstream body bytes
pub fn strip_payload(headers: &mut HeaderMap) {
    for name in PAYLOAD_HEADERS {
        headers.remove(*name);
    }
}
