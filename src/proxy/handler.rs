//! Proxy request handler
//!
//! One inbound call runs through: target extraction, key check, target
//! validation, forwarding with transport fallback and redirect following,
//! then content rewriting of HTML and CSS responses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{
    HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE,
    HOST, LOCATION, REFERER,
};
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{debug, instrument, warn, Span};
use url::{form_urlencoded, Url};
use uuid::Uuid;

use super::client::HttpUpstream;
use super::guard::HostGuard;
use super::headers::{strip_cors, strip_payload, HeaderSanitizer};
use super::transport::TransportSelector;
use crate::config::{ApiKey, Config};
use crate::error::{Result, ShroudError};
use crate::models::{TargetRequest, UpstreamResponse};
use crate::rewrite::{to_direct, transform_body, ContentKind, RewriteContext};

/// Header that may carry the target instead of the `url` query parameter
pub const TARGET_HEADER: &str = "x-target-url";

/// Encodings the proxy can decode before rewriting
const ACCEPTED_ENCODINGS: &str = "gzip, deflate";

/// Configuration for proxy handler
#[derive(Debug, Clone)]
pub struct ProxyHandlerConfig {
    pub api_key: Option<ApiKey>,
    pub api_key_header: HeaderName,
    /// Prefix of rewritten URLs
    pub prefix: String,
    pub public_origin: Option<String>,
    /// Deadline for the whole upstream exchange, redirects included
    pub request_timeout: Duration,
    pub max_body_size: usize,
    pub max_redirects: u32,
}

impl Default for ProxyHandlerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_header: HeaderName::from_static("x-api-key"),
            prefix: "/proxy?url=".to_string(),
            public_origin: None,
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            max_redirects: 5,
        }
    }
}

/// Proxy request handler
pub struct ProxyHandler {
    guard: HostGuard,
    sanitizer: HeaderSanitizer,
    selector: TransportSelector,
    config: ProxyHandlerConfig,
}

impl ProxyHandler {
    pub fn new(guard: HostGuard, selector: TransportSelector, config: ProxyHandlerConfig) -> Self {
        let sanitizer = HeaderSanitizer::new([
            config.api_key_header.clone(),
            HeaderName::from_static(TARGET_HEADER),
        ]);

        Self {
            guard,
            sanitizer,
            selector,
            config,
        }
    }

    /// Wire the handler with the real network upstream
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key_header = HeaderName::from_bytes(config.proxy.api_key_header.as_bytes())
            .map_err(|e| ShroudError::InvalidConfig(format!("API_KEY_HEADER: {}", e)))?;

        let upstream = Arc::new(HttpUpstream::new(config.proxy.max_body_size)?);
        let selector = TransportSelector::new(
            config.transport_candidates(),
            upstream,
            config.retry_policy(),
        );

        Ok(Self::new(
            HostGuard::new(config.proxy.allowed_hosts.iter().cloned()),
            selector,
            ProxyHandlerConfig {
                api_key: config.proxy.api_key.clone(),
                api_key_header,
                prefix: config.proxy.prefix.clone(),
                public_origin: config.proxy.public_origin.clone(),
                request_timeout: config.request_timeout(),
                max_body_size: config.proxy.max_body_size,
                max_redirects: config.proxy.max_redirects,
            },
        ))
    }

    pub fn selector(&self) -> &TransportSelector {
        &self.selector
    }

    /// Handle an incoming proxy request
    #[instrument(
        skip_all,
        fields(
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            host = tracing::field::Empty,
        )
    )]
    pub async fn handle(&self, req: Request<Body>) -> Response {
        let start = Instant::now();

        match self.process(req).await {
            Ok(response) => {
                debug!(
                    status = response.status().as_u16(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Proxied request"
                );
                response
            }
            Err(e) => {
                if e.is_server_error() {
                    warn!(
                        error = %e,
                        detail = e.detail().as_deref().unwrap_or(""),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Proxy request failed"
                    );
                } else {
                    debug!(error = %e, "Proxy request rejected");
                }
                e.into_response()
            }
        }
    }

    async fn process(&self, req: Request<Body>) -> Result<Response> {
        let (parts, body) = req.into_parts();

        let raw_target = extract_target(&parts.uri, &parts.headers)?;
        self.authorize(&parts.headers)?;

        let target = parse_target(&raw_target)?;
        Span::current().record("host", target.host_str().unwrap_or(""));
        self.guard.check(&target)?;

        let body = read_body(body, self.config.max_body_size).await?;
        let headers = self.forward_headers(&parts.headers);
        let request = TargetRequest::new(parts.method.clone(), target, headers, Some(body));

        let (upstream, final_url) =
            tokio::time::timeout(self.config.request_timeout, self.fetch_following(request))
                .await
                .map_err(|_| ShroudError::UpstreamTimeout {
                    detail: Some(format!(
                        "no response within {}ms",
                        self.config.request_timeout.as_millis()
                    )),
                })??;

        Ok(self.respond(&parts.method, upstream, final_url))
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<()> {
        let Some(key) = &self.config.api_key else {
            return Ok(());
        };

        let presented = headers
            .get(&self.config.api_key_header)
            .map(|v| v.as_bytes())
            .unwrap_or_default();

        if key.matches(presented) {
            Ok(())
        } else {
            Err(ShroudError::Unauthorized)
        }
    }

    /// Inbound headers as they should reach the target
    fn forward_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = self.sanitizer.sanitize_inbound(inbound);

        // The browser's Referer is a proxied URL; hand the target its own URL
        if let Some(referer) = inbound.get(REFERER).and_then(|v| v.to_str().ok()) {
            let domain = self
                .config
                .public_origin
                .as_deref()
                .or_else(|| inbound.get(HOST).and_then(|v| v.to_str().ok()));
            let direct = to_direct(referer, &self.config.prefix, domain);

            match HeaderValue::from_str(&direct) {
                Ok(value) if direct != referer => {
                    headers.insert(REFERER, value);
                }
                _ => {
                    headers.remove(REFERER);
                }
            }
        }

        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPTED_ENCODINGS));
        headers
    }

    /// Fetch through the selector, following redirects up to the limit
    async fn fetch_following(&self, mut request: TargetRequest) -> Result<(UpstreamResponse, Url)> {
        let mut redirects = 0;

        loop {
            let outcome = self.selector.fetch(&request).await?;
            debug!(
                transport = %outcome.transport,
                attempts = outcome.attempts,
                status = outcome.response.status.as_u16(),
                "Upstream responded"
            );
            let response = outcome.response;

            if redirects >= self.config.max_redirects {
                return Ok((response, request.url));
            }

            let next = response
                .redirect_location()
                .and_then(|location| request.url.join(location).ok())
                .filter(|url| matches!(url.scheme(), "http" | "https"));
            let Some(next) = next else {
                return Ok((response, request.url));
            };

            self.guard.check(&next)?;
            redirects += 1;
            debug!(from = %request.url, to = %next, redirects, "Following redirect");
            request = request.redirect(response.status, next);
        }
    }

    fn respond(&self, method: &Method, upstream: UpstreamResponse, final_url: Url) -> Response {
        let UpstreamResponse {
            status,
            headers,
            body,
        } = upstream;

        let mut headers = HeaderSanitizer::sanitize_outbound(&headers);
        strip_cors(&mut headers);

        let ctx = RewriteContext::new(final_url, self.config.prefix.clone())
            .with_public_origin(self.config.public_origin.clone());

        let location = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|location| ctx.to_proxied(location));
        if let Some(value) = location.and_then(|l| HeaderValue::from_str(&l).ok()) {
            headers.insert(LOCATION, value);
        }

        let kind = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(ContentKind::from_content_type);

        let body = match kind {
            Some(kind) if has_document(method, status, &body) => {
                let encoding = headers
                    .get(CONTENT_ENCODING)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                match transform_body(
                    kind,
                    &body,
                    encoding.as_deref(),
                    self.config.max_body_size,
                    &ctx,
                ) {
                    Ok(rewritten) => {
                        strip_payload(&mut headers);
                        headers.insert(CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
                        rewritten
                    }
                    Err(e) => {
                        warn!(error = %e, kind = ?kind, "Returning upstream body unmodified");
                        body
                    }
                }
            }
            _ => body,
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Whether the response carries a document worth rewriting
fn has_document(method: &Method, status: StatusCode, body: &Bytes) -> bool {
    *method != Method::HEAD
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
        && !body.is_empty()
}

/// Target from the `url` query parameter, else the `x-target-url` header
fn extract_target(uri: &Uri, headers: &HeaderMap) -> Result<String> {
    let from_query = uri.query().and_then(|query| {
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "url")
            .map(|(_, value)| value.into_owned())
    });

    let from_header = || {
        headers
            .get(TARGET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    from_query
        .filter(|t| !t.trim().is_empty())
        .or_else(|| from_header().filter(|t| !t.trim().is_empty()))
        .ok_or(ShroudError::MissingTarget)
}

fn parse_target(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ShroudError::InvalidTarget(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ShroudError::InvalidTarget("missing host".to_string()));
    }

    url.set_fragment(None);
    Ok(url)
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes> {
    Limited::new(body, limit)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                ShroudError::PayloadTooLarge { limit }
            } else {
                ShroudError::InvalidRequest(format!("Failed to read body: {}", e))
            }
        })
}
