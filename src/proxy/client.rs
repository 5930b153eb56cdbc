//! HTTP/1.1 exchange with the target over a dialed transport

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, HOST};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::egress;
use super::transport::Upstream;
use crate::error::{Result, ShroudError};
use crate::models::{TargetRequest, TransportCandidate, UpstreamResponse};

/// Fetches targets over plain TCP or TLS, one connection per request
pub struct HttpUpstream {
    tls: TlsConnector,
    max_body_size: usize,
}

impl HttpUpstream {
    pub fn new(max_body_size: usize) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ShroudError::Internal(format!("TLS setup failed: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
            max_body_size,
        })
    }

    async fn read_body(&self, response: Response<Incoming>) -> Result<UpstreamResponse> {
        let (parts, body) = response.into_parts();
        let limit = self.max_body_size;

        let body = Limited::new(body, limit)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    ShroudError::ResponseTooLarge { limit }
                } else {
                    ShroudError::ProxyConnectionFailed(format!("Failed to read response: {}", e))
                }
            })?
            .to_bytes();

        Ok(UpstreamResponse::new(parts.status, parts.headers, body))
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(
        &self,
        transport: &TransportCandidate,
        request: &TargetRequest,
    ) -> Result<UpstreamResponse> {
        let url = &request.url;
        let host = url
            .host_str()
            .ok_or_else(|| ShroudError::InvalidTarget("missing host".to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ShroudError::InvalidTarget("missing port".to_string()))?;

        let http_request = build_request(request)?;
        let stream = egress::connect(transport, host, port).await?;

        let response = if url.scheme() == "https" {
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|e| ShroudError::InvalidTarget(format!("{}: {}", host, e)))?;
            let tls = self.tls.connect(server_name, stream).await.map_err(|e| {
                ShroudError::ProxyConnectionFailed(format!("TLS handshake failed: {}", e))
            })?;
            send(TokioIo::new(tls), http_request).await?
        } else {
            send(TokioIo::new(stream), http_request).await?
        };

        self.read_body(response).await
    }
}

/// Origin-form request with an explicit `Host` header
fn build_request(request: &TargetRequest) -> Result<Request<Full<Bytes>>> {
    let url = &request.url;
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(ShroudError::InvalidTarget("missing host".to_string())),
    };
    let host = HeaderValue::from_str(&host)
        .map_err(|e| ShroudError::InvalidTarget(format!("bad host: {}", e)))?;

    let mut builder = Request::builder().method(request.method.clone()).uri(target);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(request.headers.clone());
        headers.insert(HOST, host);
    }

    builder
        .body(Full::new(request.body.clone().unwrap_or_default()))
        .map_err(|e| ShroudError::InvalidRequest(format!("Failed to build request: {}", e)))
}

async fn send<T>(io: TokioIo<T>, request: Request<Full<Bytes>>) -> Result<Response<Incoming>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ShroudError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Connection ended: {}", e);
        }
    });

    sender
        .send_request(request)
        .await
        .map_err(|e| ShroudError::ProxyConnectionFailed(format!("Request failed: {}", e)))
}
