use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

use crate::error::{Result, ShroudError};
use crate::models::{ProxyCredentials, TransportCandidate, TransportKind};

/// Largest CONNECT response head accepted from an HTTP relay
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Open a TCP stream to `host:port` over the given transport
pub async fn connect(candidate: &TransportCandidate, host: &str, port: u16) -> Result<TcpStream> {
    let direct_addr = format_tcp_addr(host, port);

    match candidate.kind {
        TransportKind::Direct => TcpStream::connect(&direct_addr)
            .await
            .map_err(|e| ShroudError::ProxyConnectionFailed(format!("TCP connect failed: {}", e))),
        TransportKind::HttpProxy => {
            let relay_addr = relay_addr(candidate)?;
            connect_via_http_proxy(candidate.credentials.as_ref(), &relay_addr, host, port)
                .await
                .map_err(|e| {
                    ShroudError::ProxyConnectionFailed(format!(
                        "HTTP relay connect failed ({} -> {}): {}",
                        relay_addr, direct_addr, e
                    ))
                })
        }
        TransportKind::Socks5 => {
            let relay_addr = relay_addr(candidate)?;
            connect_via_socks5_proxy(candidate.credentials.as_ref(), &relay_addr, host, port)
                .await
                .map_err(|e| {
                    ShroudError::ProxyConnectionFailed(format!(
                        "SOCKS5 relay connect failed ({} -> {}): {}",
                        relay_addr, direct_addr, e
                    ))
                })
        }
    }
}

fn relay_addr(candidate: &TransportCandidate) -> Result<String> {
    let (host, port) = parse_host_port(&candidate.address)?;
    Ok(format_tcp_addr(&host, port))
}

async fn connect_via_http_proxy(
    credentials: Option<&ProxyCredentials>,
    relay_addr: &str,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<TcpStream, anyhow::Error> {
    let mut stream = TcpStream::connect(relay_addr).await?;

    let authority = format_tcp_addr(target_host, target_port);
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

    if let Some(creds) = credentials {
        let pair = format!("{}:{}", creds.username, creds.password);
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            BASE64.encode(pair.as_bytes())
        ));
    }

    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    // Read byte by byte up to the blank line so no tunneled bytes are consumed
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_RESPONSE {
            anyhow::bail!("CONNECT response head too large");
        }
        if stream.read(&mut byte).await? == 0 {
            anyhow::bail!("relay closed during CONNECT");
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or("");
    let status = status_line.split_whitespace().nth(1).unwrap_or("");
    if !status_line.starts_with("HTTP/1.") || status != "200" {
        anyhow::bail!("CONNECT failed: {}", status_line);
    }

    Ok(stream)
}

async fn connect_via_socks5_proxy(
    credentials: Option<&ProxyCredentials>,
    relay_addr: &str,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<TcpStream, anyhow::Error> {
    let socket = TcpStream::connect(relay_addr).await?;

    let stream = match credentials {
        Some(creds) => {
            Socks5Stream::connect_with_password_and_socket(
                socket,
                (target_host, target_port),
                &creds.username,
                &creds.password,
            )
            .await?
        }
        None => Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await?,
    };

    Ok(stream.into_inner())
}

/// Split `host:port`, accepting bracketed IPv6 like `[::1]:8080`
pub fn parse_host_port(addr: &str) -> Result<(String, u16)> {
    let url = url::Url::parse(&format!("http://{}", addr)).map_err(|e| {
        ShroudError::InvalidProxyAddress(format!("Invalid address '{}': {}", addr, e))
    })?;

    let host = url.host_str().ok_or_else(|| {
        ShroudError::InvalidProxyAddress(format!("Invalid address '{}': missing host", addr))
    })?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    // Url drops the scheme's default port, so `:80` has to be recovered by hand
    let port = url
        .port()
        .or_else(|| addr.ends_with(":80").then_some(80))
        .ok_or_else(|| {
            ShroudError::InvalidProxyAddress(format!("Invalid address '{}': missing port", addr))
        })?;

    Ok((host.to_string(), port))
}

pub fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
