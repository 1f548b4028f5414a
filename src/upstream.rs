//! Upstream ("super") proxy client.
//!
//! An [`UpstreamProxy`] describes one chained hop the proxy can route
//! traffic through: a plaintext HTTP CONNECT proxy, the same behind TLS, or
//! a SOCKS5 server. `make_tunnel` opens an opaque byte stream to a target
//! through the hop. Concurrency per hop is bounded by a token pool; the
//! returned tunnel holds its token until dropped.

use crate::mitm;
use crate::transport::{dial, BoxedStream};
use crate::usage::Usage;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_rustls::TlsConnector;
use tracing::debug;

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_AUTH_NONE: u8 = 0x00;
const SOCKS_AUTH_USERPASS: u8 = 0x02;
const SOCKS_AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const SOCKS_CMD_CONNECT: u8 = 0x01;
const SOCKS_ATYP_IPV4: u8 = 0x01;
const SOCKS_ATYP_DOMAIN: u8 = 0x03;
const SOCKS_ATYP_IPV6: u8 = 0x04;

const MAX_CONNECT_RESPONSE: usize = 8 * 1024;
const DEFAULT_MAX_TUNNELS: usize = 64;

/// Protocol spoken to the upstream hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Https,
    Socks5,
}

/// Tunnel establishment failures.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The hop demands credentials we did not (successfully) present.
    #[error("upstream proxy requires authentication")]
    AuthRequired,

    /// The hop rejected the CONNECT.
    #[error("upstream proxy refused tunnel: {reason}")]
    Refused { reason: String },

    /// SOCKS5 reply carried a non-success code.
    #[error("upstream SOCKS5 proxy refused tunnel: reply code {code:#04x}")]
    SocksRefused { code: u8 },

    /// Malformed negotiation traffic from the hop.
    #[error("upstream proxy sent a malformed reply: {0}")]
    Malformed(String),

    #[error("dial upstream proxy: {0}")]
    Dial(#[source] io::Error),

    #[error("upstream proxy TLS: {0}")]
    Tls(#[source] io::Error),

    #[error("upstream proxy I/O: {0}")]
    Io(#[from] io::Error),

    #[error("invalid upstream proxy configuration: {0}")]
    Config(String),
}

/// One configured upstream hop. Immutable after construction and shared by
/// any number of sessions.
pub struct UpstreamProxy {
    kind: ProxyKind,
    host_with_port: String,
    tls_server_name: String,
    auth: Option<(String, String)>,
    tls_config: Option<Arc<ClientConfig>>,
    tokens: Arc<Semaphore>,
    usage: Usage,
}

impl UpstreamProxy {
    /// Describe an upstream hop at `host:port`.
    pub fn new(host: &str, port: u16, kind: ProxyKind) -> Result<Self, UpstreamError> {
        if host.is_empty() {
            return Err(UpstreamError::Config("empty upstream host".to_string()));
        }
        let tls_config = match kind {
            ProxyKind::Https => Some(mitm::upstream_config()),
            _ => None,
        };
        Ok(Self {
            kind,
            host_with_port: format!("{host}:{port}"),
            tls_server_name: host.to_string(),
            auth: None,
            tls_config,
            tokens: Arc::new(Semaphore::new(DEFAULT_MAX_TUNNELS)),
            usage: Usage::new(),
        })
    }

    /// Present these credentials to the hop (Basic for HTTP hops, RFC 1929
    /// for SOCKS5).
    pub fn with_credentials(mut self, user: &str, pass: &str) -> Self {
        self.auth = Some((user.to_string(), pass.to_string()));
        self
    }

    /// For HTTPS hops, verify the hop's certificate against exactly this CA
    /// instead of the system bundle.
    pub fn with_pinned_ca(mut self, ca_pem: &str) -> Result<Self, UpstreamError> {
        let config = mitm::pinned_roots_config(ca_pem)
            .map_err(|e| UpstreamError::Config(e.to_string()))?;
        self.tls_config = Some(config);
        Ok(self)
    }

    /// Bound the number of concurrently open tunnels through this hop.
    pub fn with_max_tunnels(mut self, max: usize) -> Self {
        self.tokens = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn host_with_port(&self) -> &str {
        &self.host_with_port
    }

    /// Traffic counters for this hop.
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Tokens currently available in the pool.
    pub fn available_tunnels(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Open a byte tunnel to `target` (`host:port`) through this hop.
    ///
    /// Waits for a concurrency token first; the returned [`Tunnel`] carries
    /// the token and releases it when dropped.
    pub async fn make_tunnel(
        self: &Arc<Self>,
        target: &str,
        connect_timeout: Duration,
    ) -> Result<Tunnel, UpstreamError> {
        let permit = Arc::clone(&self.tokens)
            .acquire_owned()
            .await
            .map_err(|_| UpstreamError::Config("token pool closed".to_string()))?;

        debug!(
            upstream = %self.host_with_port,
            kind = ?self.kind,
            target_host = %target,
            "opening upstream tunnel"
        );

        let tcp = dial(&self.host_with_port, connect_timeout)
            .await
            .map_err(UpstreamError::Dial)?;

        let mut hop: BoxedStream = match self.kind {
            ProxyKind::Http | ProxyKind::Socks5 => Box::new(tcp),
            ProxyKind::Https => {
                let config = self
                    .tls_config
                    .clone()
                    .unwrap_or_else(mitm::upstream_config);
                let server_name = ServerName::try_from(self.tls_server_name.clone())
                    .map_err(|e| UpstreamError::Config(format!("invalid TLS name: {e}")))?;
                let connector = TlsConnector::from(config);
                let tls = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(UpstreamError::Tls)?;
                Box::new(tls)
            }
        };

        let leftover = match self.kind {
            ProxyKind::Http | ProxyKind::Https => {
                self.negotiate_connect(&mut hop, target).await?
            }
            ProxyKind::Socks5 => {
                self.negotiate_socks5(&mut hop, target).await?;
                Bytes::new()
            }
        };

        Ok(Tunnel {
            stream: hop,
            leftover,
            _permit: permit,
        })
    }

    /// CONNECT negotiation for HTTP and HTTPS hops. Returns any bytes the
    /// hop sent past its response header block.
    async fn negotiate_connect(
        &self,
        hop: &mut BoxedStream,
        target: &str,
    ) -> Result<Bytes, UpstreamError> {
        let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
        if let Some((user, pass)) = &self.auth {
            let token = BASE64.encode(format!("{user}:{pass}"));
            request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
        }
        request.push_str("\r\n");
        hop.write_all(request.as_bytes()).await?;
        hop.flush().await?;

        // Collect the full response header block; anything past it already
        // belongs to the tunnel
        let mut response: Vec<u8> = Vec::with_capacity(256);
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            if let Some(end) = find_block_end(&response) {
                break end;
            }
            if response.len() > MAX_CONNECT_RESPONSE {
                return Err(UpstreamError::Malformed(
                    "oversized CONNECT response".to_string(),
                ));
            }
            let n = hop.read(&mut chunk).await?;
            if n == 0 {
                return Err(UpstreamError::Malformed(
                    "connection closed during CONNECT".to_string(),
                ));
            }
            response.extend_from_slice(&chunk[..n]);
        };

        let status = parse_status_code(&response)
            .ok_or_else(|| UpstreamError::Malformed("unreadable status line".to_string()))?;
        match status {
            200..=299 => Ok(Bytes::copy_from_slice(&response[header_end..])),
            407 => Err(UpstreamError::AuthRequired),
            other => Err(UpstreamError::Refused {
                reason: format!("status {other}"),
            }),
        }
    }

    /// RFC 1928 negotiation, with RFC 1929 user/pass when credentials are
    /// configured. Fixed-size reads only, so nothing can be over-read.
    async fn negotiate_socks5(
        &self,
        hop: &mut BoxedStream,
        target: &str,
    ) -> Result<(), UpstreamError> {
        let greeting = if self.auth.is_some() {
            vec![SOCKS_VERSION, 0x02, SOCKS_AUTH_NONE, SOCKS_AUTH_USERPASS]
        } else {
            vec![SOCKS_VERSION, 0x01, SOCKS_AUTH_NONE]
        };
        hop.write_all(&greeting).await?;

        let mut selection = [0u8; 2];
        hop.read_exact(&mut selection).await?;
        if selection[0] != SOCKS_VERSION {
            return Err(UpstreamError::Malformed(format!(
                "bad SOCKS version {:#04x}",
                selection[0]
            )));
        }
        match selection[1] {
            SOCKS_AUTH_NONE => {}
            SOCKS_AUTH_USERPASS => {
                let Some((user, pass)) = &self.auth else {
                    return Err(UpstreamError::AuthRequired);
                };
                let mut sub = Vec::with_capacity(3 + user.len() + pass.len());
                sub.push(0x01);
                sub.push(user.len() as u8);
                sub.extend_from_slice(user.as_bytes());
                sub.push(pass.len() as u8);
                sub.extend_from_slice(pass.as_bytes());
                hop.write_all(&sub).await?;

                let mut status = [0u8; 2];
                hop.read_exact(&mut status).await?;
                if status[1] != 0x00 {
                    return Err(UpstreamError::AuthRequired);
                }
            }
            SOCKS_AUTH_NO_ACCEPTABLE => return Err(UpstreamError::AuthRequired),
            other => {
                return Err(UpstreamError::Malformed(format!(
                    "unexpected auth method {other:#04x}"
                )))
            }
        }

        let mut request = vec![SOCKS_VERSION, SOCKS_CMD_CONNECT, 0x00];
        encode_socks_addr(&mut request, target)?;
        hop.write_all(&request).await?;

        let mut reply = [0u8; 4];
        hop.read_exact(&mut reply).await?;
        if reply[0] != SOCKS_VERSION {
            return Err(UpstreamError::Malformed(format!(
                "bad SOCKS version {:#04x} in reply",
                reply[0]
            )));
        }
        if reply[1] != 0x00 {
            return Err(UpstreamError::SocksRefused { code: reply[1] });
        }

        // Drain the bound address so the next bytes are tunnel payload
        match reply[3] {
            SOCKS_ATYP_IPV4 => {
                let mut bound = [0u8; 4 + 2];
                hop.read_exact(&mut bound).await?;
            }
            SOCKS_ATYP_IPV6 => {
                let mut bound = [0u8; 16 + 2];
                hop.read_exact(&mut bound).await?;
            }
            SOCKS_ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                hop.read_exact(&mut len).await?;
                let mut bound = vec![0u8; len[0] as usize + 2];
                hop.read_exact(&mut bound).await?;
            }
            other => {
                return Err(UpstreamError::Malformed(format!(
                    "unknown bound address type {other:#04x}"
                )))
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for UpstreamProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamProxy")
            .field("kind", &self.kind)
            .field("host_with_port", &self.host_with_port)
            .field("auth", &self.auth.is_some())
            .finish()
    }
}

/// Opaque byte stream through an upstream hop. Holds its concurrency token
/// until dropped.
pub struct Tunnel {
    stream: BoxedStream,
    leftover: Bytes,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("leftover_len", &self.leftover.len())
            .finish()
    }
}

impl AsyncRead for Tunnel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.leftover.is_empty() {
            let n = self.leftover.len().min(buf.remaining());
            let chunk = self.leftover.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Tunnel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

fn find_block_end(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

fn parse_status_code(response: &[u8]) -> Option<u16> {
    let line_end = response.iter().position(|&b| b == b'\n')?;
    let line = std::str::from_utf8(&response[..line_end]).ok()?;
    line.split_whitespace().nth(1)?.parse().ok()
}

fn encode_socks_addr(request: &mut Vec<u8>, target: &str) -> Result<(), UpstreamError> {
    let (host, port_str) = if let Some(rest) = target.strip_prefix('[') {
        let (inner, after) = rest
            .split_once(']')
            .ok_or_else(|| UpstreamError::Config(format!("bad target {target}")))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| UpstreamError::Config(format!("bad target {target}")))?;
        (inner, port)
    } else {
        target
            .rsplit_once(':')
            .ok_or_else(|| UpstreamError::Config(format!("bad target {target}")))?
    };
    let port: u16 = port_str
        .parse()
        .map_err(|_| UpstreamError::Config(format!("bad port in {target}")))?;

    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        request.push(SOCKS_ATYP_IPV4);
        request.extend_from_slice(&ip.octets());
    } else if let Ok(ip) = host.parse::<Ipv6Addr>() {
        request.push(SOCKS_ATYP_IPV6);
        request.extend_from_slice(&ip.octets());
    } else {
        if host.len() > 255 {
            return Err(UpstreamError::Config(format!(
                "domain too long for SOCKS5: {host}"
            )));
        }
        request.push(SOCKS_ATYP_DOMAIN);
        request.push(host.len() as u8);
        request.extend_from_slice(host.as_bytes());
    }
    request.extend_from_slice(&port.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_upstream_proxy() {
        let proxy = UpstreamProxy::new("localhost", 5080, ProxyKind::Http).unwrap();
        assert_eq!(proxy.kind(), ProxyKind::Http);
        assert_eq!(proxy.host_with_port(), "localhost:5080");
        assert_eq!(proxy.usage().incoming(), 0);
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(UpstreamProxy::new("", 1080, ProxyKind::Socks5).is_err());
    }

    #[test]
    fn test_max_tunnels_floor_of_one() {
        let proxy = UpstreamProxy::new("localhost", 1080, ProxyKind::Socks5)
            .unwrap()
            .with_max_tunnels(0);
        assert_eq!(proxy.available_tunnels(), 1);
    }

    #[test]
    fn test_encode_socks_addr_domain() {
        let mut buf = Vec::new();
        encode_socks_addr(&mut buf, "localhost:9999").unwrap();
        let mut expected = vec![SOCKS_ATYP_DOMAIN, 9];
        expected.extend_from_slice(b"localhost");
        expected.extend_from_slice(&9999u16.to_be_bytes());
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_encode_socks_addr_ipv4() {
        let mut buf = Vec::new();
        encode_socks_addr(&mut buf, "127.0.0.1:80").unwrap();
        assert_eq!(buf, vec![SOCKS_ATYP_IPV4, 127, 0, 0, 1, 0, 80]);
    }

    #[test]
    fn test_encode_socks_addr_ipv6() {
        let mut buf = Vec::new();
        encode_socks_addr(&mut buf, "[::1]:443").unwrap();
        assert_eq!(buf[0], SOCKS_ATYP_IPV6);
        assert_eq!(buf.len(), 1 + 16 + 2);
        assert_eq!(&buf[17..], &443u16.to_be_bytes());
    }

    #[test]
    fn test_parse_status_code() {
        assert_eq!(parse_status_code(b"HTTP/1.1 200 OK\r\n"), Some(200));
        assert_eq!(
            parse_status_code(b"HTTP/1.1 407 Proxy Authentication Required\r\n"),
            Some(407)
        );
        assert_eq!(parse_status_code(b"garbage\r\n"), None);
    }

    #[test]
    fn test_find_block_end() {
        assert_eq!(find_block_end(b"HTTP/1.1 200 OK\r\n\r\n"), Some(19));
        assert_eq!(find_block_end(b"HTTP/1.1 200 OK\r\n"), None);
        assert_eq!(find_block_end(b"HTTP/1.1 200 OK\r\n\r\nxx"), Some(19));
    }
}
