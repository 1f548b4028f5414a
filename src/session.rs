//! Per-connection protocol state machine.
//!
//! Each accepted client connection is driven by one session task. The
//! session reads the request line, then either relays plain HTTP requests
//! (optionally through an upstream proxy) with single-hop headers stripped,
//! or handles CONNECT by tunneling opaquely or terminating TLS with a
//! minted leaf and restarting the loop on the decrypted stream.

use crate::header::{read_line_bounded, BodyFraming, Header, HeaderError, LineRead};
use crate::hijack::{Hijacker, HijackerPool};
use crate::host::{HostInfo, DEFAULT_HTTP_PORT, DEFAULT_TLS_PORT};
use crate::mitm::{self, CertMinter, MitmError};
use crate::policy::ProxyPolicy;
use crate::pool::BufferPool;
use crate::transport::{self, BoxedStream, ForwardError};
use crate::upstream::{UpstreamError, UpstreamProxy};
use crate::usage::Usage;
use bytes::Bytes;
use rustls::pki_types::ServerName;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

const TUNNEL_OK: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";
const TUNNEL_BAD_GATEWAY: &[u8] = b"HTTP/1.1 501 Bad Gateway\r\n\r\n";

const MAX_START_LINE: usize = 8 * 1024;
const READER_BUFFER_SIZE: usize = 8 * 1024;

/// Session-terminating failures, wrapped with the phase they arose in.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Routing produced no usable target; the connection closes silently.
    #[error("session unavailable")]
    Unavailable,

    #[error("malformed request line")]
    BadRequest,

    /// CONNECT arrived on an already-decrypted stream.
    #[error("CONNECT not allowed on a decrypted stream")]
    NestedConnect,

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Mitm(#[from] MitmError),

    #[error("tls handshake: {0}")]
    TlsHandshake(#[source] io::Error),

    /// The decrypting handshake finished without a server name.
    #[error("client provided no target server name")]
    NoServerName,

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("session I/O: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Errors that are everyday connection churn, not operational problems.
    pub(crate) fn is_benign(&self) -> bool {
        matches!(
            self,
            SessionError::Unavailable | SessionError::Header(HeaderError::UnexpectedEof)
        )
    }
}

/// Tunables shared by every session.
#[derive(Debug, Clone)]
pub(crate) struct SessionConfig {
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Shared state driving all sessions of one proxy instance.
pub(crate) struct SessionHandler {
    pub policy: Arc<dyn ProxyPolicy>,
    pub hijackers: Arc<dyn HijackerPool>,
    pub minter: Option<Arc<CertMinter>>,
    pub origin_tls: Arc<rustls::ClientConfig>,
    pub usage: Arc<Usage>,
    pub buffers: Arc<BufferPool>,
    pub config: SessionConfig,
}

/// Set once a CONNECT has been decrypted; requests on the inner stream are
/// origin-form and the origin leg is TLS.
struct DecryptedContext {
    host: HostInfo,
    server_name: String,
}

/// Parsed request line plus its raw bytes for verbatim relay.
struct RequestLine {
    raw: Vec<u8>,
    method: String,
    target: String,
    version: String,
}

impl RequestLine {
    fn parse(raw: Vec<u8>) -> Result<Self, SessionError> {
        let text = std::str::from_utf8(&raw).map_err(|_| SessionError::BadRequest)?;
        let mut parts = text.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) => (m.to_string(), t.to_string(), v.to_string()),
            _ => return Err(SessionError::BadRequest),
        };
        Ok(Self {
            raw,
            method,
            target,
            version,
        })
    }
}

/// Byte counters finalized when the exchange tears down, on every path.
struct Accounting {
    usage: Arc<Usage>,
    upstream: Option<Arc<UpstreamProxy>>,
    incoming: u64,
    outgoing: u64,
    upstream_incoming: u64,
    upstream_outgoing: u64,
}

impl Accounting {
    fn new(usage: Arc<Usage>) -> Self {
        Self {
            usage,
            upstream: None,
            incoming: 0,
            outgoing: 0,
            upstream_incoming: 0,
            upstream_outgoing: 0,
        }
    }
}

impl Drop for Accounting {
    fn drop(&mut self) {
        self.usage.add_incoming(self.incoming);
        self.usage.add_outgoing(self.outgoing);
        if let Some(upstream) = &self.upstream {
            upstream.usage().add_incoming(self.upstream_incoming);
            upstream.usage().add_outgoing(self.upstream_outgoing);
        }
    }
}

/// Returns a borrowed hijacker to its pool on every exit path.
struct PooledHijacker {
    pool: Arc<dyn HijackerPool>,
    hijacker: Option<Box<dyn Hijacker>>,
}

impl PooledHijacker {
    fn get(
        pool: &Arc<dyn HijackerPool>,
        peer: SocketAddr,
        host: &str,
        method: &[u8],
        path: &[u8],
    ) -> Self {
        Self {
            pool: Arc::clone(pool),
            hijacker: Some(pool.get(peer, host, method, path)),
        }
    }

    fn as_mut(&mut self) -> &mut dyn Hijacker {
        self.hijacker
            .as_deref_mut()
            .expect("hijacker present until drop")
    }
}

impl Drop for PooledHijacker {
    fn drop(&mut self) {
        if let Some(hijacker) = self.hijacker.take() {
            self.pool.put(hijacker);
        }
    }
}

impl SessionHandler {
    /// Drive one client connection to completion.
    pub async fn run(self: Arc<Self>, stream: BoxedStream, peer: SocketAddr) -> Result<(), SessionError> {
        self.serve_requests(stream, peer, None).await
    }

    /// Request loop over one (possibly decrypted) client stream.
    async fn serve_requests(
        &self,
        stream: BoxedStream,
        peer: SocketAddr,
        decrypted: Option<DecryptedContext>,
    ) -> Result<(), SessionError> {
        let mut client = BufReader::with_capacity(READER_BUFFER_SIZE, stream);

        loop {
            let mut line = Vec::with_capacity(256);
            match read_line_bounded(&mut client, &mut line, MAX_START_LINE).await? {
                LineRead::Line => {}
                LineRead::Eof if line.is_empty() => return Ok(()),
                LineRead::Eof => return Err(HeaderError::UnexpectedEof.into()),
                LineRead::TooLong => return Err(SessionError::BadRequest),
            }

            let request_line = RequestLine::parse(line)?;
            if request_line.method == "CONNECT" {
                if decrypted.is_some() {
                    return Err(SessionError::NestedConnect);
                }
                return self.handle_connect(client, peer, request_line).await;
            }

            let keep_alive = self
                .proxy_exchange(&mut client, peer, &request_line, decrypted.as_ref())
                .await?;
            if !keep_alive {
                // Graceful close so TLS clients get their close_notify
                let _ = client.shutdown().await;
                return Ok(());
            }
        }
    }

    /// One plain-HTTP request/response exchange. Returns whether the client
    /// connection stays open for the next request.
    async fn proxy_exchange(
        &self,
        client: &mut BufReader<BoxedStream>,
        peer: SocketAddr,
        request_line: &RequestLine,
        decrypted: Option<&DecryptedContext>,
    ) -> Result<bool, SessionError> {
        let mut acct = Accounting::new(Arc::clone(&self.usage));
        acct.incoming += request_line.raw.len() as u64;

        let mut req_header = Header::new();
        let mut req_block = self.buffers.acquire();
        let consumed = req_header.parse_fields(client, &mut req_block).await?;
        acct.incoming += consumed as u64;

        // Target: CONNECT context supplies the host on decrypted streams,
        // otherwise the absolute-form URI carries it
        let (mut host, path) = match decrypted {
            Some(ctx) => (ctx.host.clone(), request_line.target.clone()),
            None => split_absolute_uri(&request_line.target).unwrap_or_default(),
        };
        if host.host_with_port().is_empty() {
            return Err(SessionError::Unavailable);
        }

        let mut hijacker = PooledHijacker::get(
            &self.hijackers,
            peer,
            host.host_with_port(),
            request_line.method.as_bytes(),
            path.as_bytes(),
        );
        if let Some(mut synthetic) = hijacker.as_mut().hijack_response() {
            debug!(
                target_host = %host.host_with_port(),
                "serving hijacked response"
            );
            let written = tokio::io::copy(&mut synthetic, client).await?;
            client.flush().await?;
            acct.outgoing += written;
            return Ok(false);
        }
        hijacker
            .as_mut()
            .on_request(&request_line.raw, req_block.as_slice());

        if !host.domain().is_empty() {
            if let Some(ip) = self.policy.lookup_ip(host.domain()) {
                host.set_ip(ip);
            }
        }

        let upstream = self.policy.upstream_proxy(&host, Some(path.as_bytes()));
        if let Some(up) = &upstream {
            acct.upstream = Some(Arc::clone(up));
        }

        // Origin connection: direct dial or a tunnel through the hop, then
        // TLS on top when the client side was decrypted
        let origin_stream: BoxedStream = match &upstream {
            Some(up) => Box::new(up.make_tunnel(&host.target_addr(), self.config.connect_timeout).await?),
            None => {
                let target = host.target_addr();
                let tcp = transport::dial(&target, self.config.connect_timeout)
                    .await
                    .map_err(|source| SessionError::Dial { target, source })?;
                Box::new(tcp)
            }
        };
        let origin_stream: BoxedStream = match decrypted {
            Some(ctx) => {
                let server_name = ServerName::try_from(ctx.server_name.clone())
                    .map_err(|_| SessionError::NoServerName)?;
                let connector = TlsConnector::from(Arc::clone(&self.origin_tls));
                let tls = connector
                    .connect(server_name, origin_stream)
                    .await
                    .map_err(SessionError::TlsHandshake)?;
                Box::new(tls)
            }
            None => origin_stream,
        };
        let mut origin = BufReader::with_capacity(READER_BUFFER_SIZE, origin_stream);

        // Relay the request: original start line toward an upstream hop,
        // origin-form when we terminate at the origin ourselves
        let start_line: Vec<u8> = if upstream.is_some() && decrypted.is_none() {
            request_line.raw.clone()
        } else {
            origin_form_line(request_line, &path)
        };
        origin.write_all(&start_line).await?;
        origin.write_all(req_block.as_slice()).await?;
        let mut sent = (start_line.len() + req_block.len()) as u64;
        if req_block.is_empty() {
            origin.write_all(b"\r\n").await?;
            sent += 2;
        }
        let body_sent = copy_body(req_header.framing(), client, &mut origin).await?;
        origin.flush().await?;
        acct.incoming += body_sent;
        acct.upstream_outgoing += sent + body_sent;

        // Read the origin response symmetrically
        let mut status_line = Vec::with_capacity(128);
        match read_line_bounded(&mut origin, &mut status_line, MAX_START_LINE).await? {
            LineRead::Line => {}
            _ => return Err(HeaderError::UnexpectedEof.into()),
        }
        let mut resp_header = Header::new();
        let mut resp_block = self.buffers.acquire();
        let resp_consumed = resp_header.parse_fields(&mut origin, &mut resp_block).await?;
        hijacker
            .as_mut()
            .on_response(&status_line, resp_block.as_slice());

        client.write_all(&status_line).await?;
        client.write_all(resp_block.as_slice()).await?;
        let mut returned = (status_line.len() + resp_block.len()) as u64;
        if resp_block.is_empty() {
            client.write_all(b"\r\n").await?;
            returned += 2;
        }
        let body_returned = copy_body(resp_header.framing(), &mut origin, client).await?;
        client.flush().await?;
        acct.outgoing += returned + body_returned;
        acct.upstream_incoming += (status_line.len() + resp_consumed) as u64 + body_returned;

        debug!(
            target_host = %host.host_with_port(),
            sent = sent + body_sent,
            returned = returned + body_returned,
            "exchange complete"
        );

        Ok(!(req_header.is_connection_close() || resp_header.is_connection_close()))
    }

    /// CONNECT dispatch: decrypt when policy and CA allow it, tunnel raw
    /// bytes otherwise.
    async fn handle_connect(
        &self,
        mut client: BufReader<BoxedStream>,
        peer: SocketAddr,
        request_line: RequestLine,
    ) -> Result<(), SessionError> {
        // CONNECT headers are for this hop only; consume and drop them
        let mut line = Vec::with_capacity(128);
        loop {
            line.clear();
            match read_line_bounded(&mut client, &mut line, MAX_START_LINE).await? {
                LineRead::Line => {}
                _ => return Err(HeaderError::UnexpectedEof.into()),
            }
            if line == b"\r\n" || line == b"\n" {
                break;
            }
        }

        let host = HostInfo::parse(&request_line.target, DEFAULT_TLS_PORT);
        if host.host_with_port().is_empty() {
            return Err(SessionError::Unavailable);
        }

        let decrypt = self.policy.should_decrypt(host.host_with_port());
        match (&self.minter, decrypt) {
            (Some(minter), true) => {
                self.decrypt_connect(client, peer, host, Arc::clone(minter))
                    .await
            }
            _ => self.tunnel_connect(client, host).await,
        }
    }

    /// Opaque CONNECT tunnel: reply, then pump bytes both ways until both
    /// directions finish.
    async fn tunnel_connect(
        &self,
        client: BufReader<BoxedStream>,
        mut host: HostInfo,
    ) -> Result<(), SessionError> {
        let mut acct = Accounting::new(Arc::clone(&self.usage));
        let upstream = self.policy.upstream_proxy(&host, None);

        if upstream.is_some() && !host.domain().is_empty() {
            if let Some(ip) = self.policy.lookup_ip(host.domain()) {
                host.set_ip(ip);
            }
        }

        let mut client = rewind_reader(client);

        let origin = match &upstream {
            Some(up) => {
                acct.upstream = Some(Arc::clone(up));
                up.make_tunnel(&host.target_addr(), self.config.connect_timeout)
                    .await
                    .map(|tunnel| Box::new(tunnel) as BoxedStream)
                    .map_err(SessionError::from)
            }
            None => {
                let target = host.host_with_port().to_string();
                transport::dial(&target, self.config.connect_timeout)
                    .await
                    .map(|tcp| Box::new(tcp) as BoxedStream)
                    .map_err(|source| SessionError::Dial { target, source })
            }
        };

        let origin = match origin {
            Ok(origin) => origin,
            Err(e) => {
                // The client still gets a well-formed refusal
                let _ = client.write_all(TUNNEL_BAD_GATEWAY).await;
                acct.outgoing += TUNNEL_BAD_GATEWAY.len() as u64;
                return Err(e);
            }
        };

        client.write_all(TUNNEL_OK).await?;
        acct.outgoing += TUNNEL_OK.len() as u64;

        debug!(target_host = %host.host_with_port(), "tunnel established");

        let idle = self.config.idle_timeout;
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut origin_read, mut origin_write) = tokio::io::split(origin);
        let (to_origin, to_client) = tokio::join!(
            transport::forward(&mut origin_write, &mut client_read, idle),
            transport::forward(&mut client_write, &mut origin_read, idle),
        );

        let sent = to_origin.as_ref().map(|b| *b).unwrap_or_else(ForwardError::bytes);
        let returned = to_client.as_ref().map(|b| *b).unwrap_or_else(ForwardError::bytes);
        acct.incoming += sent;
        acct.outgoing += returned;
        acct.upstream_outgoing += sent;
        acct.upstream_incoming += returned;

        to_origin?;
        to_client?;
        Ok(())
    }

    /// Decrypting CONNECT: impersonate the origin with a minted leaf, then
    /// restart the request loop on the decrypted stream.
    fn decrypt_connect<'a>(
        &'a self,
        client: BufReader<BoxedStream>,
        peer: SocketAddr,
        host: HostInfo,
        minter: Arc<CertMinter>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), SessionError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut client = rewind_reader(client);

            // Fail before touching the client if the CA cannot sign for this
            // target at all
            let connect_name = host.server_name().ok_or_else(|| {
                MitmError::InvalidHost(host.host_with_port().to_string())
            });
            let premint = match connect_name {
                Ok(name) => minter.mint(&name).map(|_| ()).map_err(SessionError::from),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = premint {
                let _ = client.write_all(TUNNEL_BAD_GATEWAY).await;
                self.usage.add_outgoing(TUNNEL_BAD_GATEWAY.len() as u64);
                return Err(e);
            }

            client.write_all(TUNNEL_OK).await?;
            self.usage.add_outgoing(TUNNEL_OK.len() as u64);

            // The handshake mints the leaf for whatever name the hello carries
            let acceptor = TlsAcceptor::from(mitm::client_facing_config(minter));
            let tls = acceptor
                .accept(client)
                .await
                .map_err(SessionError::TlsHandshake)?;

            let server_name = match tls.get_ref().1.server_name() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => return Err(SessionError::NoServerName),
            };

            debug!(
                target_host = %host.host_with_port(),
                server_name = %server_name,
                "decrypting tunnel"
            );

            let context = DecryptedContext { host, server_name };
            self.serve_requests(Box::new(tls), peer, Some(context)).await
        })
    }
}

/// Recover buffered-but-unconsumed bytes from a reader so the raw stream
/// can change protocols without losing them.
fn rewind_reader(reader: BufReader<BoxedStream>) -> transport::Rewind<BoxedStream> {
    let leftover = Bytes::copy_from_slice(reader.buffer());
    transport::Rewind::new(leftover, reader.into_inner())
}

/// Split an absolute-form request target into host info and path.
fn split_absolute_uri(target: &str) -> Option<(HostInfo, String)> {
    let (rest, default_port) = if let Some(rest) = target.strip_prefix("http://") {
        (rest, DEFAULT_HTTP_PORT)
    } else if let Some(rest) = target.strip_prefix("https://") {
        (rest, DEFAULT_TLS_PORT)
    } else {
        return None;
    };
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], rest[i..].to_string()),
        None => (rest, "/".to_string()),
    };
    Some((HostInfo::parse(authority, default_port), path))
}

fn origin_form_line(request_line: &RequestLine, path: &str) -> Vec<u8> {
    format!(
        "{} {} {}\r\n",
        request_line.method, path, request_line.version
    )
    .into_bytes()
}

/// Relay one message body according to its framing, returning the bytes
/// copied.
async fn copy_body<R, W>(framing: BodyFraming, src: &mut R, dst: &mut W) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match framing {
        BodyFraming::None => Ok(0),
        BodyFraming::FixedLength(length) => copy_exact(src, dst, length).await,
        BodyFraming::Identity => tokio::io::copy(src, dst).await,
        BodyFraming::Chunked => copy_chunked(src, dst).await,
    }
}

async fn copy_exact<R, W>(src: &mut R, dst: &mut W, length: u64) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut limited = src.take(length);
    let copied = tokio::io::copy(&mut limited, dst).await?;
    if copied != length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("body ended after {copied} of {length} bytes"),
        ));
    }
    Ok(copied)
}

/// Relay a chunked body verbatim, tracking chunk sizes to find the end of
/// the message (terminal chunk plus trailer section).
async fn copy_chunked<R, W>(src: &mut R, dst: &mut W) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut line = Vec::with_capacity(32);

    loop {
        line.clear();
        match read_line_bounded(src, &mut line, MAX_START_LINE).await? {
            LineRead::Line => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "chunked body truncated",
                ))
            }
        }
        dst.write_all(&line).await?;
        total += line.len() as u64;

        let size = parse_chunk_size(&line).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "bad chunk size line")
        })?;

        if size == 0 {
            // Trailer section runs to the next empty line
            loop {
                line.clear();
                match read_line_bounded(src, &mut line, MAX_START_LINE).await? {
                    LineRead::Line => {}
                    _ => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "chunked trailers truncated",
                        ))
                    }
                }
                dst.write_all(&line).await?;
                total += line.len() as u64;
                if line == b"\r\n" || line == b"\n" {
                    return Ok(total);
                }
            }
        }

        // Chunk payload plus its trailing CRLF
        total += copy_exact(src, dst, size + 2).await?;
    }
}

fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(line).ok()?.trim();
    let size_part = text.split(';').next()?.trim();
    u64::from_str_radix(size_part, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_request_line_parse() {
        let line = RequestLine::parse(b"GET http://example.com/ HTTP/1.1\r\n".to_vec()).unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.target, "http://example.com/");
        assert_eq!(line.version, "HTTP/1.1");
    }

    #[test]
    fn test_request_line_rejects_garbage() {
        assert!(RequestLine::parse(b"GET\r\n".to_vec()).is_err());
        assert!(RequestLine::parse(vec![0xff, 0xfe, b'\n']).is_err());
    }

    #[test]
    fn test_split_absolute_uri() {
        let (host, path) = split_absolute_uri("http://example.com/a?b=c").unwrap();
        assert_eq!(host.host_with_port(), "example.com:80");
        assert_eq!(path, "/a?b=c");

        let (host, path) = split_absolute_uri("http://example.com:8080").unwrap();
        assert_eq!(host.host_with_port(), "example.com:8080");
        assert_eq!(path, "/");

        let (host, _) = split_absolute_uri("https://example.com/").unwrap();
        assert_eq!(host.host_with_port(), "example.com:443");

        assert!(split_absolute_uri("/origin-form").is_none());
    }

    #[test]
    fn test_origin_form_line() {
        let line = RequestLine::parse(b"GET http://example.com/x HTTP/1.1\r\n".to_vec()).unwrap();
        assert_eq!(origin_form_line(&line, "/x"), b"GET /x HTTP/1.1\r\n");
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size(b"1a\r\n"), Some(26));
        assert_eq!(parse_chunk_size(b"0\r\n"), Some(0));
        assert_eq!(parse_chunk_size(b"5;ext=1\r\n"), Some(5));
        assert_eq!(parse_chunk_size(b"zz\r\n"), None);
    }

    #[tokio::test]
    async fn test_copy_body_fixed_length() {
        let mut src = BufReader::new(Cursor::new(b"hello, world".to_vec()));
        let mut dst = Vec::new();
        let copied = copy_body(BodyFraming::FixedLength(5), &mut src, &mut dst)
            .await
            .unwrap();
        assert_eq!(copied, 5);
        assert_eq!(dst, b"hello");
    }

    #[tokio::test]
    async fn test_copy_body_fixed_length_truncated() {
        let mut src = BufReader::new(Cursor::new(b"hi".to_vec()));
        let mut dst = Vec::new();
        let err = copy_body(BodyFraming::FixedLength(5), &mut src, &mut dst)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_copy_body_chunked_verbatim() {
        let body = b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n".to_vec();
        let mut src = BufReader::new(Cursor::new(body.clone()));
        let mut dst = Vec::new();
        let copied = copy_body(BodyFraming::Chunked, &mut src, &mut dst)
            .await
            .unwrap();
        assert_eq!(copied, body.len() as u64);
        assert_eq!(dst, body);
    }

    #[tokio::test]
    async fn test_copy_body_chunked_with_trailers() {
        let body = b"3\r\nabc\r\n0\r\nX-Sum: 1\r\n\r\n".to_vec();
        let mut src = BufReader::new(Cursor::new(body.clone()));
        let mut dst = Vec::new();
        copy_body(BodyFraming::Chunked, &mut src, &mut dst)
            .await
            .unwrap();
        assert_eq!(dst, body);
    }

    #[tokio::test]
    async fn test_copy_body_identity_reads_to_eof() {
        let mut src = BufReader::new(Cursor::new(b"stream until eof".to_vec()));
        let mut dst = Vec::new();
        let copied = copy_body(BodyFraming::Identity, &mut src, &mut dst)
            .await
            .unwrap();
        assert_eq!(copied, 16);
    }

    #[tokio::test]
    async fn test_copy_body_none_copies_nothing() {
        let mut src = BufReader::new(Cursor::new(b"left alone".to_vec()));
        let mut dst = Vec::new();
        assert_eq!(copy_body(BodyFraming::None, &mut src, &mut dst).await.unwrap(), 0);
        assert!(dst.is_empty());
    }
}
