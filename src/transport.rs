//! Connection plumbing: dialing, byte pumps and stream adapters.

use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Byte stream usable on either side of the proxy.
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ProxyStream for T {}

/// Owned, type-erased connection handle.
pub type BoxedStream = Box<dyn ProxyStream>;

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// One direction of a tunnel failed mid-pump.
///
/// The byte count covers everything already written before the failure so
/// accounting stays exact on the error path.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("tunnel-read after {bytes} bytes: {source}")]
    Read {
        bytes: u64,
        #[source]
        source: io::Error,
    },

    #[error("tunnel-write after {bytes} bytes: {source}")]
    Write {
        bytes: u64,
        #[source]
        source: io::Error,
    },
}

impl ForwardError {
    /// Bytes successfully relayed before the failure.
    pub fn bytes(&self) -> u64 {
        match self {
            ForwardError::Read { bytes, .. } | ForwardError::Write { bytes, .. } => *bytes,
        }
    }
}

/// Open a TCP connection to `addr`, bounded by `connect_timeout`.
pub async fn dial(addr: &str, connect_timeout: Duration) -> io::Result<TcpStream> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {addr} timed out"),
        )),
    }
}

/// Pump bytes from `src` into `dst` until EOF or until no read or write
/// succeeds within `idle`.
///
/// Idle expiry counts as a clean close and returns the bytes relayed, like
/// EOF does. Only genuine I/O failures surface as [`ForwardError`].
pub async fn forward<S, D>(dst: &mut D, src: &mut S, idle: Duration) -> Result<u64, ForwardError>
where
    S: AsyncRead + Unpin + ?Sized,
    D: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = match timeout(idle, src.read(&mut buf)).await {
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(source)) => {
                return Err(ForwardError::Read {
                    bytes: copied,
                    source,
                })
            }
        };
        match timeout(idle, dst.write_all(&buf[..n])).await {
            Err(_) => break,
            Ok(Ok(())) => copied += n as u64,
            Ok(Err(source)) => {
                return Err(ForwardError::Write {
                    bytes: copied,
                    source,
                })
            }
        }
    }

    let _ = dst.flush().await;
    Ok(copied)
}

/// Stream wrapper replaying bytes that were buffered ahead of a protocol
/// switch (TLS handshake, tunnel start) before reading from the inner
/// stream again. Writes pass straight through.
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
