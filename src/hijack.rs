//! Per-request hijack hooks.
//!
//! A hijacker rides along with one request/response exchange. It can watch
//! the rewritten header blocks as they pass through, or take over the
//! exchange entirely by synthesizing the response, in which case the origin
//! is never contacted. Hijackers come from a pool so embedders can recycle
//! per-request state; the pool must tolerate concurrent get/put.

use std::net::SocketAddr;
use tokio::io::AsyncRead;

/// Reader producing a complete, already-framed HTTP response.
pub type HijackedResponse = Box<dyn AsyncRead + Send + Unpin>;

/// Hook observing or replacing a single exchange.
pub trait Hijacker: Send {
    /// Return a synthetic response to short-circuit origin I/O entirely.
    /// Consulted once, before the origin connection is opened.
    fn hijack_response(&mut self) -> Option<HijackedResponse> {
        None
    }

    /// Observe the rewritten request before it is forwarded.
    fn on_request(&mut self, _start_line: &[u8], _header_block: &[u8]) {}

    /// Observe the origin response before it is relayed to the client.
    fn on_response(&mut self, _status_line: &[u8], _header_block: &[u8]) {}
}

/// Source of hijackers, one per request.
pub trait HijackerPool: Send + Sync {
    fn get(
        &self,
        peer: SocketAddr,
        host_with_port: &str,
        method: &[u8],
        path: &[u8],
    ) -> Box<dyn Hijacker>;

    fn put(&self, hijacker: Box<dyn Hijacker>);
}

/// Hijacker that watches nothing and synthesizes nothing.
pub struct NoopHijacker;

impl Hijacker for NoopHijacker {}

/// Default pool handing out [`NoopHijacker`]s.
pub struct NoopHijackerPool;

impl HijackerPool for NoopHijackerPool {
    fn get(
        &self,
        _peer: SocketAddr,
        _host_with_port: &str,
        _method: &[u8],
        _path: &[u8],
    ) -> Box<dyn Hijacker> {
        Box::new(NoopHijacker)
    }

    fn put(&self, _hijacker: Box<dyn Hijacker>) {}
}
