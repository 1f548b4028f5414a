//! Routing policy surface.
//!
//! Embedders steer the proxy through one capability trait. Every method has
//! a permissive default, so the unit implementation is an allow-all proxy
//! that never chains upstream and never decrypts.

use crate::host::HostInfo;
use crate::upstream::UpstreamProxy;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Per-connection and per-request routing decisions.
pub trait ProxyPolicy: Send + Sync {
    /// Gate incoming connections; returning false drops the socket before
    /// any bytes are read.
    fn allow_connection(&self, _peer: SocketAddr) -> bool {
        true
    }

    /// Whether a CONNECT to this `host:port` should be decrypted rather
    /// than tunneled opaquely.
    fn should_decrypt(&self, _host_with_port: &str) -> bool {
        false
    }

    /// Upstream proxy to chain through for this target, `None` for direct.
    /// `path` is absent for opaque CONNECT traffic.
    fn upstream_proxy(
        &self,
        _host: &HostInfo,
        _path: Option<&[u8]>,
    ) -> Option<Arc<UpstreamProxy>> {
        None
    }

    /// Best-effort, bounded-latency domain resolution. `None` leaves
    /// resolution to the dialer.
    fn lookup_ip(&self, _domain: &str) -> Option<IpAddr> {
        None
    }
}

/// Allow-all, direct, no-decrypt policy.
pub struct DirectPolicy;

impl ProxyPolicy for DirectPolicy {}
