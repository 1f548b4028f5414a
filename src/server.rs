//! Proxy server: builder and accept loop.

use crate::config::ProxyConfig;
use crate::hijack::{HijackerPool, NoopHijackerPool};
use crate::mitm::{self, CertMinter, MinterConfig};
use crate::policy::{DirectPolicy, ProxyPolicy};
use crate::pool::BufferPool;
use crate::session::{SessionConfig, SessionHandler};
use crate::usage::{Usage, UsageSnapshot};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const DEFAULT_HEADER_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configures a [`Proxy`].
///
/// Everything has a working default: the unit build is an allow-all,
/// direct, non-decrypting proxy. Interception turns on when a
/// [`CertMinter`] is supplied.
pub struct ProxyBuilder {
    policy: Arc<dyn ProxyPolicy>,
    hijackers: Arc<dyn HijackerPool>,
    minter: Option<Arc<CertMinter>>,
    origin_tls: Option<Arc<rustls::ClientConfig>>,
    header_buffer_size: usize,
    idle_timeout: Duration,
    connect_timeout: Duration,
}

impl ProxyBuilder {
    pub fn new() -> Self {
        Self {
            policy: Arc::new(DirectPolicy),
            hijackers: Arc::new(NoopHijackerPool),
            minter: None,
            origin_tls: None,
            header_buffer_size: DEFAULT_HEADER_BUFFER_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Install the routing policy.
    pub fn policy(mut self, policy: Arc<dyn ProxyPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Install the per-request hijacker pool.
    pub fn hijacker_pool(mut self, pool: Arc<dyn HijackerPool>) -> Self {
        self.hijackers = pool;
        self
    }

    /// Enable interception with this CA. Without a minter every CONNECT is
    /// tunneled opaquely regardless of policy.
    pub fn mitm(mut self, minter: Arc<CertMinter>) -> Self {
        self.minter = Some(minter);
        self
    }

    /// Override the TLS config used for onward origin connections on
    /// decrypted tunnels. Defaults to the Mozilla root bundle.
    pub fn origin_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.origin_tls = Some(config);
        self
    }

    /// Capacity of the staging buffer for one rewritten header block.
    pub fn header_buffer_size(mut self, size: usize) -> Self {
        self.header_buffer_size = size.max(256);
        self
    }

    /// Tunnel idle timeout; an idle expiry closes the tunnel cleanly.
    pub fn idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    /// Dial timeout for origin and upstream-hop connections.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> Proxy {
        let handler = SessionHandler {
            policy: self.policy,
            hijackers: self.hijackers,
            minter: self.minter,
            origin_tls: self.origin_tls.unwrap_or_else(mitm::upstream_config),
            usage: Arc::new(Usage::new()),
            buffers: Arc::new(BufferPool::new(self.header_buffer_size)),
            config: SessionConfig {
                idle_timeout: self.idle_timeout,
                connect_timeout: self.connect_timeout,
            },
        };
        Proxy {
            handler: Arc::new(handler),
        }
    }
}

impl Default for ProxyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward proxy instance. Cheap to clone; clones share counters, pools
/// and the CA.
#[derive(Clone)]
pub struct Proxy {
    handler: Arc<SessionHandler>,
}

impl Proxy {
    pub fn builder() -> ProxyBuilder {
        ProxyBuilder::new()
    }

    /// Build from environment-driven configuration. Interception is enabled
    /// when both CA paths are configured.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let mut builder = Proxy::builder()
            .header_buffer_size(config.header_buffer_size)
            .idle_timeout(config.idle_timeout())
            .connect_timeout(config.connect_timeout());

        if let (Some(cert_path), Some(key_path)) =
            (&config.mitm_ca_cert_path, &config.mitm_ca_key_path)
        {
            let cert_pem = std::fs::read_to_string(cert_path)?;
            let key_pem = std::fs::read_to_string(key_path)?;
            let minter = CertMinter::from_pem_with_config(
                &cert_pem,
                &key_pem,
                MinterConfig {
                    cache_size: config.cert_cache_size,
                    validity_days: config.cert_validity_days,
                    ..MinterConfig::default()
                },
            )?;
            builder = builder.mitm(Arc::new(minter));
        }

        Ok(builder.build())
    }

    /// Aggregate client-side traffic counters.
    pub fn usage(&self) -> UsageSnapshot {
        self.handler.usage.snapshot()
    }

    /// Accept connections from `listener` until it fails. Each accepted
    /// connection runs as its own task.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "proxy listening");

        loop {
            let (stream, peer) = listener.accept().await?;

            if !self.handler.policy.allow_connection(peer) {
                debug!(peer = %peer, "connection rejected by policy");
                continue;
            }

            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                debug!(peer = %peer, "session started");
                match handler.run(Box::new(stream), peer).await {
                    Ok(()) => debug!(peer = %peer, "session finished"),
                    Err(e) if e.is_benign() => {
                        debug!(peer = %peer, reason = %e, "session closed")
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "session failed"),
                }
            });
        }
    }
}
