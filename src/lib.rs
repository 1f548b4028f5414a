//! Wiretap - Forward HTTP/HTTPS Proxy with TLS Interception
//!
//! Wiretap is a forward proxy library built for embedding: it relays plain
//! HTTP with single-hop headers stripped, tunnels CONNECT traffic opaquely,
//! and can terminate TLS with dynamically minted leaf certificates to let
//! the embedder observe or synthesize decrypted exchanges.
//!
//! ## Features
//!
//! - **Plain HTTP relaying**: permissive streaming header rewriter with
//!   correct body framing (Content-Length, chunked, identity)
//! - **CONNECT tunnels**: opaque bidirectional pumps with idle timeouts
//! - **TLS interception**: per-SNI leaf minting from a configured CA
//! - **Upstream chaining**: HTTP, HTTPS (optionally pinned CA) and SOCKS5
//!   hops with bounded per-hop concurrency
//! - **Traffic accounting**: lock-free per-direction byte counters
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wiretap::Proxy;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     wiretap::logger::init("wiretap=info");
//!
//!     let proxy = Proxy::builder().build();
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     proxy.serve(listener).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `session` - per-connection protocol state machine
//! - `header` - streaming header scanner and rewriter
//! - `upstream` - chained proxy client (HTTP/HTTPS/SOCKS5)
//! - `mitm` - CA handling, leaf minting, interception TLS configs
//! - `transport` - dialing, byte pumps, stream adapters
//! - `policy` / `hijack` - embedder capability surfaces

// Core proxy modules
pub mod config;
pub mod logger;
pub mod server;
pub mod session;

// Protocol plumbing
pub mod buffer;
pub mod header;
pub mod host;
pub mod pool;
pub mod transport;
pub mod upstream;

// Embedder surfaces
pub mod hijack;
pub mod policy;

// TLS interception
pub mod mitm;

// Accounting
pub mod usage;

// Re-export commonly used types

/// Server entry points
pub use server::{Proxy, ProxyBuilder};

/// Configuration
pub use config::ProxyConfig;

/// Routing policy
pub use policy::{DirectPolicy, ProxyPolicy};

/// Hijack hooks
pub use hijack::{HijackedResponse, Hijacker, HijackerPool, NoopHijacker, NoopHijackerPool};

/// Header scanning
pub use header::{BodyFraming, Header, HeaderError};

/// Host parsing
pub use host::{HostInfo, DEFAULT_HTTP_PORT, DEFAULT_TLS_PORT};

/// Staging buffers
pub use buffer::{FixedBuffer, ShortBuffer};

/// Upstream proxies
pub use upstream::{ProxyKind, Tunnel, UpstreamError, UpstreamProxy};

/// Byte pumps
pub use transport::{forward, ForwardError};

/// Interception
pub use mitm::{generate_ca, CertMinter, MinterConfig, MitmError};

/// Session errors
pub use session::SessionError;

/// Traffic counters
pub use usage::{Usage, UsageSnapshot};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
