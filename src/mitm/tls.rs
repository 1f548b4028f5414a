//! TLS configurations for interception.
//!
//! Two sides are configured here:
//! - client-facing TLS, where the proxy impersonates the origin with a leaf
//!   minted for the server name in the client hello
//! - upstream TLS, where the proxy connects onward to the real origin with
//!   full verification against the Mozilla root bundle (plus any extra
//!   roots the embedder supplies)

use super::error::{MitmError, Result};
use super::minter::CertMinter;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::version::{TLS12, TLS13};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::sync::Arc;
use tracing::{info, warn};
use webpki_roots::TLS_SERVER_ROOTS;

// Only HTTP/1.1 is spoken on decrypted streams
const ALPN_HTTP1: &[u8] = b"http/1.1";

/// Cert resolver minting a leaf per handshake from the client hello SNI.
struct MintingResolver {
    minter: Arc<CertMinter>,
}

impl std::fmt::Debug for MintingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintingResolver").finish()
    }
}

impl ResolvesServerCert for MintingResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name()?;
        match self.minter.mint(server_name) {
            Ok(certified) => Some(certified),
            Err(e) => {
                warn!(
                    server_name = %server_name,
                    error = %e,
                    "leaf minting failed during handshake"
                );
                None
            }
        }
    }
}

/// Server config impersonating origins with minted leaves.
pub fn client_facing_config(minter: Arc<CertMinter>) -> Arc<ServerConfig> {
    let mut config = ServerConfig::builder_with_protocol_versions(&[&TLS12, &TLS13])
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(MintingResolver { minter }));
    config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];
    Arc::new(config)
}

/// Client config for onward origin connections, trusting the Mozilla
/// root bundle.
pub fn upstream_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(TLS_SERVER_ROOTS.iter().cloned());
    finish_client_config(roots)
}

/// Client config trusting the Mozilla bundle plus extra PEM roots.
/// Embedders use this when origins sit behind a private CA.
pub fn upstream_config_with_roots(extra_roots_pem: &str) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(TLS_SERVER_ROOTS.iter().cloned());
    for cert in parse_pem_certs(extra_roots_pem)? {
        roots
            .add(cert)
            .map_err(|e| MitmError::ca_load(format!("failed to add extra root: {e}")))?;
    }
    Ok(finish_client_config(roots))
}

/// Client config trusting exactly the given PEM roots. Used for upstream
/// proxies with a pinned CA.
pub fn pinned_roots_config(pinned_ca_pem: &str) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    let mut added = 0usize;
    for cert in parse_pem_certs(pinned_ca_pem)? {
        roots
            .add(cert)
            .map_err(|e| MitmError::ca_load(format!("failed to add pinned root: {e}")))?;
        added += 1;
    }
    if added == 0 {
        return Err(MitmError::ca_load("no certificates in pinned CA PEM"));
    }
    info!(roots = added, "pinned upstream trust store created");
    Ok(finish_client_config(roots))
}

fn finish_client_config(roots: RootCertStore) -> Arc<ClientConfig> {
    let mut config = ClientConfig::builder_with_protocol_versions(&[&TLS12, &TLS13])
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];
    Arc::new(config)
}

fn parse_pem_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| MitmError::ca_load(format!("failed to parse PEM certificates: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mitm::minter::generate_ca;

    #[test]
    fn test_client_facing_config_advertises_http1() {
        let (cert_pem, key_pem) = generate_ca("Wiretap Test").unwrap();
        let minter = Arc::new(CertMinter::from_pem(&cert_pem, &key_pem).unwrap());
        let config = client_facing_config(minter);
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_upstream_config_builds() {
        let config = upstream_config();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_pinned_roots_config_requires_a_cert() {
        assert!(pinned_roots_config("").is_err());

        let (cert_pem, _) = generate_ca("Wiretap Test").unwrap();
        let config = pinned_roots_config(&cert_pem).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_upstream_config_with_extra_roots() {
        let (cert_pem, _) = generate_ca("Wiretap Test").unwrap();
        assert!(upstream_config_with_roots(&cert_pem).is_ok());
    }
}
