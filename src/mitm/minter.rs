//! Leaf certificate minting for intercepted connections.
//!
//! The minter holds a pre-loaded CA and signs short-lived leaf certificates
//! on demand, one per server name taken from the client hello. Minted leaves
//! are kept in an LRU cache so busy hosts do not pay the signing cost on
//! every handshake.

use super::error::{MitmError, Result};
use lru::LruCache;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa,
    KeyUsagePurpose, SanType,
};
use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use std::fs;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Minting configuration.
#[derive(Debug, Clone)]
pub struct MinterConfig {
    /// Leaf cache capacity (server names).
    pub cache_size: usize,

    /// Leaf validity in days, anchored at mint time.
    pub validity_days: u32,

    /// Organization embedded in minted leaves.
    pub organization: String,
}

impl Default for MinterConfig {
    fn default() -> Self {
        Self {
            cache_size: 1_000,
            validity_days: 90,
            organization: "Wiretap Proxy".to_string(),
        }
    }
}

/// Signs per-SNI leaf certificates from a configured CA.
pub struct CertMinter {
    ca: Certificate,
    cache: Mutex<LruCache<String, Arc<CertifiedKey>>>,
    config: MinterConfig,
}

impl CertMinter {
    /// Load the CA from PEM strings.
    pub fn from_pem(ca_cert_pem: &str, ca_key_pem: &str) -> Result<Self> {
        Self::from_pem_with_config(ca_cert_pem, ca_key_pem, MinterConfig::default())
    }

    /// Load the CA from PEM strings with explicit minting options.
    pub fn from_pem_with_config(
        ca_cert_pem: &str,
        ca_key_pem: &str,
        config: MinterConfig,
    ) -> Result<Self> {
        let key_pair = rcgen::KeyPair::from_pem(ca_key_pem)
            .map_err(|e| MitmError::ca_load(format!("failed to parse CA key: {e}")))?;
        let params = CertificateParams::from_ca_cert_pem(ca_cert_pem, key_pair)
            .map_err(|e| MitmError::ca_load(format!("failed to parse CA certificate: {e}")))?;
        let ca = Certificate::from_params(params)
            .map_err(|e| MitmError::ca_load(format!("failed to reconstruct CA: {e}")))?;

        let cache_size =
            NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::new(1_000).expect("nonzero"));
        Ok(Self {
            ca,
            cache: Mutex::new(LruCache::new(cache_size)),
            config,
        })
    }

    /// Load the CA from PEM files on disk.
    pub fn from_pem_files(cert_path: &str, key_path: &str) -> Result<Self> {
        let cert_pem = fs::read_to_string(cert_path)
            .map_err(|e| MitmError::ca_load(format!("failed to read {cert_path}: {e}")))?;
        let key_pem = fs::read_to_string(key_path)
            .map_err(|e| MitmError::ca_load(format!("failed to read {key_path}: {e}")))?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Mint (or fetch from cache) a leaf for `server_name`, ready for use
    /// in a rustls server config.
    pub fn mint(&self, server_name: &str) -> Result<Arc<CertifiedKey>> {
        if server_name.is_empty() {
            return Err(MitmError::EmptyServerName);
        }

        {
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(cached) = cache.get(server_name) {
                debug!(server_name = %server_name, "leaf certificate cache hit");
                return Ok(Arc::clone(cached));
            }
        }

        debug!(server_name = %server_name, "minting leaf certificate");
        let certified = Arc::new(self.mint_uncached(server_name)?);

        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.put(server_name.to_string(), Arc::clone(&certified));
        Ok(certified)
    }

    fn mint_uncached(&self, server_name: &str) -> Result<CertifiedKey> {
        let mut params = CertificateParams::default();

        params.subject_alt_names = vec![match server_name.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(server_name.to_string()),
        }];

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, &self.config.organization);
        dn.push(DnType::CommonName, server_name);
        params.distinguished_name = dn;

        // Back-date slightly so clock skew between proxy and client does not
        // reject a freshly minted leaf
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::hours(1);
        params.not_after = now + time::Duration::days(i64::from(self.config.validity_days));

        params.serial_number = Some(unique_serial().into());
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;

        let cert = Certificate::from_params(params)
            .map_err(|e| MitmError::mint(server_name, e.to_string()))?;
        let leaf_der = cert
            .serialize_der_with_signer(&self.ca)
            .map_err(|e| MitmError::mint(server_name, e.to_string()))?;
        let key_der = cert.serialize_private_key_der();

        let signing_key = any_supported_type(&PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            key_der,
        )))
        .map_err(|e| MitmError::mint(server_name, e.to_string()))?;

        Ok(CertifiedKey::new(
            vec![CertificateDer::from(leaf_der)],
            signing_key,
        ))
    }

    /// CA certificate PEM, for installing into clients.
    pub fn ca_cert_pem(&self) -> Result<String> {
        self.ca
            .serialize_pem()
            .map_err(|e| MitmError::ca_load(e.to_string()))
    }

    /// Current (len, capacity) of the leaf cache.
    pub fn cache_stats(&self) -> (usize, usize) {
        let cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (cache.len(), cache.cap().get())
    }
}

impl std::fmt::Debug for CertMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertMinter")
            .field("config", &self.config)
            .finish()
    }
}

/// Generate a fresh CA, returning `(cert_pem, key_pem)`.
///
/// Embedders normally provision a long-lived CA out of band; this exists for
/// first-run setups and tests.
pub fn generate_ca(organization: &str) -> Result<(String, String)> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, organization);
    dn.push(DnType::CommonName, format!("{organization} CA"));
    params.distinguished_name = dn;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(1);
    params.not_after = now + time::Duration::days(365 * 10);

    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;

    let cert = Certificate::from_params(params)
        .map_err(|e| MitmError::ca_generation(e.to_string()))?;
    let cert_pem = cert
        .serialize_pem()
        .map_err(|e| MitmError::ca_generation(e.to_string()))?;
    let key_pem = cert.serialize_private_key_pem();
    Ok((cert_pem, key_pem))
}

fn unique_serial() -> u64 {
    use rand::Rng;
    let random_part: u32 = rand::thread_rng().gen();
    let timestamp_part = time::OffsetDateTime::now_utc().unix_timestamp() as u32;
    ((timestamp_part as u64) << 32) | (random_part as u64)
}
