use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Environment-driven configuration.
///
/// Every value has a default so a bare environment yields a working
/// plaintext proxy; interception activates when both CA paths are set.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    // Listener
    pub host: String,
    pub port: u16,

    // Per-session tunables
    pub header_buffer_size: usize,
    pub idle_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,

    // Interception CA (both paths required to enable decryption)
    pub mitm_ca_cert_path: Option<String>,
    pub mitm_ca_key_path: Option<String>,

    // Leaf minting
    pub cert_cache_size: usize,
    pub cert_validity_days: u32,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let host = env::var("PROXY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PROXY_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("Invalid PROXY_PORT")?;

        let header_buffer_size = env::var("HEADER_BUFFER_SIZE")
            .unwrap_or_else(|_| "8192".to_string())
            .parse()
            .context("Invalid HEADER_BUFFER_SIZE")?;
        let idle_timeout_seconds = env::var("TUNNEL_IDLE_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("Invalid TUNNEL_IDLE_TIMEOUT_SECONDS")?;
        let connect_timeout_seconds = env::var("CONNECT_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("Invalid CONNECT_TIMEOUT_SECONDS")?;

        let mitm_ca_cert_path = env::var("MITM_CA_CERT_PATH").ok();
        let mitm_ca_key_path = env::var("MITM_CA_KEY_PATH").ok();

        let cert_cache_size = env::var("CERT_CACHE_SIZE")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .context("Invalid CERT_CACHE_SIZE")?;
        let cert_validity_days = env::var("CERT_VALIDITY_DAYS")
            .unwrap_or_else(|_| "90".to_string())
            .parse()
            .context("Invalid CERT_VALIDITY_DAYS")?;

        Ok(Self {
            host,
            port,
            header_buffer_size,
            idle_timeout_seconds,
            connect_timeout_seconds,
            mitm_ca_cert_path,
            mitm_ca_key_path,
            cert_cache_size,
            cert_validity_days,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Whether decryption is configured at all.
    pub fn mitm_enabled(&self) -> bool {
        self.mitm_ca_cert_path.is_some() && self.mitm_ca_key_path.is_some()
    }
}
