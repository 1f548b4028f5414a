//! Target host parsing and normalization.

use std::net::IpAddr;

/// Default port for plaintext HTTP targets.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default port for TLS targets (CONNECT authorities).
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Parsed `host[:port]` target.
///
/// Parsing never fails loudly: a malformed input yields an empty
/// `host_with_port`, which the session treats as an unroutable target.
/// IP-literal hosts leave `domain` empty and pre-populate `ip`.
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    host_with_port: String,
    domain: String,
    port: u16,
    ip: Option<IpAddr>,
}

impl HostInfo {
    /// Parse `host[:port]`, filling in `default_port` when no port is given.
    /// Accepts bracketed IPv6 literals like `[::1]:443`.
    pub fn parse(s: &str, default_port: u16) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return Self::default();
        }

        let (host_part, port) = if let Some(rest) = s.strip_prefix('[') {
            let Some((inner, after)) = rest.split_once(']') else {
                return Self::default();
            };
            let port = if after.is_empty() {
                default_port
            } else if let Some(p) = after.strip_prefix(':') {
                match p.parse() {
                    Ok(p) => p,
                    Err(_) => return Self::default(),
                }
            } else {
                return Self::default();
            };
            (inner, port)
        } else {
            match s.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => {
                    // More than one colon and no brackets: only a bare IPv6
                    // literal is acceptable here
                    if s.parse::<IpAddr>().is_err() {
                        return Self::default();
                    }
                    (s, default_port)
                }
                Some((host, port)) => match port.parse() {
                    Ok(p) => (host, p),
                    Err(_) => return Self::default(),
                },
                None => (s, default_port),
            }
        };

        if host_part.is_empty() {
            return Self::default();
        }

        let ip = host_part.parse::<IpAddr>().ok();
        let domain = if ip.is_some() {
            String::new()
        } else {
            host_part.to_string()
        };
        let host_with_port = if host_part.contains(':') {
            format!("[{host_part}]:{port}")
        } else {
            format!("{host_part}:{port}")
        };

        Self {
            host_with_port,
            domain,
            port,
            ip,
        }
    }

    /// Normalized `host:port` string; empty when parsing failed.
    pub fn host_with_port(&self) -> &str {
        &self.host_with_port
    }

    /// Domain name, empty for IP-literal targets.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Record a resolved address for this target.
    pub fn set_ip(&mut self, ip: IpAddr) {
        self.ip = Some(ip);
    }

    /// Dial target, preferring the resolved IP when one is known.
    pub fn target_addr(&self) -> String {
        match self.ip {
            Some(IpAddr::V4(ip)) => format!("{ip}:{}", self.port),
            Some(IpAddr::V6(ip)) => format!("[{ip}]:{}", self.port),
            None => self.host_with_port.clone(),
        }
    }

    /// Name a minted certificate should cover: the domain, or the IP literal
    /// for IP targets.
    pub fn server_name(&self) -> Option<String> {
        if !self.domain.is_empty() {
            Some(self.domain.clone())
        } else {
            self.ip.map(|ip| ip.to_string())
        }
    }
}
