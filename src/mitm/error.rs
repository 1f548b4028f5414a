//! Interception error types.

use thiserror::Error;

/// Result type for interception operations.
pub type Result<T> = std::result::Result<T, MitmError>;

/// Failures in CA handling and leaf minting.
#[derive(Debug, Error)]
pub enum MitmError {
    /// CA certificate or key could not be loaded.
    #[error("failed to load CA certificate: {0}")]
    CaLoad(String),

    /// CA generation failed.
    #[error("failed to generate CA certificate: {0}")]
    CaGeneration(String),

    /// Leaf signing failed for a server name.
    #[error("failed to mint certificate for {server_name}: {reason}")]
    Mint { server_name: String, reason: String },

    /// A leaf was requested for an empty server name.
    #[error("cannot mint a certificate for an empty server name")]
    EmptyServerName,

    /// Host is not a mintable identity.
    #[error("invalid host for interception: {0}")]
    InvalidHost(String),
}

impl MitmError {
    pub fn ca_load(msg: impl Into<String>) -> Self {
        Self::CaLoad(msg.into())
    }

    pub fn ca_generation(msg: impl Into<String>) -> Self {
        Self::CaGeneration(msg.into())
    }

    pub fn mint(server_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mint {
            server_name: server_name.into(),
            reason: reason.into(),
        }
    }
}
