//! TLS interception: CA handling, leaf minting and the TLS configurations
//! used on both sides of a decrypted tunnel.
//!
//! The session replies `200 OK` to a CONNECT, impersonates the origin with
//! a leaf minted for the hello's server name, and re-encrypts onward to the
//! real origin with full verification.

pub mod error;
pub mod minter;
pub mod tls;

pub use error::MitmError;
pub use minter::{generate_ca, CertMinter, MinterConfig};
pub use tls::{
    client_facing_config, pinned_roots_config, upstream_config, upstream_config_with_roots,
};
