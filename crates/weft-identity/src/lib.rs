//! Certificate and key lifecycle for weft services
//!
//! This crate guarantees that a service holds an authority-signed X.509
//! certificate and matching ECDSA P-256 private key before it opens any
//! listener. It covers:
//!
//! - PEM load/store of certificates and private keys (optionally
//!   password-protected)
//! - chain and validity-window checks against the mesh authority
//! - mutual-TLS configuration assembly for both the rustls and tonic stacks
//! - the gRPC client that asks the authority to sign a new certificate
//! - the [`CertificateManager`] orchestrating load-or-renew-or-request

pub mod authority;
pub mod certs;
pub mod error;
mod fsutil;
pub mod keys;
pub mod manager;
pub mod proto;
pub mod tls;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use authority::{AuthorityTransport, BasicCredentials, GrpcAuthority, SignTemplate};
pub use certs::{Certificate, CertificatePair};
pub use error::IdentityError;
pub use keys::PrivateKey;
pub use manager::{CertificateManager, PrepareOptions};
