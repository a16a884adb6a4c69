//! Error types for identity operations

use thiserror::Error;

/// Error type for certificate and key lifecycle operations
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed material: {0}")]
    Malformed(String),

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("certificate not trusted: {0}")]
    Untrusted(String),

    #[error("authority unreachable: {0}")]
    Unreachable(String),

    #[error("authority rejected the request: {0}")]
    Rejected(String),

    #[error("tls configuration error: {0}")]
    Tls(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
