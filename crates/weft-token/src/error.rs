//! Error types for token operations

use thiserror::Error;

/// Error type for token parsing, verification, and revocation plumbing
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("token store unreachable: {0}")]
    Unreachable(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("tls configuration error: {0}")]
    Tls(String),

    #[error("revocation store error: {0}")]
    Store(String),
}
