//! Error types for registry operations

use thiserror::Error;

/// Error type for registry client operations
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("registry unreachable: {0}")]
    Unreachable(String),

    #[error("registry rejected the request: {0}")]
    Rejected(String),

    #[error("malformed registry data: {0}")]
    Malformed(String),

    #[error("tls configuration error: {0}")]
    Tls(String),
}
