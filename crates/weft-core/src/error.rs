//! Error types for core model operations

use thiserror::Error;

/// Error type for core model operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid service name: {0}")]
    InvalidName(String),

    #[error("bad input: {0}")]
    BadInput(String),
}
