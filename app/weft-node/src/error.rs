//! Error types for node bootstrap

use thiserror::Error;

/// Error type for bootstrap and listener plumbing
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error(transparent)]
    Core(#[from] weft_core::CoreError),

    #[error(transparent)]
    Identity(#[from] weft_identity::IdentityError),

    #[error(transparent)]
    Registry(#[from] weft_registry::RegistryError),

    #[error(transparent)]
    Token(#[from] weft_token::TokenError),

    #[error("listener error: {0}")]
    Listener(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
