//! Bearer token verification for the weft mesh
//!
//! Covers the full path from a raw `Authorization` value to a
//! [`TokenStatus`]: structural and cryptographic token parsing, per-issuer
//! certificate resolution through the registry mirror, and per-store
//! revocation state synchronized from the issuing token store.

pub mod error;
pub mod proto;
pub mod revocation;
pub mod store;
pub mod token;
pub mod transport;
pub mod verifier;

pub use error::TokenError;
pub use revocation::{CallbackHandle, RevocationStoreClient, RevokedCallback};
pub use store::{RevocationRecord, RevocationStore};
pub use token::{BearerToken, Claims, TokenStatus, VerifyOutcome, UNSET};
pub use transport::{GrpcTokenStore, RevocationEvent, RevocationStream, TokenStoreTransport};
pub use verifier::{GrpcStoreConnector, StoreConnector, TokenVerifier, VerifierStats};

/// File name of the local revocation dictionary
pub const REVOCATION_DB_FILE: &str = "jwt-store.db";
