//! Weft mesh service node
//!
//! Glues the identity, registry, and token crates into a runnable
//! service: prepares the certificate pair, opens mutually-authenticated
//! gRPC and HTTP listeners, registers the node with the registry, and
//! tears everything down in order on shutdown.

pub mod args;
pub mod bootstrap;
pub mod error;
pub mod grpc;
pub mod http;

pub use args::NodeArgs;
pub use bootstrap::ServiceBootstrap;
pub use error::NodeError;

/// Node name reported in logs and status payloads
pub const NODE_NAME: &str = "weft-node";

/// Node version
pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");
