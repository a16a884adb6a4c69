//! Core model types for the weft service mesh
//!
//! This crate holds the vocabulary shared by every weft component: fully
//! qualified service names, service descriptors with their endpoints and
//! metadata, the registry event model, and the bootstrap parameter record
//! consumed by the node binary.

pub mod descriptor;
pub mod error;
pub mod name;
pub mod params;

pub use descriptor::{
    Endpoint, EventKind, Protocol, RegistryEvent, ServiceDescriptor, ServiceKind,
};
pub use error::CoreError;
pub use name::FqName;
pub use params::BootstrapParams;

/// Well-known metadata key holding a service's PEM-encoded certificate.
pub const CERTIFICATE_METADATA_KEY: &str = "certificate";

/// Core crate version
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
