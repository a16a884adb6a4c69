//! Streaming service-registry client for the weft mesh
//!
//! Maintains a local, eventually-consistent mirror of the remote registry's
//! live service set over a long-lived event stream, fans change events out
//! to in-process subscribers, and answers address and certificate lookups
//! synchronously from the mirror.

pub mod client;
pub mod error;
pub mod proto;
pub mod transport;

pub use client::{ConnectionInfo, EventCallback, RegistryClient, RegistryStats, SubscriptionHandle};
pub use error::RegistryError;
pub use transport::{EventStream, GrpcRegistryTransport, RegistryTransport};
