//! Bootstrap parameter record
//!
//! The libraries consume this plain record of strings; how it is populated
//! (flags, environment, config file) is the enclosing binary's concern.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Parameters required to bootstrap a service node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapParams {
    /// Service name (required)
    pub name: String,

    /// Service namespace
    pub namespace: String,

    /// Data directory for certificates and local stores
    pub dir: String,

    /// Advertised DNS domain (at least one of domain/ip required)
    pub domain: String,

    /// Advertised IP address (at least one of domain/ip required)
    pub ip: String,

    /// gRPC listen address (`host:port`, port 0 allowed)
    pub grpc: String,

    /// HTTP listen address (`host:port`, port 0 allowed)
    pub http: String,

    /// Registry gRPC address
    pub registry: String,

    /// Whether the registry connection uses mutual TLS
    pub registry_secure: bool,

    /// Authority gRPC address
    pub authority_grpc: String,

    /// Path to the authority certificate (PEM)
    pub authority_cert: String,

    /// Authority credentials as a `key:secret` pair
    pub authority_credentials: String,

    /// Explicit certificate file path, overriding the derived name
    pub cert_file: String,

    /// Explicit key file path, overriding the derived name
    pub key_file: String,

    /// Shared secret for the HTTP gateway authorization framing
    pub gateway_secret: String,
}

impl BootstrapParams {
    /// Validate the record for bootstrap
    ///
    /// Checks the constraints the node cannot start without: a name, at
    /// least one of domain/ip, and an authority certificate whenever an
    /// authority endpoint is configured.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::BadInput("service name is required".to_string()));
        }
        if self.domain.is_empty() && self.ip.is_empty() {
            return Err(CoreError::BadInput(
                "at least one of domain or ip is required".to_string(),
            ));
        }
        if !self.authority_grpc.is_empty() && self.authority_cert.is_empty() {
            return Err(CoreError::BadInput(
                "authority endpoint configured without an authority certificate".to_string(),
            ));
        }
        Ok(())
    }
}
