//! Service descriptors and registry events

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::name::FqName;
use crate::CERTIFICATE_METADATA_KEY;

/// Kind tag of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    /// The service registry itself
    Registry,
    /// The certificate authority
    Authority,
    /// A token revocation store
    TokenStore,
    /// An application-defined service
    Application,
}

/// Endpoint protocol tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Grpc,
    Http,
}

/// A single protocol endpoint of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Endpoint protocol
    pub protocol: Protocol,

    /// Endpoint address (`host:port`)
    pub address: String,
}

/// Identity of a live peer as mirrored from the registry
///
/// Descriptors are created when the registry emits Registered or Updated,
/// replaced whole on Updated, and removed on DeRegistered. The local
/// process never mutates a mirrored descriptor in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Fully qualified name (`namespace:name`)
    pub fq_name: FqName,

    /// Service kind tag
    pub kind: ServiceKind,

    /// Human-readable display label
    pub label: String,

    /// Ordered protocol endpoints
    pub endpoints: Vec<Endpoint>,

    /// String metadata; the `certificate` key holds the PEM service
    /// certificate
    pub metadata: HashMap<String, String>,
}

impl ServiceDescriptor {
    /// Create a descriptor with no endpoints or metadata
    pub fn new(fq_name: FqName, kind: ServiceKind, label: impl Into<String>) -> Self {
        Self {
            fq_name,
            kind,
            label: label.into(),
            endpoints: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Append an endpoint
    pub fn with_endpoint(mut self, protocol: Protocol, address: impl Into<String>) -> Self {
        self.endpoints.push(Endpoint {
            protocol,
            address: address.into(),
        });
        self
    }

    /// Attach the PEM service certificate under the well-known metadata key
    pub fn with_certificate(mut self, pem: impl Into<String>) -> Self {
        self.metadata
            .insert(CERTIFICATE_METADATA_KEY.to_string(), pem.into());
        self
    }

    /// PEM certificate bytes from the well-known metadata key, if present
    pub fn certificate(&self) -> Option<&str> {
        self.metadata.get(CERTIFICATE_METADATA_KEY).map(|s| s.as_str())
    }

    /// First endpoint with the given protocol, if any
    pub fn endpoint(&self, protocol: Protocol) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.protocol == protocol)
    }
}

/// Kind of a registry change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Registered,
    Updated,
    DeRegistered,
}

/// A change event streamed from the registry
///
/// DeRegistered events carry the fully qualified name only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEvent {
    /// Event kind
    pub kind: EventKind,

    /// Fully qualified name of the affected service
    pub fq_name: FqName,

    /// New descriptor for Registered and Updated events
    pub descriptor: Option<ServiceDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new(
            FqName::new("mesh", "svc-a").unwrap(),
            ServiceKind::Application,
            "Service A",
        )
        .with_endpoint(Protocol::Grpc, "10.0.0.1:9000")
        .with_endpoint(Protocol::Http, "10.0.0.1:9001")
        .with_certificate("-----BEGIN CERTIFICATE-----\n...")
    }

    #[test]
    fn test_descriptor_certificate_metadata() {
        let d = descriptor();
        assert!(d.certificate().unwrap().starts_with("-----BEGIN CERTIFICATE"));
        assert!(d.metadata.contains_key(CERTIFICATE_METADATA_KEY));
    }

    #[test]
    fn test_descriptor_endpoint_lookup() {
        let d = descriptor();
        assert_eq!(d.endpoint(Protocol::Grpc).unwrap().address, "10.0.0.1:9000");
        assert_eq!(d.endpoint(Protocol::Http).unwrap().address, "10.0.0.1:9001");
    }

    #[test]
    fn test_descriptor_serde_round_trip() {
        let d = descriptor();
        let json = serde_json::to_string(&d).unwrap();
        let back: ServiceDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
