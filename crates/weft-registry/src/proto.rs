//! Registry wire messages
//!
//! Hand-written prost structs for the `weft.registry.Registry` service,
//! plus conversions to and from the core model types.

use std::collections::HashMap;

use weft_core::{
    Endpoint as CoreEndpoint, EventKind as CoreEventKind, FqName, Protocol as CoreProtocol,
    RegistryEvent, ServiceDescriptor, ServiceKind as CoreServiceKind,
};

use crate::error::RegistryError;

/// Service kind tag on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ServiceKind {
    Application = 0,
    Registry = 1,
    Authority = 2,
    TokenStore = 3,
}

/// Endpoint protocol tag on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Protocol {
    Grpc = 0,
    Http = 1,
}

/// Registry event kind on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventKind {
    Registered = 0,
    Updated = 1,
    DeRegistered = 2,
}

/// A single protocol endpoint
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Endpoint {
    #[prost(enumeration = "Protocol", tag = "1")]
    pub protocol: i32,

    #[prost(string, tag = "2")]
    pub address: ::prost::alloc::string::String,
}

/// Service descriptor on the wire
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Descriptor {
    #[prost(string, tag = "1")]
    pub namespace: ::prost::alloc::string::String,

    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,

    #[prost(string, tag = "3")]
    pub label: ::prost::alloc::string::String,

    #[prost(enumeration = "ServiceKind", tag = "4")]
    pub kind: i32,

    #[prost(message, repeated, tag = "5")]
    pub endpoints: ::prost::alloc::vec::Vec<Endpoint>,

    #[prost(map = "string, string", tag = "6")]
    pub metadata: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterRequest {
    #[prost(message, optional, tag = "1")]
    pub descriptor: ::core::option::Option<Descriptor>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterResponse {
    /// Opaque id used to deregister
    #[prost(string, tag = "1")]
    pub registry_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeregisterRequest {
    #[prost(string, tag = "1")]
    pub registry_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeregisterResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRequest {
    #[prost(string, tag = "1")]
    pub registry_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetResponse {
    #[prost(message, optional, tag = "1")]
    pub descriptor: ::core::option::Option<Descriptor>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListenRequest {
    /// Server-side filter expression; empty means everything
    #[prost(string, tag = "1")]
    pub filter: ::prost::alloc::string::String,
}

/// A change event on the wire; DeRegistered carries the name only
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(enumeration = "EventKind", tag = "1")]
    pub kind: i32,

    #[prost(string, tag = "2")]
    pub fq_name: ::prost::alloc::string::String,

    #[prost(message, optional, tag = "3")]
    pub descriptor: ::core::option::Option<Descriptor>,
}

impl From<&ServiceDescriptor> for Descriptor {
    fn from(d: &ServiceDescriptor) -> Self {
        Descriptor {
            namespace: d.fq_name.namespace().to_string(),
            name: d.fq_name.name().to_string(),
            label: d.label.clone(),
            kind: ServiceKind::from(d.kind) as i32,
            endpoints: d
                .endpoints
                .iter()
                .map(|e| Endpoint {
                    protocol: Protocol::from(e.protocol) as i32,
                    address: e.address.clone(),
                })
                .collect(),
            metadata: d.metadata.clone(),
        }
    }
}

impl From<CoreServiceKind> for ServiceKind {
    fn from(kind: CoreServiceKind) -> Self {
        match kind {
            CoreServiceKind::Application => ServiceKind::Application,
            CoreServiceKind::Registry => ServiceKind::Registry,
            CoreServiceKind::Authority => ServiceKind::Authority,
            CoreServiceKind::TokenStore => ServiceKind::TokenStore,
        }
    }
}

impl From<ServiceKind> for CoreServiceKind {
    fn from(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::Application => CoreServiceKind::Application,
            ServiceKind::Registry => CoreServiceKind::Registry,
            ServiceKind::Authority => CoreServiceKind::Authority,
            ServiceKind::TokenStore => CoreServiceKind::TokenStore,
        }
    }
}

impl From<CoreProtocol> for Protocol {
    fn from(protocol: CoreProtocol) -> Self {
        match protocol {
            CoreProtocol::Grpc => Protocol::Grpc,
            CoreProtocol::Http => Protocol::Http,
        }
    }
}

impl From<Protocol> for CoreProtocol {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Grpc => CoreProtocol::Grpc,
            Protocol::Http => CoreProtocol::Http,
        }
    }
}

/// Decode a wire descriptor into the core model
pub fn decode_descriptor(d: Descriptor) -> Result<ServiceDescriptor, RegistryError> {
    let fq_name = FqName::new(d.namespace, d.name)
        .map_err(|e| RegistryError::Malformed(e.to_string()))?;
    let kind = ServiceKind::try_from(d.kind)
        .map_err(|_| RegistryError::Malformed(format!("unknown service kind {}", d.kind)))?;

    let mut endpoints = Vec::with_capacity(d.endpoints.len());
    for e in d.endpoints {
        let protocol = Protocol::try_from(e.protocol)
            .map_err(|_| RegistryError::Malformed(format!("unknown protocol {}", e.protocol)))?;
        endpoints.push(CoreEndpoint {
            protocol: protocol.into(),
            address: e.address,
        });
    }

    Ok(ServiceDescriptor {
        fq_name,
        kind: kind.into(),
        label: d.label,
        endpoints,
        metadata: d.metadata,
    })
}

/// Decode a wire event into the core model
pub fn decode_event(event: Event) -> Result<RegistryEvent, RegistryError> {
    let kind = EventKind::try_from(event.kind)
        .map_err(|_| RegistryError::Malformed(format!("unknown event kind {}", event.kind)))?;
    let kind = match kind {
        EventKind::Registered => CoreEventKind::Registered,
        EventKind::Updated => CoreEventKind::Updated,
        EventKind::DeRegistered => CoreEventKind::DeRegistered,
    };

    let fq_name: FqName = event
        .fq_name
        .parse()
        .map_err(|e: weft_core::CoreError| RegistryError::Malformed(e.to_string()))?;

    let descriptor = match event.descriptor {
        Some(d) => Some(decode_descriptor(d)?),
        None => None,
    };

    Ok(RegistryEvent {
        kind,
        fq_name,
        descriptor,
    })
}
