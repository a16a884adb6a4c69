//! Authority wire messages
//!
//! Hand-written prost structs for the `weft.authority.Authority` service.
//! The schemas live with the registry/authority/token-store servers; these
//! mirror them field for field.

/// Certificate signing request template
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignRequest {
    /// DNS names the certificate covers
    #[prost(string, repeated, tag = "1")]
    pub domains: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,

    /// IP addresses the certificate covers
    #[prost(string, repeated, tag = "2")]
    pub addresses: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,

    /// Certificate common name
    #[prost(string, tag = "3")]
    pub service_name: ::prost::alloc::string::String,

    /// Uncompressed SEC1 P-256 public key (`04 || X || Y`)
    #[prost(bytes = "vec", tag = "4")]
    pub public_key: ::prost::alloc::vec::Vec<u8>,
}

/// Signed certificate response
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignResponse {
    /// DER-encoded certificate signed by the authority
    #[prost(bytes = "vec", tag = "1")]
    pub certificate: ::prost::alloc::vec::Vec<u8>,
}
