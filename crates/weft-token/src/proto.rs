//! Token-store wire messages
//!
//! Hand-written prost structs for the `weft.tokenstore.TokenStore`
//! service's Listen stream.

/// Event action on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Action {
    Save = 0,
    Delete = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListenRequest {}

/// One revocation feed event
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoreEvent {
    #[prost(enumeration = "Action", tag = "1")]
    pub action: i32,

    #[prost(string, tag = "2")]
    pub jti: ::prost::alloc::string::String,

    /// Not-before bound, unix seconds or -1
    #[prost(int64, tag = "3")]
    pub nbf: i64,

    /// Expiry bound, unix seconds or -1
    #[prost(int64, tag = "4")]
    pub exp: i64,
}
