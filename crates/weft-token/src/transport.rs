//! Transport seam for the token-store revocation feed

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, ClientTlsConfig};

use crate::error::TokenError;
use crate::proto;
use crate::store::RevocationRecord;

const LISTEN_METHOD: &str = "/weft.tokenstore.TokenStore/Listen";

/// A decoded revocation feed event
#[derive(Debug, Clone, PartialEq)]
pub enum RevocationEvent {
    /// Install or replace a record
    Save(RevocationRecord),
    /// Remove a record; the token is revoked
    Delete {
        /// Token id being revoked
        jti: String,
    },
}

/// Stream of decoded revocation events
pub type RevocationStream =
    Pin<Box<dyn Stream<Item = Result<RevocationEvent, TokenError>> + Send>>;

/// Transport seam for the token store's Listen stream
#[async_trait]
pub trait TokenStoreTransport: Send + Sync + 'static {
    /// Open the indefinite revocation feed
    async fn listen(&self) -> Result<RevocationStream, TokenError>;
}

/// gRPC transport for a token store, mutual-TLS or insecure per
/// construction
pub struct GrpcTokenStore {
    channel: Channel,
}

impl GrpcTokenStore {
    /// Build a transport for `address`; `tls` selects mutual TLS
    pub fn new(address: &str, tls: Option<ClientTlsConfig>) -> Result<Self, TokenError> {
        let scheme = if tls.is_some() { "https" } else { "http" };
        let mut endpoint = Channel::from_shared(format!("{}://{}", scheme, address))
            .map_err(|e| TokenError::BadInput(format!("token store address: {}", e)))?;
        if let Some(tls) = tls {
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| TokenError::Tls(e.to_string()))?;
        }
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }
}

fn decode_event(event: proto::StoreEvent) -> Result<RevocationEvent, TokenError> {
    let action = proto::Action::try_from(event.action)
        .map_err(|_| TokenError::Malformed(format!("unknown action {}", event.action)))?;
    Ok(match action {
        proto::Action::Save => RevocationEvent::Save(RevocationRecord {
            jti: event.jti,
            nbf: event.nbf,
            exp: event.exp,
        }),
        proto::Action::Delete => RevocationEvent::Delete { jti: event.jti },
    })
}

#[async_trait]
impl TokenStoreTransport for GrpcTokenStore {
    async fn listen(&self) -> Result<RevocationStream, TokenError> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| TokenError::Unreachable(e.to_string()))?;

        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(LISTEN_METHOD);
        let response: tonic::Response<tonic::codec::Streaming<proto::StoreEvent>> = grpc
            .server_streaming(tonic::Request::new(proto::ListenRequest {}), path, codec)
            .await
            .map_err(|s| TokenError::Unreachable(s.to_string()))?;

        let stream = response.into_inner().map(|item| match item {
            Ok(event) => decode_event(event),
            Err(status) => Err(TokenError::Unreachable(status.to_string())),
        });

        Ok(Box::pin(stream))
    }
}
