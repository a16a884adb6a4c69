//! Transport seam for the registry RPCs

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, ClientTlsConfig};
use tonic::Code;
use tracing::debug;
use weft_core::{RegistryEvent, ServiceDescriptor};

use crate::error::RegistryError;
use crate::proto;

const REGISTER_METHOD: &str = "/weft.registry.Registry/Register";
const DEREGISTER_METHOD: &str = "/weft.registry.Registry/Deregister";
const LISTEN_METHOD: &str = "/weft.registry.Registry/Listen";
const UNARY_DEADLINE: Duration = Duration::from_secs(1);

/// Stream of decoded registry events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RegistryEvent, RegistryError>> + Send>>;

/// Transport seam for the registry's RPC surface
///
/// The gRPC implementation is the production path; tests install
/// in-process transports feeding events through channels.
#[async_trait]
pub trait RegistryTransport: Send + Sync + 'static {
    /// Register a descriptor, returning the opaque registry id
    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<String, RegistryError>;

    /// Remove a registration by id; a remote "not found" is benign
    async fn deregister(&self, registry_id: &str) -> Result<(), RegistryError>;

    /// Open the indefinite event stream
    async fn listen(&self) -> Result<EventStream, RegistryError>;
}

/// gRPC transport for the registry, mutual-TLS or insecure per
/// construction
pub struct GrpcRegistryTransport {
    channel: Channel,
}

impl GrpcRegistryTransport {
    /// Build a transport for `address`; `tls` selects mutual TLS
    pub fn new(address: &str, tls: Option<ClientTlsConfig>) -> Result<Self, RegistryError> {
        let scheme = if tls.is_some() { "https" } else { "http" };
        let mut endpoint = Channel::from_shared(format!("{}://{}", scheme, address))
            .map_err(|e| RegistryError::BadInput(format!("registry address: {}", e)))?
            .connect_timeout(UNARY_DEADLINE);
        if let Some(tls) = tls {
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| RegistryError::Tls(e.to_string()))?;
        }
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }

    async fn grpc(&self) -> Result<tonic::client::Grpc<Channel>, RegistryError> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| RegistryError::Unreachable(e.to_string()))?;
        Ok(grpc)
    }
}

fn map_status(status: tonic::Status) -> RegistryError {
    match status.code() {
        Code::NotFound => RegistryError::NotFound(status.message().to_string()),
        Code::InvalidArgument | Code::PermissionDenied | Code::AlreadyExists => {
            RegistryError::Rejected(status.message().to_string())
        }
        _ => RegistryError::Unreachable(status.to_string()),
    }
}

#[async_trait]
impl RegistryTransport for GrpcRegistryTransport {
    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<String, RegistryError> {
        debug!(service = %descriptor.fq_name, "registering with registry");

        let mut grpc = self.grpc().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(REGISTER_METHOD);
        let request = tonic::Request::new(proto::RegisterRequest {
            descriptor: Some(proto::Descriptor::from(descriptor)),
        });

        let response: tonic::Response<proto::RegisterResponse> =
            tokio::time::timeout(UNARY_DEADLINE, grpc.unary(request, path, codec))
                .await
                .map_err(|_| RegistryError::Unreachable("register deadline exceeded".to_string()))?
                .map_err(map_status)?;

        Ok(response.into_inner().registry_id)
    }

    async fn deregister(&self, registry_id: &str) -> Result<(), RegistryError> {
        debug!(registry_id, "deregistering from registry");

        let mut grpc = self.grpc().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(DEREGISTER_METHOD);
        let request = tonic::Request::new(proto::DeregisterRequest {
            registry_id: registry_id.to_string(),
        });

        let result: Result<tonic::Response<proto::DeregisterResponse>, tonic::Status> =
            tokio::time::timeout(UNARY_DEADLINE, grpc.unary(request, path, codec))
                .await
                .map_err(|_| {
                    RegistryError::Unreachable("deregister deadline exceeded".to_string())
                })?;

        match result {
            Ok(_) => Ok(()),
            // A second deregister of the same id is a no-op.
            Err(status) if status.code() == Code::NotFound => Ok(()),
            Err(status) => Err(map_status(status)),
        }
    }

    async fn listen(&self) -> Result<EventStream, RegistryError> {
        let mut grpc = self.grpc().await?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(LISTEN_METHOD);
        let request = tonic::Request::new(proto::ListenRequest {
            filter: String::new(),
        });

        let response: tonic::Response<tonic::codec::Streaming<proto::Event>> = grpc
            .server_streaming(request, path, codec)
            .await
            .map_err(map_status)?;

        let stream = response.into_inner().map(|item| match item {
            Ok(event) => proto::decode_event(event),
            Err(status) => Err(RegistryError::Unreachable(status.to_string())),
        });

        Ok(Box::pin(stream))
    }
}
