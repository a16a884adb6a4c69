//! gRPC listener and metadata authorization helper

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::MetadataMap;
use tonic::transport::{Server, ServerTlsConfig};
use tonic::Status;
use tracing::info;
use weft_token::{TokenStatus, TokenVerifier};

use crate::error::NodeError;

/// Serve the node's gRPC surface (health service) over mutual TLS until
/// the shutdown flag flips
pub async fn serve_grpc(
    listener: TcpListener,
    tls: ServerTlsConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), NodeError> {
    let addr = listener.local_addr()?;
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    info!(%addr, "starting gRPC listener");

    Server::builder()
        .tls_config(tls)
        .map_err(|e| NodeError::Listener(format!("gRPC tls: {}", e)))?
        .add_service(health_service)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| NodeError::Listener(format!("gRPC server: {}", e)))?;

    info!(%addr, "gRPC listener stopped");
    Ok(())
}

/// Authorize a request from its `authorization` metadata
///
/// Service implementations call this at handler entry; the verifier
/// accepts the same Bearer and Gateway framings as the HTTP layer.
pub async fn authorize_metadata(
    verifier: &Arc<TokenVerifier>,
    metadata: &MetadataMap,
) -> Result<(), Status> {
    let value = metadata
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Status::unauthenticated("missing authorization metadata"))?;

    match verifier.authorize(value).await {
        TokenStatus::Valid => Ok(()),
        TokenStatus::UnknownIssuer => Err(Status::unauthenticated("unknown issuer")),
        status => Err(Status::permission_denied(status.to_string())),
    }
}
