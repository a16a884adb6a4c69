//! Service bootstrap: certificate, listeners, registration, teardown

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use weft_core::{BootstrapParams, FqName, Protocol, ServiceDescriptor, ServiceKind};
use weft_identity::{CertificateManager, PrepareOptions};
use weft_registry::{GrpcRegistryTransport, RegistryClient};
use weft_token::{GrpcStoreConnector, TokenVerifier};

use crate::error::NodeError;
use crate::http::AppState;
use crate::{grpc, http};

const DEFAULT_NAMESPACE: &str = "weft";
const DEFAULT_LISTEN: &str = "0.0.0.0:0";
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The running half of a started node
pub struct RunningNode {
    /// Bound gRPC address (kernel-chosen port resolved)
    pub grpc_addr: SocketAddr,
    /// Bound HTTP address
    pub http_addr: SocketAddr,
    /// The registry mirror
    pub registry: Arc<RegistryClient>,
    /// The token verifier shared with listeners
    pub verifier: Arc<TokenVerifier>,
    registry_id: String,
    shutdown_tx: watch::Sender<bool>,
    grpc_task: JoinHandle<Result<(), NodeError>>,
    http_task: JoinHandle<Result<(), NodeError>>,
}

/// Orchestrates start and stop of a service node
pub struct ServiceBootstrap {
    params: BootstrapParams,
    running: Option<RunningNode>,
}

impl ServiceBootstrap {
    /// Create a bootstrap for the given parameter record
    pub fn new(params: BootstrapParams) -> Self {
        Self {
            params,
            running: None,
        }
    }

    /// The running node, once started
    pub fn running(&self) -> Option<&RunningNode> {
        self.running.as_ref()
    }

    /// Start the node: certificate, listeners, registration
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.running.is_some() {
            return Ok(());
        }

        let params = self.params.clone();
        params.validate()?;
        if params.authority_grpc.is_empty() {
            return Err(NodeError::BadInput(
                "authority endpoint is required".to_string(),
            ));
        }
        if params.registry.is_empty() {
            return Err(NodeError::BadInput(
                "registry address is required".to_string(),
            ));
        }

        let namespace = if params.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &params.namespace
        };
        let fq_name = FqName::new(namespace, &params.name)?;

        // Certificate pair first: every listener derives its TLS from it.
        let options = PrepareOptions {
            name: fq_name.clone(),
            data_dir: PathBuf::from(&params.dir),
            domains: non_empty(&params.domain),
            addresses: non_empty(&params.ip),
            authority_cert_path: PathBuf::from(&params.authority_cert),
            cert_file: optional_path(&params.cert_file),
            key_file: optional_path(&params.key_file),
            key_password: String::new(),
        };
        let manager = CertificateManager::prepare_with_authority(
            options,
            &params.authority_grpc,
            &params.authority_credentials,
        )
        .await?;
        info!(service = %fq_name, "certificate pair ready");

        // Listeners bind before registration so the advertised ports are
        // the bound ones.
        let grpc_listener = TcpListener::bind(listen_addr(&params.grpc)).await?;
        let grpc_addr = grpc_listener.local_addr()?;
        let http_listener = TcpListener::bind(listen_addr(&params.http)).await?;
        let http_addr = http_listener.local_addr()?;

        let (shutdown_tx, _) = watch::channel(false);

        let grpc_task = tokio::spawn(grpc::serve_grpc(
            grpc_listener,
            manager.grpc_server_tls()?,
            shutdown_tx.subscribe(),
        ));

        // Registry client, mutual TLS or insecure per configuration.
        let registry_tls = if params.registry_secure {
            Some(manager.grpc_client_tls(None)?)
        } else {
            None
        };
        let transport = Arc::new(GrpcRegistryTransport::new(&params.registry, registry_tls)?);
        let registry = Arc::new(RegistryClient::new(transport));
        registry.connect().await;

        // Token verifier shared by both listeners.
        let mut connector = GrpcStoreConnector::new(&params.dir, params.registry_secure);
        if params.registry_secure {
            connector = connector.with_identity(
                manager.certificate().to_pem(),
                manager.private_key().to_pem("")?,
            );
        }
        let mut verifier = TokenVerifier::new(registry.clone(), Arc::new(connector));
        if !params.gateway_secret.is_empty() {
            verifier = verifier.with_gateway_secret(params.gateway_secret.clone());
        }
        let verifier = Arc::new(verifier);

        let state = AppState {
            service: fq_name.to_string(),
            verifier: verifier.clone(),
            registry: registry.clone(),
        };
        let http_task = tokio::spawn(http::serve_http(
            http_listener,
            Arc::new(manager.server_tls_config()?),
            http::router(state),
            shutdown_tx.subscribe(),
        ));

        // Advertise the bound endpoints plus our certificate.
        let host = if params.ip.is_empty() {
            params.domain.clone()
        } else {
            params.ip.clone()
        };
        let descriptor =
            ServiceDescriptor::new(fq_name.clone(), ServiceKind::Application, params.name.clone())
                .with_endpoint(Protocol::Grpc, format!("{}:{}", host, grpc_addr.port()))
                .with_endpoint(Protocol::Http, format!("{}:{}", host, http_addr.port()))
                .with_certificate(manager.certificate().to_pem());

        let registry_id = match registry.register(&descriptor).await {
            Ok(id) => id,
            Err(e) => {
                // Roll the listeners back so a failed bootstrap leaves no
                // spinning tasks behind.
                let _ = shutdown_tx.send(true);
                registry.disconnect().await;
                return Err(e.into());
            }
        };
        info!(service = %fq_name, registry_id, %grpc_addr, %http_addr, "node registered");

        self.running = Some(RunningNode {
            grpc_addr,
            http_addr,
            registry,
            verifier,
            registry_id,
            shutdown_tx,
            grpc_task,
            http_task,
        });
        Ok(())
    }

    /// Stop the node: listeners down, deregister, disconnect
    pub async fn stop(&mut self) {
        let Some(node) = self.running.take() else {
            return;
        };

        let _ = node.shutdown_tx.send(true);
        for (label, task) in [("grpc", node.grpc_task), ("http", node.http_task)] {
            match tokio::time::timeout(STOP_DRAIN_TIMEOUT, task).await {
                Ok(Ok(Err(e))) => warn!(listener = label, error = %e, "listener exited with error"),
                Ok(Err(e)) => warn!(listener = label, error = %e, "listener task panicked"),
                Err(_) => warn!(listener = label, "listener did not drain in time"),
                Ok(Ok(Ok(()))) => {}
            }
        }

        if let Err(e) = node.registry.deregister(&node.registry_id).await {
            warn!(error = %e, "deregistration failed");
        }
        node.registry.disconnect().await;
        info!("node stopped");
    }
}

fn non_empty(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        vec![value.to_string()]
    }
}

fn optional_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn listen_addr(value: &str) -> &str {
    if value.is_empty() {
        DEFAULT_LISTEN
    } else {
        value
    }
}
