//! Client for the central certificate authority

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, ClientTlsConfig};
use tonic::Code;
use tracing::debug;

use crate::certs::Certificate;
use crate::error::IdentityError;
use crate::proto;

const SIGN_METHOD: &str = "/weft.authority.Authority/Sign";
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(1);

/// Template for a certificate signing request
#[derive(Debug, Clone, PartialEq)]
pub struct SignTemplate {
    /// DNS names the certificate covers
    pub domains: Vec<String>,
    /// IP addresses the certificate covers
    pub addresses: Vec<String>,
    /// Certificate common name
    pub common_name: String,
    /// Uncompressed SEC1 P-256 public key (`04 || X || Y`)
    pub public_key: Vec<u8>,
}

/// Transport seam for the authority's Sign RPC
///
/// The gRPC implementation is the production path; tests install
/// in-process signers.
#[async_trait]
pub trait AuthorityTransport: Send + Sync + 'static {
    /// Sign the template, returning the DER certificate bytes
    async fn sign(&self, template: SignTemplate) -> Result<Vec<u8>, IdentityError>;
}

/// Per-call basic-auth credentials from a `key:secret` pair
#[derive(Clone)]
pub struct BasicCredentials {
    header: String,
}

impl BasicCredentials {
    /// Parse a colon-joined `key:secret` string
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let (key, _secret) = raw.split_once(':').ok_or_else(|| {
            IdentityError::BadInput("credentials must be a key:secret pair".to_string())
        })?;
        if key.is_empty() {
            return Err(IdentityError::BadInput(
                "credentials key must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            header: format!("Basic {}", STANDARD.encode(raw)),
        })
    }

    /// Metadata value carrying the credentials
    pub fn metadata_value(&self) -> Result<MetadataValue<tonic::metadata::Ascii>, IdentityError> {
        MetadataValue::try_from(self.header.as_str())
            .map_err(|e| IdentityError::BadInput(format!("credentials header: {}", e)))
    }
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BasicCredentials(..)")
    }
}

/// gRPC client for the authority, dialed over mutual TLS with the
/// authority certificate as the trust root
pub struct GrpcAuthority {
    address: String,
    tls: ClientTlsConfig,
    credentials: BasicCredentials,
    timeout: Duration,
}

impl GrpcAuthority {
    /// Build a client for `address` trusting `authority_certificate`
    pub fn new(
        address: impl Into<String>,
        authority_certificate: &Certificate,
        credentials: BasicCredentials,
    ) -> Self {
        let mut tls = ClientTlsConfig::new().ca_certificate(
            tonic::transport::Certificate::from_pem(authority_certificate.to_pem()),
        );
        if let Some(cn) = authority_certificate.common_name() {
            tls = tls.domain_name(cn);
        }
        Self {
            address: address.into(),
            tls,
            credentials,
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    /// Override the per-call deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connect(&self) -> Result<Channel, IdentityError> {
        let endpoint = Channel::from_shared(format!("https://{}", self.address))
            .map_err(|e| IdentityError::BadInput(format!("authority address: {}", e)))?
            .tls_config(self.tls.clone())
            .map_err(|e| IdentityError::Tls(e.to_string()))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);

        endpoint
            .connect()
            .await
            .map_err(|e| IdentityError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl AuthorityTransport for GrpcAuthority {
    async fn sign(&self, template: SignTemplate) -> Result<Vec<u8>, IdentityError> {
        debug!(
            common_name = %template.common_name,
            address = %self.address,
            "requesting certificate signature"
        );

        let channel = self.connect().await?;
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| IdentityError::Unreachable(e.to_string()))?;

        let mut request = tonic::Request::new(proto::SignRequest {
            domains: template.domains,
            addresses: template.addresses,
            service_name: template.common_name,
            public_key: template.public_key,
        });
        request
            .metadata_mut()
            .insert("authorization", self.credentials.metadata_value()?);

        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(SIGN_METHOD);
        let response: tonic::Response<proto::SignResponse> = grpc
            .unary(request, path, codec)
            .await
            .map_err(|status| match status.code() {
                Code::PermissionDenied | Code::Unauthenticated | Code::InvalidArgument => {
                    IdentityError::Rejected(status.message().to_string())
                }
                _ => IdentityError::Unreachable(status.to_string()),
            })?;

        let certificate = response.into_inner().certificate;
        if certificate.is_empty() {
            return Err(IdentityError::Malformed(
                "authority returned an empty certificate".to_string(),
            ));
        }
        Ok(certificate)
    }
}
