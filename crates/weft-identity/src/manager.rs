//! Certificate lifecycle orchestration
//!
//! [`CertificateManager::prepare`] guarantees that, on success, the process
//! holds a [`CertificatePair`] chained to the authority and inside its
//! validity window, persisted under deterministic filenames in the data
//! directory.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{error, info, warn};
use weft_core::FqName;

use crate::authority::{AuthorityTransport, BasicCredentials, GrpcAuthority, SignTemplate};
use crate::certs::{Certificate, CertificatePair};
use crate::error::IdentityError;
use crate::keys::{self, PrivateKey};
use crate::tls;

/// Inputs to [`CertificateManager::prepare`]
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Service name; drives the derived file names and the certificate
    /// common name
    pub name: FqName,
    /// Data directory for the persisted pair
    pub data_dir: PathBuf,
    /// DNS names for the certificate
    pub domains: Vec<String>,
    /// IP addresses for the certificate
    pub addresses: Vec<String>,
    /// Path to the authority certificate (PEM)
    pub authority_cert_path: PathBuf,
    /// Explicit certificate path overriding the derived name
    pub cert_file: Option<PathBuf>,
    /// Explicit key path overriding the derived name
    pub key_file: Option<PathBuf>,
    /// Password protecting the key file; empty for plain storage
    pub key_password: String,
}

impl PrepareOptions {
    fn cert_path(&self) -> PathBuf {
        self.cert_file.clone().unwrap_or_else(|| {
            self.data_dir
                .join(format!("{}.crt", self.name.snake_case()))
        })
    }

    fn key_path(&self) -> PathBuf {
        self.key_file.clone().unwrap_or_else(|| {
            self.data_dir
                .join(format!("{}.key", self.name.snake_case()))
        })
    }
}

/// Holder of the prepared certificate pair and its derived TLS
/// configurations
pub struct CertificateManager {
    pair: CertificatePair,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CertificateManager {
    /// Load or renew the service certificate pair
    ///
    /// Loads the authority certificate, attempts to reuse the persisted
    /// pair, and falls back to requesting a fresh signature from the
    /// authority when the pair is missing, unreadable, untrusted, or
    /// outside its validity window. A reusable pair never triggers an
    /// authority RPC.
    pub async fn prepare(
        options: PrepareOptions,
        transport: &dyn AuthorityTransport,
    ) -> Result<Self, IdentityError> {
        let authority = load_authority(&options.authority_cert_path)?;
        let cert_path = options.cert_path();
        let key_path = options.key_path();

        if let Some(pair) = try_load_pair(&cert_path, &key_path, &authority, &options.key_password)
        {
            info!(
                name = %options.name,
                cert = %cert_path.display(),
                "reusing persisted certificate pair"
            );
            return Ok(Self {
                pair,
                cert_path,
                key_path,
            });
        }

        let pair = renew(&options, &authority, transport).await?;
        persist(&pair, &cert_path, &key_path, &options.key_password);

        Ok(Self {
            pair,
            cert_path,
            key_path,
        })
    }

    /// Convenience wrapper building the production gRPC authority client
    /// from an address and a `key:secret` credentials string
    pub async fn prepare_with_authority(
        options: PrepareOptions,
        authority_address: &str,
        credentials: &str,
    ) -> Result<Self, IdentityError> {
        let authority = load_authority(&options.authority_cert_path)?;
        let credentials = BasicCredentials::parse(credentials)?;
        let transport = GrpcAuthority::new(authority_address, &authority, credentials);
        Self::prepare(options, &transport).await
    }

    /// The prepared pair
    pub fn pair(&self) -> &CertificatePair {
        &self.pair
    }

    /// The service certificate
    pub fn certificate(&self) -> &Certificate {
        &self.pair.certificate
    }

    /// The service private key
    pub fn private_key(&self) -> &PrivateKey {
        &self.pair.private_key
    }

    /// The authority certificate
    pub fn authority(&self) -> &Certificate {
        &self.pair.authority
    }

    /// Path of the persisted certificate
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Path of the persisted key
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// rustls server configuration derived from the pair
    pub fn server_tls_config(&self) -> Result<rustls::ServerConfig, IdentityError> {
        tls::server_tls_config(&self.pair)
    }

    /// rustls client configuration derived from the pair
    pub fn client_tls_config(&self) -> Result<rustls::ClientConfig, IdentityError> {
        tls::client_tls_config(&self.pair)
    }

    /// tonic server TLS derived from the pair
    pub fn grpc_server_tls(&self) -> Result<tonic::transport::ServerTlsConfig, IdentityError> {
        tls::grpc_server_tls(&self.pair)
    }

    /// tonic client TLS derived from the pair
    pub fn grpc_client_tls(
        &self,
        server_name: Option<&str>,
    ) -> Result<tonic::transport::ClientTlsConfig, IdentityError> {
        tls::grpc_client_tls(&self.pair, server_name)
    }
}

fn load_authority(path: &Path) -> Result<Certificate, IdentityError> {
    if path.as_os_str().is_empty() {
        return Err(IdentityError::BadInput(
            "authority certificate path is required".to_string(),
        ));
    }
    let resolved = std::fs::canonicalize(path)
        .map_err(|_| IdentityError::NotFound(path.display().to_string()))?;
    Certificate::load(&resolved)
}

/// Attempt to reuse the persisted pair; any failure falls through to
/// renewal.
fn try_load_pair(
    cert_path: &Path,
    key_path: &Path,
    authority: &Certificate,
    key_password: &str,
) -> Option<CertificatePair> {
    if !cert_path.exists() || !key_path.exists() {
        return None;
    }

    let certificate = match Certificate::load(cert_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %cert_path.display(), error = %e, "persisted certificate unreadable");
            return None;
        }
    };
    let private_key = match keys::load_private_key(key_path, key_password) {
        Ok(k) => k,
        Err(e) => {
            warn!(path = %key_path.display(), error = %e, "persisted key unreadable");
            return None;
        }
    };

    let pair = CertificatePair {
        certificate,
        private_key,
        authority: authority.clone(),
    };
    match pair.validate_at(SystemTime::now()) {
        Ok(()) => Some(pair),
        Err(e) => {
            info!(path = %cert_path.display(), reason = %e, "persisted pair needs renewal");
            None
        }
    }
}

async fn renew(
    options: &PrepareOptions,
    authority: &Certificate,
    transport: &dyn AuthorityTransport,
) -> Result<CertificatePair, IdentityError> {
    info!(name = %options.name, "requesting certificate from authority");

    let private_key = keys::generate_keypair();
    let template = SignTemplate {
        domains: options.domains.clone(),
        addresses: options.addresses.clone(),
        common_name: options.name.dotted(),
        public_key: private_key.public_key_sec1()?,
    };

    let der = transport.sign(template).await?;
    let certificate = Certificate::from_der(der)?;

    let pair = CertificatePair {
        certificate,
        private_key,
        authority: authority.clone(),
    };
    // The authority must hand back a certificate over our key, inside a
    // live window, chained to itself.
    pair.validate_at(SystemTime::now())?;
    Ok(pair)
}

/// Persist the pair; write failures are logged and do not invalidate the
/// in-memory state.
fn persist(pair: &CertificatePair, cert_path: &Path, key_path: &Path, key_password: &str) {
    if let Err(e) = pair.certificate.store(cert_path, 0o644) {
        error!(path = %cert_path.display(), error = %e, "failed to persist certificate");
    }
    if let Err(e) = keys::store_private_key(&pair.private_key, key_password, key_path) {
        error!(path = %key_path.display(), error = %e, "failed to persist key");
    }
}
