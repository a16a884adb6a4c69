//! Composed token verifier
//!
//! Answers "is this token currently valid?" by combining the registry
//! mirror (issuer certificates), the token parser (signature and window),
//! and per-store revocation clients constructed lazily from registry
//! connection info.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use p256::ecdsa::VerifyingKey;
use subtle::ConstantTimeEq;
use tonic::transport::{ClientTlsConfig, Identity};
use tracing::{debug, warn};
use weft_core::Protocol;
use weft_identity::Certificate;
use weft_registry::{ConnectionInfo, RegistryClient};

use crate::error::TokenError;
use crate::revocation::RevocationStoreClient;
use crate::store::RevocationStore;
use crate::token::{BearerToken, TokenStatus, VerifyOutcome};
use crate::transport::GrpcTokenStore;
use crate::REVOCATION_DB_FILE;

const BEARER_PREFIX: &str = "Bearer ";
const GATEWAY_PREFIX: &str = "Gateway ";

/// Seam for constructing a revocation client from registry connection
/// info; tests install in-process connectors
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    /// Build a running client for the store at `info`
    async fn connect(
        &self,
        store_fq_name: &str,
        info: &ConnectionInfo,
    ) -> Result<RevocationStoreClient, TokenError>;
}

/// Production connector dialing token stores over gRPC
///
/// Each store's dictionary lives in its own subdirectory of the data dir
/// so distinct stores never share a `jwt-store.db`.
pub struct GrpcStoreConnector {
    data_dir: PathBuf,
    identity: Option<(String, String)>,
    secure: bool,
}

impl GrpcStoreConnector {
    /// Connector writing dictionaries under `data_dir`; `secure` selects
    /// mutual TLS pinned to the store's registry certificate
    pub fn new(data_dir: impl Into<PathBuf>, secure: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            identity: None,
            secure,
        }
    }

    /// Present a client identity (PEM certificate and key) when dialing
    pub fn with_identity(
        mut self,
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Self {
        self.identity = Some((cert_pem.into(), key_pem.into()));
        self
    }
}

#[async_trait]
impl StoreConnector for GrpcStoreConnector {
    async fn connect(
        &self,
        store_fq_name: &str,
        info: &ConnectionInfo,
    ) -> Result<RevocationStoreClient, TokenError> {
        let db_path = self
            .data_dir
            .join(directory_name(store_fq_name))
            .join(REVOCATION_DB_FILE);
        let store = Arc::new(RevocationStore::open(db_path));

        let tls = if self.secure {
            let pem = std::str::from_utf8(&info.certificate)
                .map_err(|e| TokenError::Malformed(format!("store certificate: {}", e)))?;
            let peer = Certificate::from_pem(pem)
                .map_err(|e| TokenError::Malformed(format!("store certificate: {}", e)))?;

            let mut tls = ClientTlsConfig::new().ca_certificate(
                tonic::transport::Certificate::from_pem(&info.certificate),
            );
            if let Some(cn) = peer.common_name() {
                tls = tls.domain_name(cn);
            }
            if let Some((cert, key)) = &self.identity {
                tls = tls.identity(Identity::from_pem(cert, key));
            }
            Some(tls)
        } else {
            None
        };

        let transport = Arc::new(GrpcTokenStore::new(&info.address, tls)?);
        Ok(RevocationStoreClient::start(store, transport))
    }
}

/// Directory stem for a store's dictionary: lowercase with separator runs
/// collapsed to underscores
fn directory_name(fq_name: &str) -> String {
    let mut out = String::with_capacity(fq_name.len());
    let mut pending = false;
    for c in fq_name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending && !out.is_empty() {
                out.push('_');
            }
            pending = false;
            out.extend(c.to_lowercase());
        } else {
            pending = true;
        }
    }
    out
}

/// Counters exposed by [`TokenVerifier::stats`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifierStats {
    /// Tokens checked
    pub checked: u64,
    /// Tokens that came back Valid
    pub accepted: u64,
    /// Tokens that came back anything else
    pub rejected: u64,
    /// Issuer certificates cached
    pub issuers_cached: usize,
    /// Revocation clients cached
    pub stores_cached: usize,
}

#[derive(Default)]
struct Counters {
    checked: u64,
    accepted: u64,
    rejected: u64,
}

/// The composed verifier
///
/// Issuer-certificate cache entries go Absent → Present and are never
/// invalidated; certificate rotation requires a process restart.
pub struct TokenVerifier {
    registry: Arc<RegistryClient>,
    connector: Arc<dyn StoreConnector>,
    issuers: Mutex<HashMap<String, VerifyingKey>>,
    stores: Mutex<HashMap<String, Arc<RevocationStoreClient>>>,
    gateway_secret: Option<String>,
    counters: Mutex<Counters>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TokenVerifier {
    /// Build a verifier over the registry mirror and a store connector
    pub fn new(registry: Arc<RegistryClient>, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            registry,
            connector,
            issuers: Mutex::new(HashMap::new()),
            stores: Mutex::new(HashMap::new()),
            gateway_secret: None,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Provision the shared secret accepted in the Gateway framing
    pub fn with_gateway_secret(mut self, secret: impl Into<String>) -> Self {
        self.gateway_secret = Some(secret.into());
        self
    }

    /// Produce a status for a raw token
    pub async fn verify(&self, raw: &str) -> TokenStatus {
        let status = self.verify_inner(raw).await;

        let mut counters = lock(&self.counters);
        counters.checked += 1;
        if status == TokenStatus::Valid {
            counters.accepted += 1;
        } else {
            counters.rejected += 1;
        }
        status
    }

    /// Produce a status for an `Authorization` header value
    ///
    /// Understands `Bearer <token>` and, when the shared secret is
    /// provisioned, `Gateway <secret>:<token>`; every other framing is
    /// rejected.
    pub async fn authorize(&self, header: &str) -> TokenStatus {
        if let Some(token) = header.strip_prefix(BEARER_PREFIX) {
            return self.verify(token.trim()).await;
        }

        if let Some(rest) = header.strip_prefix(GATEWAY_PREFIX) {
            let Some(secret) = &self.gateway_secret else {
                warn!("gateway framing presented but no shared secret is provisioned");
                return TokenStatus::NotValid;
            };
            let Some((presented, token)) = rest.split_once(':') else {
                return TokenStatus::NotValid;
            };
            let matches: bool = presented
                .as_bytes()
                .ct_eq(secret.as_bytes())
                .into();
            if !matches {
                return TokenStatus::NotValid;
            }
            return self.verify(token.trim()).await;
        }

        TokenStatus::NotValid
    }

    /// Counter snapshot
    pub fn stats(&self) -> VerifierStats {
        let counters = lock(&self.counters);
        VerifierStats {
            checked: counters.checked,
            accepted: counters.accepted,
            rejected: counters.rejected,
            issuers_cached: lock(&self.issuers).len(),
            stores_cached: lock(&self.stores).len(),
        }
    }

    async fn verify_inner(&self, raw: &str) -> TokenStatus {
        let token = match BearerToken::parse(raw) {
            Ok(token) => token,
            Err(e) => {
                debug!(error = %e, "token failed structural parse");
                return TokenStatus::NotValid;
            }
        };

        let issuer_key = match self.issuer_key(&token.claims.iss) {
            Ok(key) => key,
            Err(status) => return status,
        };

        match token.verify(&issuer_key) {
            Ok(VerifyOutcome::Valid) => {}
            Ok(outcome) => return outcome.into(),
            Err(e) => {
                debug!(error = %e, "token failed verification");
                return TokenStatus::NotValid;
            }
        }

        if !token.claims.store.is_empty() {
            let client = match self.store_client(&token.claims.store).await {
                Ok(client) => client,
                Err(e) => {
                    // The store cannot be resolved or dialed: conservative
                    // deny, matching an unmirrored fresh token.
                    warn!(store = %token.claims.store, error = %e, "revocation store unavailable");
                    return TokenStatus::Revoked;
                }
            };
            return client.status(&token.claims.jti);
        }

        TokenStatus::Valid
    }

    /// Cached issuer key, resolved through the registry mirror on miss
    fn issuer_key(&self, issuer: &str) -> Result<VerifyingKey, TokenStatus> {
        if let Some(key) = lock(&self.issuers).get(issuer) {
            return Ok(*key);
        }

        let pem_bytes = self
            .registry
            .certificate(issuer)
            .map_err(|_| TokenStatus::UnknownIssuer)?;
        let pem = std::str::from_utf8(&pem_bytes).map_err(|_| TokenStatus::NotValid)?;
        let certificate = Certificate::from_pem(pem).map_err(|_| TokenStatus::NotValid)?;
        let key = certificate.public_key().map_err(|_| TokenStatus::NotValid)?;

        lock(&self.issuers).insert(issuer.to_string(), key);
        Ok(key)
    }

    /// Cached revocation client, constructed lazily on miss; the loser of
    /// a construction race drops its instance
    async fn store_client(
        &self,
        store_fq_name: &str,
    ) -> Result<Arc<RevocationStoreClient>, TokenError> {
        if let Some(client) = lock(&self.stores).get(store_fq_name) {
            return Ok(client.clone());
        }

        let info = self
            .registry
            .connection_info(store_fq_name, Protocol::Grpc)
            .map_err(|e| TokenError::NotFound(e.to_string()))?;
        let built = self.connector.connect(store_fq_name, &info).await?;

        let mut stores = lock(&self.stores);
        if let Some(existing) = stores.get(store_fq_name) {
            // Raced with another caller; `built` is dropped and its
            // listen task stopped.
            return Ok(existing.clone());
        }
        let client = Arc::new(built);
        stores.insert(store_fq_name.to_string(), client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_name() {
        assert_eq!(directory_name("mesh:tokens"), "mesh_tokens");
        assert_eq!(directory_name("Mesh:Token Store"), "mesh_token_store");
    }
}
