//! Mutual-TLS configuration assembly
//!
//! Builds both rustls configurations (for the HTTP listener) and tonic
//! configurations (for gRPC endpoints) from a validated
//! [`CertificatePair`]. The trust pool always consists solely of the mesh
//! authority certificate.

use rustls::server::AllowAnyAnonymousOrAuthenticatedClient;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tonic::transport::{ClientTlsConfig, Identity, ServerTlsConfig};

use crate::certs::{Certificate, CertificatePair};
use crate::error::IdentityError;

fn authority_roots(authority: &Certificate) -> Result<RootCertStore, IdentityError> {
    let mut roots = RootCertStore::empty();
    roots
        .add(&rustls::Certificate(authority.der().to_vec()))
        .map_err(|e| IdentityError::Malformed(format!("authority certificate: {}", e)))?;
    Ok(roots)
}

/// rustls server configuration with client auth set to "request, verify if
/// given"
pub fn server_tls_config(pair: &CertificatePair) -> Result<ServerConfig, IdentityError> {
    let roots = authority_roots(&pair.authority)?;
    let verifier = AllowAnyAnonymousOrAuthenticatedClient::new(roots).boxed();

    ServerConfig::builder()
        .with_safe_defaults()
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            vec![rustls::Certificate(pair.certificate.der().to_vec())],
            rustls::PrivateKey(pair.private_key.key_der()?),
        )
        .map_err(|e| IdentityError::Tls(e.to_string()))
}

/// rustls client configuration trusting the authority and presenting the
/// pair as client identity
pub fn client_tls_config(pair: &CertificatePair) -> Result<ClientConfig, IdentityError> {
    let roots = authority_roots(&pair.authority)?;

    ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_client_auth_cert(
            vec![rustls::Certificate(pair.certificate.der().to_vec())],
            rustls::PrivateKey(pair.private_key.key_der()?),
        )
        .map_err(|e| IdentityError::Tls(e.to_string()))
}

/// tonic server TLS: service identity plus optional client certificates
/// verified against the authority
pub fn grpc_server_tls(pair: &CertificatePair) -> Result<ServerTlsConfig, IdentityError> {
    let identity = Identity::from_pem(pair.certificate.to_pem(), pair.private_key.to_pem("")?);
    Ok(ServerTlsConfig::new()
        .identity(identity)
        .client_ca_root(tonic::transport::Certificate::from_pem(
            pair.authority.to_pem(),
        ))
        .client_auth_optional(true))
}

/// tonic client TLS: authority as the root, pair as client identity
///
/// `server_name` overrides the name expected on the peer certificate;
/// `None` leaves the dialed host in charge.
pub fn grpc_client_tls(
    pair: &CertificatePair,
    server_name: Option<&str>,
) -> Result<ClientTlsConfig, IdentityError> {
    let identity = Identity::from_pem(pair.certificate.to_pem(), pair.private_key.to_pem("")?);
    let mut tls = ClientTlsConfig::new()
        .ca_certificate(tonic::transport::Certificate::from_pem(
            pair.authority.to_pem(),
        ))
        .identity(identity);
    if let Some(name) = server_name {
        tls = tls.domain_name(name);
    }
    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;
    use crate::testing::TestAuthority;

    fn pair() -> CertificatePair {
        let authority = TestAuthority::new();
        let key = generate_keypair();
        let certificate = authority.issue("svc.a", &key.public_key_sec1().unwrap());
        CertificatePair {
            certificate,
            private_key: key,
            authority: authority.certificate().clone(),
        }
    }

    #[test]
    fn test_server_config_builds() {
        server_tls_config(&pair()).unwrap();
    }

    #[test]
    fn test_client_config_builds() {
        client_tls_config(&pair()).unwrap();
    }

    #[test]
    fn test_grpc_configs_build() {
        let p = pair();
        grpc_server_tls(&p).unwrap();
        grpc_client_tls(&p, Some("svc.b")).unwrap();
        grpc_client_tls(&p, None).unwrap();
    }
}
