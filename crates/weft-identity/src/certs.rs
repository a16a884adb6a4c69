//! X.509 certificate parsing, chain checks, and PEM I/O

use std::fmt;
use std::path::Path;
use std::time::SystemTime;

use der::asn1::{Ia5StringRef, ObjectIdentifier, PrintableStringRef, Utf8StringRef};
use der::{Decode, Encode};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use x509_cert::Certificate as X509Certificate;

use crate::error::IdentityError;
use crate::fsutil;
use crate::keys::PrivateKey;

const PEM_TAG_CERTIFICATE: &str = "CERTIFICATE";
const OID_ECDSA_WITH_SHA256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// A parsed X.509 certificate together with its DER encoding
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    parsed: X509Certificate,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("common_name", &self.common_name())
            .field("der_len", &self.der.len())
            .finish()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Certificate {
    /// Parse a certificate from DER bytes
    pub fn from_der(der: Vec<u8>) -> Result<Self, IdentityError> {
        let parsed = X509Certificate::from_der(&der)
            .map_err(|e| IdentityError::Malformed(format!("x509 parsing: {}", e)))?;
        Ok(Self { der, parsed })
    }

    /// Parse a certificate from PEM text holding exactly one CERTIFICATE
    /// block
    pub fn from_pem(text: &str) -> Result<Self, IdentityError> {
        let blocks = pem::parse_many(text)
            .map_err(|e| IdentityError::Malformed(format!("pem parsing: {}", e)))?;

        let mut certificates = blocks
            .iter()
            .filter(|b| b.tag() == PEM_TAG_CERTIFICATE);

        let block = certificates
            .next()
            .ok_or_else(|| IdentityError::Malformed("no CERTIFICATE block".to_string()))?;
        if certificates.next().is_some() {
            return Err(IdentityError::Malformed(
                "expected exactly one CERTIFICATE block".to_string(),
            ));
        }

        Self::from_der(block.contents().to_vec())
    }

    /// Load a certificate from a PEM file
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        if !path.exists() {
            return Err(IdentityError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_pem(&text)
            .map_err(|e| IdentityError::Malformed(format!("{}: {}", path.display(), e)))
    }

    /// Store the certificate as a PEM file with the given unix mode
    pub fn store(&self, path: &Path, mode: u32) -> Result<(), IdentityError> {
        fsutil::write_atomic(path, self.to_pem().as_bytes(), mode).map_err(IdentityError::Io)
    }

    /// PEM encoding
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(
            PEM_TAG_CERTIFICATE.to_string(),
            self.der.clone(),
        ))
    }

    /// Raw DER bytes
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Start of the validity window
    pub fn not_before(&self) -> SystemTime {
        self.parsed.tbs_certificate.validity.not_before.to_system_time()
    }

    /// End of the validity window
    pub fn not_after(&self) -> SystemTime {
        self.parsed.tbs_certificate.validity.not_after.to_system_time()
    }

    /// Whether `now` falls inside [NotBefore, NotAfter]
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        self.not_before() <= now && now <= self.not_after()
    }

    /// Subject common name, if the certificate carries one
    pub fn common_name(&self) -> Option<String> {
        for rdn in self.parsed.tbs_certificate.subject.0.iter() {
            for atv in rdn.0.iter() {
                if atv.oid != OID_COMMON_NAME {
                    continue;
                }
                if let Ok(s) = PrintableStringRef::try_from(&atv.value) {
                    return Some(s.to_string());
                }
                if let Ok(s) = Utf8StringRef::try_from(&atv.value) {
                    return Some(s.to_string());
                }
                if let Ok(s) = Ia5StringRef::try_from(&atv.value) {
                    return Some(s.to_string());
                }
            }
        }
        None
    }

    /// ECDSA P-256 public key carried by the certificate
    pub fn public_key(&self) -> Result<VerifyingKey, IdentityError> {
        let point = self
            .parsed
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| IdentityError::Malformed("public key bit string".to_string()))?;
        VerifyingKey::from_sec1_bytes(point)
            .map_err(|e| IdentityError::Malformed(format!("public key: {}", e)))
    }

    /// Verify that this certificate was signed by `authority`
    ///
    /// Direct issuer verification for the mesh's single-authority trust
    /// model: issuer DN match plus an ECDSA P-256/SHA-256 signature check
    /// over the TBS encoding. Path building is intentionally absent.
    pub fn verify_signed_by(&self, authority: &Certificate) -> Result<(), IdentityError> {
        if self.parsed.tbs_certificate.issuer != authority.parsed.tbs_certificate.subject {
            return Err(IdentityError::Untrusted(
                "issuer does not match authority subject".to_string(),
            ));
        }
        if self.parsed.signature_algorithm.oid != OID_ECDSA_WITH_SHA256 {
            return Err(IdentityError::Malformed(format!(
                "unsupported signature algorithm {}",
                self.parsed.signature_algorithm.oid
            )));
        }

        let tbs = self
            .parsed
            .tbs_certificate
            .to_der()
            .map_err(|e| IdentityError::Malformed(format!("tbs encoding: {}", e)))?;
        let signature_bytes = self
            .parsed
            .signature
            .as_bytes()
            .ok_or_else(|| IdentityError::Malformed("signature bit string".to_string()))?;
        let signature = Signature::from_der(signature_bytes)
            .map_err(|e| IdentityError::Malformed(format!("signature encoding: {}", e)))?;

        authority
            .public_key()?
            .verify(&tbs, &signature)
            .map_err(|_| IdentityError::Untrusted("signature verification failed".to_string()))
    }
}

/// Load a certificate from a PEM file (free-function form)
pub fn load_certificate(path: &Path) -> Result<Certificate, IdentityError> {
    Certificate::load(path)
}

/// Store a certificate as a PEM file
pub fn store_certificate(
    certificate: &Certificate,
    path: &Path,
    mode: u32,
) -> Result<(), IdentityError> {
    certificate.store(path, mode)
}

/// An authority-signed service certificate with its private key
///
/// Invariant once validated: the certificate chains to `authority` and the
/// current wall clock falls inside its validity window.
#[derive(Clone, Debug)]
pub struct CertificatePair {
    /// The service certificate
    pub certificate: Certificate,
    /// The matching private key
    pub private_key: PrivateKey,
    /// The signing authority certificate
    pub authority: Certificate,
}

impl CertificatePair {
    /// Check the pair invariant at `now`: chain, window, and key match
    pub fn validate_at(&self, now: SystemTime) -> Result<(), IdentityError> {
        self.certificate.verify_signed_by(&self.authority)?;
        if !self.certificate.is_valid_at(now) {
            return Err(IdentityError::Untrusted(
                "certificate outside its validity window".to_string(),
            ));
        }
        if let PrivateKey::Ecdsa(_) = self.private_key {
            if self.certificate.public_key()? != self.private_key.verifying_key()? {
                return Err(IdentityError::Untrusted(
                    "private key does not match certificate".to_string(),
                ));
            }
        }
        Ok(())
    }
}
