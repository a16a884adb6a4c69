//! Private key generation and PEM I/O

use std::fmt;
use std::path::Path;

use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use p256::SecretKey;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo};
use rand::rngs::OsRng;

use crate::error::IdentityError;
use crate::fsutil;

const TAG_EC: &str = "EC PRIVATE KEY";
// Label written by older mesh deployments; read-compatible.
const TAG_EC_LEGACY: &str = "ECDSA PRIVATE KEY";
const TAG_PKCS8: &str = "PRIVATE KEY";
const TAG_PKCS8_ENCRYPTED: &str = "ENCRYPTED PRIVATE KEY";
const TAG_RSA: &str = "RSA PRIVATE KEY";

/// A service private key
///
/// The mesh only ever issues ECDSA P-256 pairs; RSA keys are recognized on
/// disk so an operator-provisioned identity still loads for TLS use, but
/// they cannot sign tokens or certificate requests.
#[derive(Clone)]
pub enum PrivateKey {
    /// ECDSA P-256 key
    Ecdsa(SecretKey),
    /// RSA key as PKCS#1 DER, usable as a TLS identity only
    Rsa(Vec<u8>),
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKey::Ecdsa(_) => f.write_str("PrivateKey::Ecdsa(..)"),
            PrivateKey::Rsa(_) => f.write_str("PrivateKey::Rsa(..)"),
        }
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PrivateKey::Ecdsa(a), PrivateKey::Ecdsa(b)) => a.to_bytes() == b.to_bytes(),
            (PrivateKey::Rsa(a), PrivateKey::Rsa(b)) => a == b,
            _ => false,
        }
    }
}

impl PrivateKey {
    /// ECDSA signing half, for token and request signatures
    pub fn signing_key(&self) -> Result<SigningKey, IdentityError> {
        match self {
            PrivateKey::Ecdsa(secret) => Ok(SigningKey::from(secret.clone())),
            PrivateKey::Rsa(_) => Err(IdentityError::UnsupportedKeyType(
                "rsa keys cannot sign mesh material".to_string(),
            )),
        }
    }

    /// ECDSA verifying half
    pub fn verifying_key(&self) -> Result<VerifyingKey, IdentityError> {
        match self {
            PrivateKey::Ecdsa(secret) => Ok(VerifyingKey::from(secret.public_key())),
            PrivateKey::Rsa(_) => Err(IdentityError::UnsupportedKeyType(
                "rsa keys have no p-256 verifying half".to_string(),
            )),
        }
    }

    /// Public key as an uncompressed SEC1 point (`04 || X || Y`)
    pub fn public_key_sec1(&self) -> Result<Vec<u8>, IdentityError> {
        match self {
            PrivateKey::Ecdsa(secret) => {
                Ok(secret.public_key().to_encoded_point(false).as_bytes().to_vec())
            }
            PrivateKey::Rsa(_) => Err(IdentityError::UnsupportedKeyType(
                "rsa keys have no sec1 point form".to_string(),
            )),
        }
    }

    /// Key DER for TLS identity use: SEC1 for ECDSA, PKCS#1 for RSA
    pub fn key_der(&self) -> Result<Vec<u8>, IdentityError> {
        match self {
            PrivateKey::Ecdsa(secret) => {
                let der = secret
                    .to_sec1_der()
                    .map_err(|e| IdentityError::Malformed(format!("sec1 encoding: {}", e)))?;
                Ok(der.to_vec())
            }
            PrivateKey::Rsa(der) => Ok(der.clone()),
        }
    }

    /// PEM encoding; a non-empty password produces an encrypted PKCS#8 block
    pub fn to_pem(&self, password: &str) -> Result<String, IdentityError> {
        match self {
            PrivateKey::Ecdsa(secret) if password.is_empty() => {
                let pem = secret
                    .to_sec1_pem(LineEnding::LF)
                    .map_err(|e| IdentityError::Malformed(format!("sec1 encoding: {}", e)))?;
                Ok(pem.to_string())
            }
            PrivateKey::Ecdsa(secret) => {
                let doc = secret
                    .to_pkcs8_der()
                    .map_err(|e| IdentityError::Malformed(format!("pkcs8 encoding: {}", e)))?;
                let info = PrivateKeyInfo::try_from(doc.as_bytes())
                    .map_err(|e| IdentityError::Malformed(format!("pkcs8 encoding: {}", e)))?;
                let encrypted = info
                    .encrypt(&mut OsRng, password.as_bytes())
                    .map_err(|e| IdentityError::Malformed(format!("pkcs8 encryption: {}", e)))?;
                let pem = encrypted
                    .to_pem(TAG_PKCS8_ENCRYPTED, LineEnding::LF)
                    .map_err(|e| IdentityError::Malformed(format!("pem encoding: {}", e)))?;
                Ok(pem.to_string())
            }
            PrivateKey::Rsa(_) if !password.is_empty() => Err(IdentityError::UnsupportedKeyType(
                "password protection is only supported for ecdsa keys".to_string(),
            )),
            PrivateKey::Rsa(der) => Ok(pem::encode(&pem::Pem::new(
                TAG_RSA.to_string(),
                der.clone(),
            ))),
        }
    }
}

/// Generate a fresh ECDSA P-256 keypair from the platform CSPRNG
pub fn generate_keypair() -> PrivateKey {
    PrivateKey::Ecdsa(SecretKey::random(&mut OsRng))
}

/// Load a private key from a single-block PEM file
///
/// Accepts `EC PRIVATE KEY` (and the legacy `ECDSA PRIVATE KEY` label),
/// PKCS#8 `PRIVATE KEY`, password-protected `ENCRYPTED PRIVATE KEY`, and
/// `RSA PRIVATE KEY` blocks.
pub fn load_private_key(path: &Path, password: &str) -> Result<PrivateKey, IdentityError> {
    if !path.exists() {
        return Err(IdentityError::NotFound(path.display().to_string()));
    }

    let text = std::fs::read_to_string(path)?;
    let blocks = pem::parse_many(&text)
        .map_err(|e| IdentityError::Malformed(format!("{}: {}", path.display(), e)))?;

    let block = blocks.first().ok_or_else(|| {
        IdentityError::Malformed(format!("{}: no pem blocks", path.display()))
    })?;

    match block.tag() {
        TAG_EC | TAG_EC_LEGACY => SecretKey::from_sec1_der(block.contents())
            .map(PrivateKey::Ecdsa)
            .map_err(|e| IdentityError::Malformed(format!("{}: {}", path.display(), e))),
        TAG_PKCS8 => SecretKey::from_pkcs8_der(block.contents())
            .map(PrivateKey::Ecdsa)
            .map_err(|e| IdentityError::Malformed(format!("{}: {}", path.display(), e))),
        TAG_PKCS8_ENCRYPTED => {
            if password.is_empty() {
                return Err(IdentityError::Malformed(format!(
                    "{}: key is password-protected",
                    path.display()
                )));
            }
            let info = EncryptedPrivateKeyInfo::try_from(block.contents())
                .map_err(|e| IdentityError::Malformed(format!("{}: {}", path.display(), e)))?;
            let doc = info
                .decrypt(password)
                .map_err(|e| IdentityError::Malformed(format!("{}: {}", path.display(), e)))?;
            SecretKey::from_pkcs8_der(doc.as_bytes())
                .map(PrivateKey::Ecdsa)
                .map_err(|e| IdentityError::Malformed(format!("{}: {}", path.display(), e)))
        }
        TAG_RSA => Ok(PrivateKey::Rsa(block.contents().to_vec())),
        other => Err(IdentityError::UnsupportedKeyType(other.to_string())),
    }
}

/// Store a private key as a single-block PEM file (mode 0600 on unix)
pub fn store_private_key(
    key: &PrivateKey,
    password: &str,
    path: &Path,
) -> Result<(), IdentityError> {
    let pem = key.to_pem(password)?;
    fsutil::write_atomic(path, pem.as_bytes(), 0o600).map_err(IdentityError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc_a.key");
        let key = generate_keypair();

        store_private_key(&key, "", &path).unwrap();
        let loaded = load_private_key(&path, "").unwrap();

        assert_eq!(loaded, key);
    }

    #[test]
    fn test_password_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc_a.key");
        let key = generate_keypair();

        store_private_key(&key, "hunter2", &path).unwrap();
        let loaded = load_private_key(&path, "hunter2").unwrap();

        assert_eq!(loaded, key);
    }

    #[test]
    fn test_encrypted_key_requires_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc_a.key");
        let key = generate_keypair();

        store_private_key(&key, "hunter2", &path).unwrap();

        assert!(matches!(
            load_private_key(&path, ""),
            Err(IdentityError::Malformed(_))
        ));
        assert!(load_private_key(&path, "wrong").is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.key");

        assert!(matches!(
            load_private_key(&path, ""),
            Err(IdentityError::NotFound(_))
        ));
    }

    #[test]
    fn test_garbage_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc_a.key");
        std::fs::write(&path, "not a pem file").unwrap();

        assert!(matches!(
            load_private_key(&path, ""),
            Err(IdentityError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_tag_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc_a.key");
        let block = pem::Pem::new("OPENSSH PRIVATE KEY".to_string(), vec![1, 2, 3]);
        std::fs::write(&path, pem::encode(&block)).unwrap();

        assert!(matches!(
            load_private_key(&path, ""),
            Err(IdentityError::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn test_legacy_ecdsa_label_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc_a.key");
        let key = generate_keypair();

        // Rewrite the stored block under the legacy label.
        let pem_text = key.to_pem("").unwrap();
        let block = pem::parse(pem_text.as_bytes()).unwrap();
        let legacy = pem::Pem::new(TAG_EC_LEGACY.to_string(), block.contents().to_vec());
        std::fs::write(&path, pem::encode(&legacy)).unwrap();

        assert_eq!(load_private_key(&path, "").unwrap(), key);
    }

    #[test]
    fn test_rsa_key_cannot_sign() {
        let key = PrivateKey::Rsa(vec![0x30, 0x82]);
        assert!(matches!(
            key.signing_key(),
            Err(IdentityError::UnsupportedKeyType(_))
        ));
    }
}
