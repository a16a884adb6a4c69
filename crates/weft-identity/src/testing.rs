//! In-process authority for tests
//!
//! Mints a self-signed root and leaf certificates over arbitrary P-256
//! public keys so integration tests never need a live authority.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use der::asn1::UtcTime;
use der::Encode;
use p256::ecdsa::{DerSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use spki::EncodePublicKey;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::{Time, Validity};

use crate::authority::{AuthorityTransport, SignTemplate};
use crate::certs::Certificate;
use crate::error::IdentityError;

/// A self-signed test authority able to issue leaf certificates
pub struct TestAuthority {
    signing_key: SigningKey,
    subject: Name,
    certificate: Certificate,
    serial: AtomicU32,
}

impl TestAuthority {
    /// Mint a fresh self-signed root
    pub fn new() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        let subject = Name::from_str("CN=Weft Test Authority").expect("authority subject");

        let builder = CertificateBuilder::new(
            Profile::Root,
            SerialNumber::from(1u32),
            Validity::from_now(Duration::from_secs(24 * 3600)).expect("authority validity"),
            subject.clone(),
            spki_from_key(&verifying_key),
            &signing_key,
        )
        .expect("authority builder");
        let certificate = builder.build::<DerSignature>().expect("authority build");

        Self {
            signing_key,
            subject,
            certificate: wrap(certificate),
            serial: AtomicU32::new(2),
        }
    }

    /// The authority certificate
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Issue a one-hour leaf for `common_name` over the given SEC1 public
    /// key
    pub fn issue(&self, common_name: &str, public_key_sec1: &[u8]) -> Certificate {
        let now = unix_now();
        self.issue_with_window(common_name, public_key_sec1, now - 60, now + 3600)
    }

    /// Issue a leaf whose validity window already lapsed
    pub fn issue_expired(&self, common_name: &str, public_key_sec1: &[u8]) -> Certificate {
        let now = unix_now();
        self.issue_with_window(common_name, public_key_sec1, now - 7200, now - 3600)
    }

    fn issue_with_window(
        &self,
        common_name: &str,
        public_key_sec1: &[u8],
        not_before_unix: u64,
        not_after_unix: u64,
    ) -> Certificate {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(public_key_sec1).expect("subject public key");
        let subject =
            Name::from_str(&format!("CN={}", common_name)).expect("leaf subject");
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);

        let builder = CertificateBuilder::new(
            Profile::Leaf {
                issuer: self.subject.clone(),
                enable_key_agreement: false,
                enable_key_encipherment: false,
            },
            SerialNumber::from(serial),
            validity_between(not_before_unix, not_after_unix),
            subject,
            spki_from_key(&verifying_key),
            &self.signing_key,
        )
        .expect("leaf builder");

        wrap(builder.build::<DerSignature>().expect("leaf build"))
    }
}

impl Default for TestAuthority {
    fn default() -> Self {
        Self::new()
    }
}

/// AuthorityTransport backed by a [`TestAuthority`], counting Sign calls
pub struct MockAuthority {
    authority: Arc<TestAuthority>,
    sign_calls: AtomicUsize,
}

impl MockAuthority {
    /// Wrap a test authority
    pub fn new(authority: Arc<TestAuthority>) -> Self {
        Self {
            authority,
            sign_calls: AtomicUsize::new(0),
        }
    }

    /// Number of Sign RPCs observed
    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AuthorityTransport for MockAuthority {
    async fn sign(&self, template: SignTemplate) -> Result<Vec<u8>, IdentityError> {
        self.sign_calls.fetch_add(1, Ordering::Relaxed);
        let certificate = self
            .authority
            .issue(&template.common_name, &template.public_key);
        Ok(certificate.der().to_vec())
    }
}

fn spki_from_key(key: &VerifyingKey) -> SubjectPublicKeyInfoOwned {
    let der = key.to_public_key_der().expect("public key der");
    SubjectPublicKeyInfoOwned::try_from(der.as_bytes()).expect("spki")
}

fn wrap(certificate: x509_cert::Certificate) -> Certificate {
    let der = certificate.to_der().expect("certificate der");
    Certificate::from_der(der).expect("certificate parse")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs()
}

fn validity_between(not_before_unix: u64, not_after_unix: u64) -> Validity {
    Validity {
        not_before: Time::UtcTime(
            UtcTime::from_unix_duration(Duration::from_secs(not_before_unix))
                .expect("not before"),
        ),
        not_after: Time::UtcTime(
            UtcTime::from_unix_duration(Duration::from_secs(not_after_unix)).expect("not after"),
        ),
    }
}
