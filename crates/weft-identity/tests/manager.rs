//! Certificate lifecycle integration tests

use std::sync::Arc;

use weft_core::FqName;
use weft_identity::certs::{store_certificate, CertificatePair};
use weft_identity::keys::{generate_keypair, store_private_key};
use weft_identity::testing::{MockAuthority, TestAuthority};
use weft_identity::{CertificateManager, IdentityError, PrepareOptions};

struct Fixture {
    _dir: tempfile::TempDir,
    options: PrepareOptions,
    authority: Arc<TestAuthority>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let authority = Arc::new(TestAuthority::new());

    let authority_cert_path = dir.path().join("ca.crt");
    store_certificate(authority.certificate(), &authority_cert_path, 0o644).unwrap();

    let options = PrepareOptions {
        name: FqName::new("mesh", "svc-a").unwrap(),
        data_dir: dir.path().to_path_buf(),
        domains: vec!["a.example".to_string()],
        addresses: vec!["10.0.0.1".to_string()],
        authority_cert_path,
        cert_file: None,
        key_file: None,
        key_password: String::new(),
    };

    Fixture {
        _dir: dir,
        options,
        authority,
    }
}

#[tokio::test]
async fn cold_start_requests_exactly_one_signature() {
    let f = fixture();
    let transport = MockAuthority::new(f.authority.clone());

    let manager = CertificateManager::prepare(f.options.clone(), &transport)
        .await
        .unwrap();

    assert_eq!(transport.sign_calls(), 1);

    // Derived file names exist and verify against the authority.
    let cert_path = f.options.data_dir.join("svc_a.crt");
    let key_path = f.options.data_dir.join("svc_a.key");
    assert!(cert_path.exists());
    assert!(key_path.exists());
    assert_eq!(manager.cert_path(), cert_path.as_path());

    manager
        .certificate()
        .verify_signed_by(f.authority.certificate())
        .unwrap();
    assert_eq!(manager.certificate().common_name().as_deref(), Some("svc.a"));
}

#[tokio::test]
async fn warm_start_reuses_pair_without_rpc() {
    let f = fixture();
    let transport = MockAuthority::new(f.authority.clone());

    let first = CertificateManager::prepare(f.options.clone(), &transport)
        .await
        .unwrap();
    let second = CertificateManager::prepare(f.options.clone(), &transport)
        .await
        .unwrap();

    assert_eq!(transport.sign_calls(), 1);
    assert_eq!(second.certificate(), first.certificate());
}

#[tokio::test]
async fn expired_pair_is_renewed() {
    let f = fixture();
    let transport = MockAuthority::new(f.authority.clone());

    // Seed the data directory with a pair whose window already lapsed.
    let key = generate_keypair();
    let expired = f
        .authority
        .issue_expired("svc.a", &key.public_key_sec1().unwrap());
    store_certificate(&expired, &f.options.data_dir.join("svc_a.crt"), 0o644).unwrap();
    store_private_key(&key, "", &f.options.data_dir.join("svc_a.key")).unwrap();

    let manager = CertificateManager::prepare(f.options.clone(), &transport)
        .await
        .unwrap();

    assert_eq!(transport.sign_calls(), 1);
    assert_ne!(manager.certificate(), &expired);
    assert!(manager
        .certificate()
        .is_valid_at(std::time::SystemTime::now()));
}

#[tokio::test]
async fn corrupt_pair_is_renewed() {
    let f = fixture();
    let transport = MockAuthority::new(f.authority.clone());

    std::fs::write(f.options.data_dir.join("svc_a.crt"), "garbage").unwrap();
    std::fs::write(f.options.data_dir.join("svc_a.key"), "garbage").unwrap();

    let manager = CertificateManager::prepare(f.options.clone(), &transport)
        .await
        .unwrap();

    assert_eq!(transport.sign_calls(), 1);
    manager
        .pair()
        .validate_at(std::time::SystemTime::now())
        .unwrap();
}

#[tokio::test]
async fn pair_signed_by_foreign_authority_is_renewed() {
    let f = fixture();
    let transport = MockAuthority::new(f.authority.clone());

    let impostor = TestAuthority::new();
    let key = generate_keypair();
    let foreign = impostor.issue("svc.a", &key.public_key_sec1().unwrap());
    store_certificate(&foreign, &f.options.data_dir.join("svc_a.crt"), 0o644).unwrap();
    store_private_key(&key, "", &f.options.data_dir.join("svc_a.key")).unwrap();

    let manager = CertificateManager::prepare(f.options.clone(), &transport)
        .await
        .unwrap();

    assert_eq!(transport.sign_calls(), 1);
    manager
        .certificate()
        .verify_signed_by(f.authority.certificate())
        .unwrap();
}

#[tokio::test]
async fn empty_authority_path_is_bad_input() {
    let mut f = fixture();
    f.options.authority_cert_path = std::path::PathBuf::new();
    let transport = MockAuthority::new(f.authority.clone());

    assert!(matches!(
        CertificateManager::prepare(f.options, &transport).await,
        Err(IdentityError::BadInput(_))
    ));
}

#[tokio::test]
async fn missing_authority_certificate_is_not_found() {
    let mut f = fixture();
    f.options.authority_cert_path = f.options.data_dir.join("absent-ca.crt");
    let transport = MockAuthority::new(f.authority.clone());

    assert!(matches!(
        CertificateManager::prepare(f.options, &transport).await,
        Err(IdentityError::NotFound(_))
    ));
}

#[tokio::test]
async fn explicit_file_overrides_are_respected() {
    let mut f = fixture();
    f.options.cert_file = Some(f.options.data_dir.join("override.crt"));
    f.options.key_file = Some(f.options.data_dir.join("override.key"));
    let transport = MockAuthority::new(f.authority.clone());

    CertificateManager::prepare(f.options.clone(), &transport)
        .await
        .unwrap();

    assert!(f.options.data_dir.join("override.crt").exists());
    assert!(f.options.data_dir.join("override.key").exists());
    assert!(!f.options.data_dir.join("svc_a.crt").exists());
}

#[tokio::test]
async fn password_protected_pair_round_trips() {
    let mut f = fixture();
    f.options.key_password = "hunter2".to_string();
    let transport = MockAuthority::new(f.authority.clone());

    let first = CertificateManager::prepare(f.options.clone(), &transport)
        .await
        .unwrap();
    let second = CertificateManager::prepare(f.options.clone(), &transport)
        .await
        .unwrap();

    assert_eq!(transport.sign_calls(), 1);
    assert_eq!(second.certificate(), first.certificate());
}
