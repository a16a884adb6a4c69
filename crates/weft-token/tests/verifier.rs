//! End-to-end verifier tests over in-process registry and store transports

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use weft_core::{EventKind, FqName, Protocol, RegistryEvent, ServiceDescriptor, ServiceKind};
use weft_identity::keys::{generate_keypair, PrivateKey};
use weft_identity::testing::TestAuthority;
use weft_registry::{
    ConnectionInfo, EventStream, RegistryClient, RegistryError, RegistryTransport,
};
use weft_token::{
    token, Claims, RevocationEvent, RevocationRecord, RevocationStore, RevocationStoreClient,
    RevocationStream, StoreConnector, TokenError, TokenStatus, TokenStoreTransport, TokenVerifier,
    REVOCATION_DB_FILE, UNSET,
};

// ---- in-process registry ----

type RegistryEventSender = mpsc::UnboundedSender<Result<RegistryEvent, RegistryError>>;

struct MockRegistryTransport {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<RegistryEvent, RegistryError>>>>,
}

impl MockRegistryTransport {
    fn new() -> (Arc<Self>, RegistryEventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                rx: Mutex::new(Some(rx)),
            }),
            tx,
        )
    }
}

#[async_trait]
impl RegistryTransport for MockRegistryTransport {
    async fn register(&self, _descriptor: &ServiceDescriptor) -> Result<String, RegistryError> {
        Ok("reg-1".to_string())
    }

    async fn deregister(&self, _registry_id: &str) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn listen(&self) -> Result<EventStream, RegistryError> {
        match self.rx.lock().unwrap().take() {
            Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Err(RegistryError::Unreachable("stream exhausted".to_string())),
        }
    }
}

// ---- in-process token store ----

type StoreEventSender = mpsc::UnboundedSender<Result<RevocationEvent, TokenError>>;

struct MockStoreTransport {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<RevocationEvent, TokenError>>>>,
}

impl MockStoreTransport {
    fn new() -> (Arc<Self>, StoreEventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                rx: Mutex::new(Some(rx)),
            }),
            tx,
        )
    }
}

#[async_trait]
impl TokenStoreTransport for MockStoreTransport {
    async fn listen(&self) -> Result<RevocationStream, TokenError> {
        match self.rx.lock().unwrap().take() {
            Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Err(TokenError::Unreachable("feed exhausted".to_string())),
        }
    }
}

struct MockConnector {
    data_dir: std::path::PathBuf,
    transport: Arc<MockStoreTransport>,
    connects: AtomicUsize,
}

impl MockConnector {
    fn new(data_dir: std::path::PathBuf, transport: Arc<MockStoreTransport>) -> Self {
        Self {
            data_dir,
            transport,
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StoreConnector for MockConnector {
    async fn connect(
        &self,
        _store_fq_name: &str,
        _info: &ConnectionInfo,
    ) -> Result<RevocationStoreClient, TokenError> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        let store = Arc::new(RevocationStore::open(self.data_dir.join(REVOCATION_DB_FILE)));
        Ok(RevocationStoreClient::start(store, self.transport.clone()))
    }
}

// ---- fixtures ----

struct Fixture {
    _dir: tempfile::TempDir,
    registry: Arc<RegistryClient>,
    registry_tx: RegistryEventSender,
    store_tx: StoreEventSender,
    connector: Arc<MockConnector>,
    authority: TestAuthority,
    issuer_key: PrivateKey,
    issuer_token_key: p256::ecdsa::SigningKey,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let authority = TestAuthority::new();

    let (registry_transport, registry_tx) = MockRegistryTransport::new();
    let registry = Arc::new(RegistryClient::new(registry_transport));
    registry.connect().await;

    let (store_transport, store_tx) = MockStoreTransport::new();
    let connector = Arc::new(MockConnector::new(
        dir.path().to_path_buf(),
        store_transport,
    ));

    let issuer_key = generate_keypair();
    let issuer_token_key = issuer_key.signing_key().unwrap();

    Fixture {
        _dir: dir,
        registry,
        registry_tx,
        store_tx,
        connector,
        authority,
        issuer_key,
        issuer_token_key,
    }
}

impl Fixture {
    fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new(self.registry.clone(), self.connector.clone())
    }

    /// Mirror the issuer `mesh:svc-a` with a certificate over its key
    async fn publish_issuer(&self) {
        let cert = self
            .authority
            .issue("svc.a", &self.issuer_key.public_key_sec1().unwrap());
        let descriptor = ServiceDescriptor::new(
            FqName::new("mesh", "svc-a").unwrap(),
            ServiceKind::Application,
            "Service A",
        )
        .with_endpoint(Protocol::Grpc, "10.0.0.1:9000")
        .with_certificate(cert.to_pem());

        self.send_registered("svc-a", descriptor).await;
    }

    /// Mirror the token store `mesh:tokens`
    async fn publish_store(&self) {
        let key = generate_keypair();
        let cert = self
            .authority
            .issue("tokens", &key.public_key_sec1().unwrap());
        let descriptor = ServiceDescriptor::new(
            FqName::new("mesh", "tokens").unwrap(),
            ServiceKind::TokenStore,
            "Token Store",
        )
        .with_endpoint(Protocol::Grpc, "10.0.0.9:9300")
        .with_certificate(cert.to_pem());

        self.send_registered("tokens", descriptor).await;
    }

    async fn send_registered(&self, name: &str, descriptor: ServiceDescriptor) {
        self.registry_tx
            .send(Ok(RegistryEvent {
                kind: EventKind::Registered,
                fq_name: FqName::new("mesh", name).unwrap(),
                descriptor: Some(descriptor),
            }))
            .unwrap();
        let fq = format!("mesh:{}", name);
        eventually(|| self.registry.get(&fq).is_some()).await;
    }

    fn signed_token(&self, claims: &Claims) -> String {
        token::sign(claims, &self.issuer_token_key).unwrap()
    }
}

fn claims(store: &str) -> Claims {
    let now = chrono::Utc::now().timestamp();
    Claims {
        iss: "mesh:svc-a".to_string(),
        sub: "user-1".to_string(),
        jti: "j1".to_string(),
        nbf: UNSET,
        exp: now + 3600,
        store: store.to_string(),
    }
}

async fn eventually(predicate: impl Fn() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

// ---- scenarios ----

#[tokio::test]
async fn storeless_token_from_known_issuer_is_valid() {
    let f = fixture().await;
    f.publish_issuer().await;
    let verifier = f.verifier();

    let raw = f.signed_token(&claims(""));
    assert_eq!(verifier.verify(&raw).await, TokenStatus::Valid);

    let stats = verifier.stats();
    assert_eq!(stats.checked, 1);
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.issuers_cached, 1);
}

#[tokio::test]
async fn unmirrored_token_with_store_is_revoked() {
    let f = fixture().await;
    f.publish_issuer().await;
    f.publish_store().await;
    let verifier = f.verifier();

    // No Save event has reached the mirror; conservative deny.
    let raw = f.signed_token(&claims("mesh:tokens"));
    assert_eq!(verifier.verify(&raw).await, TokenStatus::Revoked);
}

#[tokio::test]
async fn mirrored_token_is_valid_until_deleted() {
    let f = fixture().await;
    f.publish_issuer().await;
    f.publish_store().await;
    let verifier = f.verifier();
    let raw = f.signed_token(&claims("mesh:tokens"));

    // First verify constructs the store client; the mirror is empty.
    assert_eq!(verifier.verify(&raw).await, TokenStatus::Revoked);

    f.store_tx
        .send(Ok(RevocationEvent::Save(RevocationRecord {
            jti: "j1".to_string(),
            nbf: UNSET,
            exp: UNSET,
        })))
        .unwrap();
    eventually(|| f.connector.connects.load(Ordering::Relaxed) == 1).await;
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    loop {
        if verifier.verify(&raw).await == TokenStatus::Valid {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "save event never reached the mirror"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    f.store_tx
        .send(Ok(RevocationEvent::Delete {
            jti: "j1".to_string(),
        }))
        .unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    loop {
        if verifier.verify(&raw).await == TokenStatus::Revoked {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "delete event never reached the mirror"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The store client was constructed once and reused.
    assert_eq!(f.connector.connects.load(Ordering::Relaxed), 1);
    assert_eq!(verifier.stats().stores_cached, 1);
}

#[tokio::test]
async fn unknown_issuer_is_reported() {
    let f = fixture().await;
    let verifier = f.verifier();

    let raw = f.signed_token(&claims(""));
    assert_eq!(verifier.verify(&raw).await, TokenStatus::UnknownIssuer);
}

#[tokio::test]
async fn unknown_store_is_conservatively_revoked() {
    let f = fixture().await;
    f.publish_issuer().await;
    let verifier = f.verifier();

    let raw = f.signed_token(&claims("mesh:absent-store"));
    assert_eq!(verifier.verify(&raw).await, TokenStatus::Revoked);
}

#[tokio::test]
async fn foreign_signature_is_not_signed() {
    let f = fixture().await;
    f.publish_issuer().await;
    let verifier = f.verifier();

    let impostor = generate_keypair().signing_key().unwrap();
    let raw = token::sign(&claims(""), &impostor).unwrap();
    assert_eq!(verifier.verify(&raw).await, TokenStatus::NotSigned);
}

#[tokio::test]
async fn garbage_is_not_valid() {
    let f = fixture().await;
    let verifier = f.verifier();

    assert_eq!(verifier.verify("garbage").await, TokenStatus::NotValid);
    assert_eq!(verifier.verify("a.b.c").await, TokenStatus::NotValid);
}

#[tokio::test]
async fn expired_token_is_expired() {
    let f = fixture().await;
    f.publish_issuer().await;
    let verifier = f.verifier();

    let mut c = claims("");
    c.exp = chrono::Utc::now().timestamp() - 10;
    let raw = f.signed_token(&c);
    assert_eq!(verifier.verify(&raw).await, TokenStatus::Expired);
}

#[tokio::test]
async fn issuer_certificate_is_cached_for_process_lifetime() {
    let f = fixture().await;
    f.publish_issuer().await;
    let verifier = f.verifier();

    let raw = f.signed_token(&claims(""));
    assert_eq!(verifier.verify(&raw).await, TokenStatus::Valid);

    // The registry now carries a new certificate over a different key;
    // the cached issuer key keeps validating old-key tokens.
    let new_key = generate_keypair();
    let new_cert = f
        .authority
        .issue("svc.a", &new_key.public_key_sec1().unwrap());
    let updated = ServiceDescriptor::new(
        FqName::new("mesh", "svc-a").unwrap(),
        ServiceKind::Application,
        "Service A",
    )
    .with_endpoint(Protocol::Grpc, "10.0.0.1:9000")
    .with_certificate(new_cert.to_pem());
    f.registry_tx
        .send(Ok(RegistryEvent {
            kind: EventKind::Updated,
            fq_name: FqName::new("mesh", "svc-a").unwrap(),
            descriptor: Some(updated.clone()),
        }))
        .unwrap();
    eventually(|| {
        f.registry
            .certificate("mesh:svc-a")
            .map(|pem| pem == new_cert.to_pem().as_bytes())
            .unwrap_or(false)
    })
    .await;

    // Old-key tokens still verify; new-key tokens do not.
    assert_eq!(verifier.verify(&raw).await, TokenStatus::Valid);
    let new_raw = token::sign(&claims(""), &new_key.signing_key().unwrap()).unwrap();
    assert_eq!(verifier.verify(&new_raw).await, TokenStatus::NotSigned);
}

#[tokio::test]
async fn authorization_framings() {
    let f = fixture().await;
    f.publish_issuer().await;
    let raw = f.signed_token(&claims(""));

    // Bearer framing.
    let verifier = f.verifier();
    assert_eq!(
        verifier.authorize(&format!("Bearer {}", raw)).await,
        TokenStatus::Valid
    );
    assert_eq!(
        verifier.authorize(&format!("Basic {}", raw)).await,
        TokenStatus::NotValid
    );

    // Gateway framing without a provisioned secret is rejected outright.
    assert_eq!(
        verifier
            .authorize(&format!("Gateway s3cret:{}", raw))
            .await,
        TokenStatus::NotValid
    );

    // With the secret provisioned, the framing is accepted and compared
    // constant-time.
    let verifier = f.verifier().with_gateway_secret("s3cret");
    assert_eq!(
        verifier
            .authorize(&format!("Gateway s3cret:{}", raw))
            .await,
        TokenStatus::Valid
    );
    assert_eq!(
        verifier
            .authorize(&format!("Gateway wrong:{}", raw))
            .await,
        TokenStatus::NotValid
    );
    assert_eq!(
        verifier.authorize("Gateway missing-separator").await,
        TokenStatus::NotValid
    );
}
