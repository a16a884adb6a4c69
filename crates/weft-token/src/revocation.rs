//! Revocation store client: streamed mirror of a token store
//!
//! One instance per distinct token-store address. The local dictionary is
//! the positive list of issued-and-still-live tokens: an absent record
//! means never-issued or revoked, and both answer `Revoked`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::RevocationStore;
use crate::token::{TokenStatus, UNSET};
use crate::transport::{RevocationEvent, TokenStoreTransport};

/// Reconnect interval for the revocation feed
const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Callback fired with the jti of each revoked token
pub type RevokedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Opaque handle identifying a revoked-callback registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(Uuid);

/// Streaming consumer of one token store's revocation feed
pub struct RevocationStoreClient {
    store: Arc<RevocationStore>,
    callbacks: Arc<Mutex<HashMap<Uuid, RevokedCallback>>>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RevocationStoreClient {
    /// Start a client over the given dictionary and transport; the listen
    /// task is spawned immediately
    pub fn start(store: Arc<RevocationStore>, transport: Arc<dyn TokenStoreTransport>) -> Self {
        let callbacks: Arc<Mutex<HashMap<Uuid, RevokedCallback>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(listen_loop(
            transport,
            store.clone(),
            callbacks.clone(),
            stop_rx,
        ));

        Self {
            store,
            callbacks,
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Revocation status of `jti` at the current wall clock
    pub fn status(&self, jti: &str) -> TokenStatus {
        self.status_at(jti, chrono::Utc::now().timestamp())
    }

    /// Revocation status of `jti` at `now` (unix seconds)
    pub fn status_at(&self, jti: &str, now: i64) -> TokenStatus {
        let Some(record) = self.store.get(jti) else {
            return TokenStatus::Revoked;
        };
        if record.exp != UNSET && record.exp <= now {
            return TokenStatus::Expired;
        }
        if record.nbf != UNSET && record.nbf > now {
            return TokenStatus::NotEffective;
        }
        TokenStatus::Valid
    }

    /// Register a callback fired with each revoked jti
    pub fn register_revoked_callback(&self, callback: RevokedCallback) -> CallbackHandle {
        let id = Uuid::new_v4();
        lock(&self.callbacks).insert(id, callback);
        CallbackHandle(id)
    }

    /// Drop a callback registration
    pub fn deregister_revoked_callback(&self, handle: CallbackHandle) {
        lock(&self.callbacks).remove(&handle.0);
    }

    /// Number of mirrored records
    pub fn records(&self) -> usize {
        self.store.len()
    }

    /// Signal the listen loop to stop and wait briefly for it
    pub async fn disconnect(&self) {
        let _ = self.stop_tx.send(true);
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .is_err()
            {
                debug!("revocation listen loop still draining after disconnect");
            }
        }
    }
}

impl Drop for RevocationStoreClient {
    fn drop(&mut self) {
        // Losers of the lazy-construction race (and plain drops) must not
        // leak their listen task.
        let _ = self.stop_tx.send(true);
    }
}

async fn listen_loop(
    transport: Arc<dyn TokenStoreTransport>,
    store: Arc<RevocationStore>,
    callbacks: Arc<Mutex<HashMap<Uuid, RevokedCallback>>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        match transport.listen().await {
            Ok(mut stream) => {
                info!("revocation feed established");
                loop {
                    tokio::select! {
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                return;
                            }
                        }
                        item = stream.next() => match item {
                            Some(Ok(event)) => apply_event(&store, &callbacks, event),
                            Some(Err(e)) => {
                                warn!(error = %e, "revocation feed error");
                                break;
                            }
                            None => {
                                warn!("revocation feed closed by remote");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "token store connection failed");
            }
        }

        if *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(RECONNECT_INTERVAL) => {}
        }
    }

    debug!("revocation listen loop stopped");
}

fn apply_event(
    store: &RevocationStore,
    callbacks: &Mutex<HashMap<Uuid, RevokedCallback>>,
    event: RevocationEvent,
) {
    match event {
        RevocationEvent::Save(record) => {
            store.insert(record);
        }
        RevocationEvent::Delete { jti } => {
            store.remove(&jti);
            let snapshot: Vec<RevokedCallback> = lock(callbacks).values().cloned().collect();
            for callback in snapshot {
                callback(&jti);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use crate::error::TokenError;
    use crate::store::RevocationRecord;
    use crate::transport::RevocationStream;

    struct ChannelTransport {
        rx: Mutex<Option<mpsc::UnboundedReceiver<Result<RevocationEvent, TokenError>>>>,
    }

    impl ChannelTransport {
        fn new() -> (
            Arc<Self>,
            mpsc::UnboundedSender<Result<RevocationEvent, TokenError>>,
        ) {
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
    impl TokenStoreTransport for ChannelTransport {
        async fn listen(&self) -> Result<RevocationStream, TokenError> {
            match self.rx.lock().unwrap().take() {
                Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
                None => Err(TokenError::Unreachable("feed exhausted".to_string())),
            }
        }
    }

    fn record(jti: &str) -> RevocationRecord {
        RevocationRecord {
            jti: jti.to_string(),
            nbf: UNSET,
            exp: UNSET,
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

    #[tokio::test]
    async fn absent_record_is_revoked() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RevocationStore::open(dir.path().join("jwt-store.db")));
        let (transport, _tx) = ChannelTransport::new();
        let client = RevocationStoreClient::start(store, transport);

        assert_eq!(client.status("j1"), TokenStatus::Revoked);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn save_then_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RevocationStore::open(dir.path().join("jwt-store.db")));
        let (transport, tx) = ChannelTransport::new();
        let client = RevocationStoreClient::start(store, transport);

        tx.send(Ok(RevocationEvent::Save(record("j1")))).unwrap();
        eventually(|| client.records() == 1).await;
        assert_eq!(client.status("j1"), TokenStatus::Valid);

        tx.send(Ok(RevocationEvent::Delete {
            jti: "j1".to_string(),
        }))
        .unwrap();
        eventually(|| client.records() == 0).await;
        assert_eq!(client.status("j1"), TokenStatus::Revoked);

        client.disconnect().await;
    }

    #[tokio::test]
    async fn delete_fires_revoked_callbacks() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RevocationStore::open(dir.path().join("jwt-store.db")));
        let (transport, tx) = ChannelTransport::new();
        let client = RevocationStoreClient::start(store, transport);

        let fired = Arc::new(AtomicUsize::new(0));
        let sink = fired.clone();
        let handle = client.register_revoked_callback(Arc::new(move |jti| {
            assert_eq!(jti, "j1");
            sink.fetch_add(1, Ordering::Relaxed);
        }));

        tx.send(Ok(RevocationEvent::Save(record("j1")))).unwrap();
        tx.send(Ok(RevocationEvent::Delete {
            jti: "j1".to_string(),
        }))
        .unwrap();
        eventually(|| fired.load(Ordering::Relaxed) == 1).await;

        client.deregister_revoked_callback(handle);
        tx.send(Ok(RevocationEvent::Save(record("j2")))).unwrap();
        tx.send(Ok(RevocationEvent::Delete {
            jti: "j2".to_string(),
        }))
        .unwrap();
        eventually(|| client.status("j2") == TokenStatus::Revoked).await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        client.disconnect().await;
    }

    #[tokio::test]
    async fn record_window_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RevocationStore::open(dir.path().join("jwt-store.db")));
        let (transport, tx) = ChannelTransport::new();
        let client = RevocationStoreClient::start(store, transport);

        let now = 1_000_000;
        tx.send(Ok(RevocationEvent::Save(RevocationRecord {
            jti: "past".to_string(),
            nbf: UNSET,
            exp: now,
        })))
        .unwrap();
        tx.send(Ok(RevocationEvent::Save(RevocationRecord {
            jti: "future".to_string(),
            nbf: now + 100,
            exp: UNSET,
        })))
        .unwrap();
        tx.send(Ok(RevocationEvent::Save(RevocationRecord {
            jti: "live".to_string(),
            nbf: now - 100,
            exp: now + 100,
        })))
        .unwrap();
        eventually(|| client.records() == 3).await;

        assert_eq!(client.status_at("past", now), TokenStatus::Expired);
        assert_eq!(client.status_at("future", now), TokenStatus::NotEffective);
        assert_eq!(client.status_at("live", now), TokenStatus::Valid);

        client.disconnect().await;
    }
}
