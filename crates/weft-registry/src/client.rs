//! Registry client: local mirror, subscriber fan-out, listen loop

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;
use weft_core::{EventKind, Protocol, RegistryEvent, ServiceDescriptor, ServiceKind};

use crate::error::RegistryError;
use crate::transport::RegistryTransport;

/// Failures retried back-to-back before falling into the slow interval
const RAPID_RECONNECT_ATTEMPTS: u32 = 3;
/// Slow reconnect interval after the rapid budget is spent
const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Subscriber callback invoked from the listen task
///
/// Callbacks must not call back into the client synchronously; the listen
/// task holds no lock while invoking them, but a re-entrant registration
/// change would deadlock on the subscriber map.
pub type EventCallback = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Opaque handle identifying a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

/// Address and peer certificate for one protocol endpoint of a service
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    /// Endpoint address (`host:port`)
    pub address: String,
    /// PEM certificate bytes from the descriptor metadata
    pub certificate: Vec<u8>,
}

/// Counters exposed by [`RegistryClient::stats`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryStats {
    /// Events applied to the mirror since connect
    pub events_applied: u64,
    /// Stream (re)connection attempts that failed or were lost
    pub reconnects: u64,
    /// Services currently mirrored
    pub services: usize,
    /// Active subscriptions
    pub subscribers: usize,
}

#[derive(Default)]
struct Counters {
    events_applied: u64,
    reconnects: u64,
}

/// A persistent, self-reconnecting mirror of the remote registry
///
/// The mirror is never flushed on disconnect: readers get
/// stale-but-last-known descriptors until the next event re-asserts or
/// removes them.
pub struct RegistryClient {
    transport: Arc<dyn RegistryTransport>,
    services: Arc<Mutex<HashMap<String, ServiceDescriptor>>>,
    subscribers: Arc<Mutex<HashMap<Uuid, EventCallback>>>,
    counters: Arc<Mutex<Counters>>,
    stop_tx: watch::Sender<bool>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Drop for RegistryClient {
    fn drop(&mut self) {
        // A client dropped without disconnect must not leak its listen
        // task.
        let _ = self.stop_tx.send(true);
    }
}

impl RegistryClient {
    /// Create a client over the given transport
    pub fn new(transport: Arc<dyn RegistryTransport>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            transport,
            services: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Mutex::new(Counters::default())),
            stop_tx,
            listen_task: Mutex::new(None),
        }
    }

    /// Spawn the listen loop; idempotent
    pub async fn connect(&self) {
        if *self.stop_tx.borrow() {
            debug!("registry client already disconnected; not reconnecting");
            return;
        }

        let mut task = lock(&self.listen_task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let transport = self.transport.clone();
        let services = self.services.clone();
        let subscribers = self.subscribers.clone();
        let counters = self.counters.clone();
        let stop_rx = self.stop_tx.subscribe();

        *task = Some(tokio::spawn(listen_loop(
            transport,
            services,
            subscribers,
            counters,
            stop_rx,
        )));
    }

    /// Register a descriptor with the remote registry
    pub async fn register(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<String, RegistryError> {
        self.transport.register(descriptor).await
    }

    /// Remove a registration; idempotent at the remote
    pub async fn deregister(&self, registry_id: &str) -> Result<(), RegistryError> {
        self.transport.deregister(registry_id).await
    }

    /// Deep copy of the mirrored descriptor, if present
    pub fn get(&self, fq_name: &str) -> Option<ServiceDescriptor> {
        lock(&self.services).get(fq_name).cloned()
    }

    /// PEM certificate bytes of a mirrored service
    pub fn certificate(&self, fq_name: &str) -> Result<Vec<u8>, RegistryError> {
        let services = lock(&self.services);
        let descriptor = services
            .get(fq_name)
            .ok_or_else(|| RegistryError::NotFound(fq_name.to_string()))?;
        descriptor
            .certificate()
            .map(|pem| pem.as_bytes().to_vec())
            .ok_or_else(|| {
                RegistryError::NotFound(format!("{} carries no certificate", fq_name))
            })
    }

    /// Address and certificate for one protocol endpoint of a mirrored
    /// service
    pub fn connection_info(
        &self,
        fq_name: &str,
        protocol: Protocol,
    ) -> Result<ConnectionInfo, RegistryError> {
        let services = lock(&self.services);
        let descriptor = services
            .get(fq_name)
            .ok_or_else(|| RegistryError::NotFound(fq_name.to_string()))?;
        let endpoint = descriptor.endpoint(protocol).ok_or_else(|| {
            RegistryError::NotFound(format!("{} has no {:?} endpoint", fq_name, protocol))
        })?;
        let certificate = descriptor
            .certificate()
            .map(|pem| pem.as_bytes().to_vec())
            .ok_or_else(|| {
                RegistryError::NotFound(format!("{} carries no certificate", fq_name))
            })?;
        Ok(ConnectionInfo {
            address: endpoint.address.clone(),
            certificate,
        })
    }

    /// Deep copies of every mirrored descriptor with the given kind
    pub fn list_of_kind(&self, kind: ServiceKind) -> Vec<ServiceDescriptor> {
        lock(&self.services)
            .values()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    /// Subscribe to mirror change events
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        lock(&self.subscribers).insert(id, callback);
        SubscriptionHandle(id)
    }

    /// Drop a subscription
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        lock(&self.subscribers).remove(&handle.0);
    }

    /// Counter snapshot
    pub fn stats(&self) -> RegistryStats {
        let counters = lock(&self.counters);
        RegistryStats {
            events_applied: counters.events_applied,
            reconnects: counters.reconnects,
            services: lock(&self.services).len(),
            subscribers: lock(&self.subscribers).len(),
        }
    }

    /// Signal the listen loop to stop and wait briefly for it; idempotent
    ///
    /// Cancellation is the stop flag: a recv already in flight is not
    /// interrupted promptly, so the loop may outlive this call by one
    /// wakeup.
    pub async fn disconnect(&self) {
        let _ = self.stop_tx.send(true);

        let task = lock(&self.listen_task).take();
        if let Some(task) = task {
            if tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .is_err()
            {
                debug!("registry listen loop still draining after disconnect");
            }
        }
    }
}

async fn listen_loop(
    transport: Arc<dyn RegistryTransport>,
    services: Arc<Mutex<HashMap<String, ServiceDescriptor>>>,
    subscribers: Arc<Mutex<HashMap<Uuid, EventCallback>>>,
    counters: Arc<Mutex<Counters>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut failures = 0u32;

    loop {
        if *stop_rx.borrow() {
            break;
        }

        match transport.listen().await {
            Ok(mut stream) => {
                info!("registry event stream established");
                failures = 0;

                loop {
                    tokio::select! {
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                return;
                            }
                        }
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                if apply_event(&services, &counters, &event) {
                                    fan_out(&subscribers, &event);
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "registry stream error");
                                break;
                            }
                            None => {
                                warn!("registry stream closed by remote");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "registry connection failed");
            }
        }

        if *stop_rx.borrow() {
            break;
        }
        lock(&counters).reconnects += 1;
        failures += 1;
        if failures > RAPID_RECONNECT_ATTEMPTS {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(RECONNECT_INTERVAL) => {}
            }
        }
    }

    debug!("registry listen loop stopped");
}

/// Apply one event to the mirror, in receive order; returns whether the
/// event was applied and should fan out
fn apply_event(
    services: &Mutex<HashMap<String, ServiceDescriptor>>,
    counters: &Mutex<Counters>,
    event: &RegistryEvent,
) -> bool {
    let key = event.fq_name.to_string();
    let mut map = lock(services);
    match event.kind {
        EventKind::Registered | EventKind::Updated => {
            if let Some(descriptor) = &event.descriptor {
                map.insert(key, descriptor.clone());
            } else {
                warn!(service = %event.fq_name, "event without descriptor ignored");
                return false;
            }
        }
        EventKind::DeRegistered => {
            map.remove(&key);
        }
    }
    drop(map);
    lock(counters).events_applied += 1;
    true
}

/// Invoke every subscriber outside the lock, preserving event order from
/// the listen task's perspective
fn fan_out(subscribers: &Mutex<HashMap<Uuid, EventCallback>>, event: &RegistryEvent) {
    let callbacks: Vec<EventCallback> = lock(subscribers).values().cloned().collect();
    for callback in callbacks {
        callback(event);
    }
}
