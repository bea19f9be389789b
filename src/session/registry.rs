//! Session Registry - owns every live SSH session, keyed by session key
//!
//! # Locking
//! - The key→slot map sits behind one `parking_lot::RwLock`. It is only held
//!   for map lookups/inserts/removals, never across an `.await`.
//! - Each slot owns an async mutex around its `Session`. Holding that mutex is
//!   what a [`SessionLease`] is, so at most one invocation uses a session at a
//!   time and waiters are served in FIFO order (tokio's mutex is fair).
//!
//! # Invariants
//! - R1: At most one slot per key is present in the map.
//! - R2: A slot removed from the map is marked `retired` first; a waiter that
//!   wakes up on a retired slot goes back to the map for a fresh one.
//! - R3: A session holds at most one transport. Replacing or breaking it
//!   always takes the old one out before closing it.
//! - R4: A failed acquire leaves no slot and no remembered credentials behind.
//! - R5: A lease dropped without `release()` (cancelled or timed-out
//!   invocation) invalidates its session.
//! - R6: A slot that replaces a removed one does not hand out its first lease
//!   before the removed slot's lease has been dropped, so one key never runs
//!   two invocations or holds two live transports at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::state::{SessionState, SessionStateMachine, StateTransitionError};
use super::types::{Credentials, SessionKey};
use crate::transport::{ConnectionError, Connector, TransportHandle};

/// Upper bound for a graceful disconnect
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `close`/`close_all` wait for a running invocation to finish
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Snapshot of one registry session, safe to hand to a front-end
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub state: SessionState,
    /// user@host[:port] of the connected endpoint
    pub target: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    /// Completed invocations on the current transport
    pub invocations: u64,
    /// An invocation currently holds the session
    pub busy: bool,
    pub last_error: Option<String>,
}

impl SessionInfo {
    fn new(key: SessionKey) -> Self {
        Self {
            key,
            state: SessionState::Unconnected,
            target: None,
            connected_at: None,
            last_activity: None,
            invocations: 0,
            busy: false,
            last_error: None,
        }
    }
}

/// Mutable session state, guarded by the slot's async mutex
struct Session {
    machine: SessionStateMachine,
    transport: Option<Arc<dyn TransportHandle>>,
}

impl Session {
    fn new() -> Self {
        Self {
            machine: SessionStateMachine::new(),
            transport: None,
        }
    }
}

struct SessionSlot {
    key: SessionKey,
    retired: AtomicBool,
    session: Arc<Mutex<Session>>,
    /// Second handle on the session's transport, reachable while a lease
    /// holds the session lock
    live: parking_lot::Mutex<Option<Arc<dyn TransportHandle>>>,
    /// Session of the slot this one replaced, while it may still be leased
    predecessor: parking_lot::Mutex<Option<Weak<Mutex<Session>>>>,
    info: parking_lot::Mutex<SessionInfo>,
}

impl SessionSlot {
    fn new(key: SessionKey) -> Self {
        Self {
            info: parking_lot::Mutex::new(SessionInfo::new(key.clone())),
            key,
            retired: AtomicBool::new(false),
            session: Arc::new(Mutex::new(Session::new())),
            live: parking_lot::Mutex::new(None),
            predecessor: parking_lot::Mutex::new(None),
        }
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn forget_live(&self) {
        self.live.lock().take();
    }

    /// Wait until the slot this one replaced is no longer leased
    async fn wait_for_predecessor(&self) {
        let predecessor = self.predecessor.lock().clone();
        let Some(session) = predecessor.and_then(|weak| weak.upgrade()) else {
            return;
        };
        debug!(
            "[registry] Session {} waiting for the previous session to finish",
            self.key
        );
        drop(session.lock().await);
        self.predecessor.lock().take();
    }

    fn record(&self, update: impl FnOnce(&mut SessionInfo)) {
        update(&mut self.info.lock());
    }
}

/// What a removed slot leaves behind for its replacement
struct Drained {
    session: Weak<Mutex<Session>>,
    last_error: Option<String>,
}

impl Drained {
    fn from_slot(slot: &SessionSlot) -> Self {
        Self {
            session: Arc::downgrade(&slot.session),
            last_error: slot.info.lock().last_error.clone(),
        }
    }
}

struct RegistryInner {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    sessions: RwLock<HashMap<SessionKey, Arc<SessionSlot>>>,
    /// Removed slots, handed to the next slot for the same key
    draining: parking_lot::Mutex<HashMap<SessionKey, Drained>>,
    /// Credentials of sessions that connected at least once, kept across
    /// invalidation so a broken session can reconnect transparently
    credentials: RwLock<HashMap<SessionKey, Arc<Credentials>>>,
}

/// Registry of live sessions: creation, reuse and teardown.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                connect_timeout,
                sessions: RwLock::new(HashMap::new()),
                draining: parking_lot::Mutex::new(HashMap::new()),
                credentials: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Get exclusive use of the Ready session for `key`, connecting one if
    /// it is absent, broken, or its transport died since the last use.
    ///
    /// `credentials` are used only when a connection has to be made; when
    /// omitted, the credentials of the last successful connect for this key
    /// are reused. Connection failures are returned as-is, never retried.
    pub async fn acquire(
        &self,
        key: &SessionKey,
        credentials: Option<&Credentials>,
    ) -> Result<SessionLease, ConnectionError> {
        loop {
            let slot = self.slot_for(key);
            let guard = slot.session.clone().lock_owned().await;
            slot.wait_for_predecessor().await;
            if slot.is_retired() {
                debug!("[registry] Session {} retired while waiting, retrying", key);
                continue;
            }

            let mut lease = SessionLease::new(self.clone(), slot, guard);

            if lease.guard.machine.is_ready() {
                if lease.transport_alive() {
                    debug!("[registry] Reusing session {}", key);
                    return Ok(lease);
                }
                info!(
                    "[registry] Session {} transport closed since last use, reconnecting",
                    key
                );
                lease.discard("transport closed since last use");
                continue;
            }

            let credentials = match self.credentials_for(key, credentials) {
                Ok(credentials) => credentials,
                Err(e) => {
                    lease.discard(&e.to_string());
                    return Err(e);
                }
            };

            return match lease.connect(&credentials).await {
                Ok(()) => {
                    self.inner
                        .credentials
                        .write()
                        .insert(key.clone(), credentials);
                    Ok(lease)
                }
                Err(e) => {
                    lease.discard(&e.to_string());
                    Err(e)
                }
            };
        }
    }

    /// Mark the session for `key` broken and release its transport.
    ///
    /// Idempotent: an absent key is a no-op. If an invocation currently holds
    /// the session, its transport is closed as soon as that invocation ends.
    /// Remembered credentials are kept, so the next acquire reconnects.
    pub async fn invalidate(&self, key: &SessionKey) {
        let Some(slot) = self.unregister(key, Some("invalidated")) else {
            debug!("[registry] invalidate: no session for {}", key);
            return;
        };

        let transport = match slot.session.try_lock() {
            Ok(mut session) => {
                session.machine.mark_broken("invalidated".to_string());
                slot.forget_live();
                session.transport.take()
            }
            Err(_) => {
                debug!(
                    "[registry] Session {} in use, transport released when the invocation ends",
                    key
                );
                None
            }
        };
        slot.record(|info| info.state = SessionState::Broken);

        if let Some(transport) = transport {
            close_transport(key, transport).await;
        }
        info!("[registry] Session invalidated: {}", key);
    }

    /// Gracefully close the session for `key` and forget its credentials
    pub async fn close(&self, key: &SessionKey) {
        self.forget_credentials(key);
        if let Some(slot) = self.unregister(key, None) {
            shutdown_slot(slot).await;
        }
    }

    /// Close every session (for cleanup on process exit)
    pub async fn close_all(&self) {
        let slots: Vec<_> = {
            let mut sessions = self.inner.sessions.write();
            sessions.drain().map(|(_, slot)| slot).collect()
        };
        {
            let mut draining = self.inner.draining.lock();
            for slot in &slots {
                draining.insert(slot.key.clone(), Drained::from_slot(slot));
            }
        }
        self.inner.credentials.write().clear();

        info!("[registry] Closing {} session(s)", slots.len());
        futures_util::future::join_all(slots.into_iter().map(shutdown_slot)).await;
    }

    /// Whether a session (in any state) exists for `key`
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.inner.sessions.read().contains_key(key)
    }

    /// Current state of the session for `key`
    pub fn state(&self, key: &SessionKey) -> Option<SessionState> {
        self.inner
            .sessions
            .read()
            .get(key)
            .map(|slot| slot.info.lock().state)
    }

    /// Snapshot of every session, sorted by key
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self
            .inner
            .sessions
            .read()
            .values()
            .map(|slot| slot.info.lock().clone())
            .collect();
        sessions.sort_by(|a, b| a.key.cmp(&b.key));
        sessions
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.read().is_empty()
    }

    /// Whether credentials from an earlier successful connect are remembered
    pub fn has_credentials(&self, key: &SessionKey) -> bool {
        self.inner.credentials.read().contains_key(key)
    }

    pub fn forget_credentials(&self, key: &SessionKey) {
        self.inner.credentials.write().remove(key);
    }

    fn credentials_for(
        &self,
        key: &SessionKey,
        supplied: Option<&Credentials>,
    ) -> Result<Arc<Credentials>, ConnectionError> {
        if let Some(credentials) = supplied {
            return Ok(Arc::new(credentials.clone()));
        }
        self.inner
            .credentials
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ConnectionError::MissingCredentials(key.to_string()))
    }

    /// Get the slot for `key`, inserting an Unconnected one if absent
    fn slot_for(&self, key: &SessionKey) -> Arc<SessionSlot> {
        if let Some(slot) = self.inner.sessions.read().get(key) {
            return slot.clone();
        }
        self.inner
            .sessions
            .write()
            .entry(key.clone())
            .or_insert_with(|| {
                debug!("[registry] New session slot: {}", key);
                let slot = SessionSlot::new(key.clone());
                if let Some(drained) = self.inner.draining.lock().remove(key) {
                    *slot.predecessor.lock() = Some(drained.session);
                    slot.record(|info| info.last_error = drained.last_error);
                }
                Arc::new(slot)
            })
            .clone()
    }

    /// Remove and retire the slot for `key`, leaving it as the barrier for the next slot
    fn unregister(&self, key: &SessionKey, reason: Option<&str>) -> Option<Arc<SessionSlot>> {
        let slot = self.inner.sessions.write().remove(key)?;
        slot.retired.store(true, Ordering::Release);
        if let Some(reason) = reason {
            slot.record(|info| info.last_error = Some(reason.to_string()));
        }
        self.inner
            .draining
            .lock()
            .insert(key.clone(), Drained::from_slot(&slot));
        Some(slot)
    }

    /// Retire `slot` and remove it from the map if it is still the current one
    fn retire(&self, slot: &Arc<SessionSlot>) {
        slot.retired.store(true, Ordering::Release);
        let mut sessions = self.inner.sessions.write();
        if sessions
            .get(&slot.key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(&slot.key);
            self.inner
                .draining
                .lock()
                .insert(slot.key.clone(), Drained::from_slot(slot));
        }
    }
}

/// Exclusive, scoped use of one Ready session.
///
/// Obtained from [`SessionRegistry::acquire`]. Finish it with
/// [`release`](Self::release) after a completed invocation or
/// [`invalidate`](Self::invalidate) after a transport failure. Dropping it
/// without either counts as an abandoned invocation and breaks the session.
pub struct SessionLease {
    registry: SessionRegistry,
    slot: Arc<SessionSlot>,
    guard: OwnedMutexGuard<Session>,
    armed: bool,
}

impl SessionLease {
    fn new(registry: SessionRegistry, slot: Arc<SessionSlot>, guard: OwnedMutexGuard<Session>) -> Self {
        slot.record(|info| info.busy = true);
        Self {
            registry,
            slot,
            guard,
            armed: true,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.slot.key
    }

    pub fn state(&self) -> SessionState {
        self.guard.machine.state()
    }

    /// The borrowed transport; valid for the lifetime of the lease only
    pub fn transport(&self) -> Option<&dyn TransportHandle> {
        self.guard.transport.as_deref()
    }

    /// Return the session to the registry after a completed invocation
    pub fn release(mut self) {
        self.armed = false;
        let now = Utc::now();
        self.slot.record(|info| {
            info.last_activity = Some(now);
            info.invocations += 1;
        });
        debug!("[registry] Session released: {}", self.slot.key);
    }

    /// Break the session after a transport failure and close its transport.
    ///
    /// The next acquire for this key builds a fresh session.
    pub async fn invalidate(mut self, reason: &str) {
        info!("[registry] Invalidating session {}: {}", self.slot.key, reason);
        if let Some(transport) = self.break_session(reason) {
            close_transport(&self.slot.key, transport).await;
        }
    }

    fn transport_alive(&self) -> bool {
        self.guard
            .transport
            .as_ref()
            .is_some_and(|transport| transport.is_alive())
    }

    async fn connect(&mut self, credentials: &Credentials) -> Result<(), ConnectionError> {
        let key = self.slot.key.clone();
        let target = credentials.display_string();

        self.slot.forget_live();
        if let Some(stale) = self.guard.transport.take() {
            warn!("[registry] Session {} still held a transport, closing it", key);
            spawn_close(&key, stale);
        }
        log_transition(&key, self.guard.machine.start_connecting());
        self.slot.record(|info| {
            info.state = SessionState::Connecting;
            info.target = Some(target.clone());
        });

        info!(
            "[registry] Connecting session {} to {} (auth: {})",
            key,
            target,
            credentials.auth.name()
        );

        let connector = self.registry.inner.connector.clone();
        let connect_timeout = self.registry.inner.connect_timeout;
        let outcome = match tokio::time::timeout(connect_timeout, connector.connect(credentials)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ConnectionError::Timeout(connect_timeout.as_secs())),
        };

        match outcome {
            Ok(transport) => {
                *self.slot.live.lock() = Some(transport.clone());
                self.guard.transport = Some(transport);
                log_transition(&key, self.guard.machine.connect_success());
                let now = Utc::now();
                self.slot.record(|info| {
                    info.state = SessionState::Ready;
                    info.connected_at = Some(now);
                    info.last_activity = Some(now);
                    info.invocations = 0;
                    info.last_error = None;
                });
                info!("[registry] Session {} ready ({})", key, target);
                Ok(())
            }
            Err(e) => {
                log_transition(&key, self.guard.machine.connect_failed(e.to_string()));
                let last_error = self.guard.machine.error().map(str::to_string);
                self.slot.record(|info| info.last_error = last_error);
                warn!("[registry] Session {} failed to connect: {}", key, e);
                Err(e)
            }
        }
    }

    /// Mark broken, retire the slot, and hand back the transport for closing
    fn break_session(&mut self, reason: &str) -> Option<Arc<dyn TransportHandle>> {
        self.armed = false;
        self.guard.machine.mark_broken(reason.to_string());
        self.slot.forget_live();
        let transport = self.guard.transport.take();
        let last_error = self.guard.machine.error().map(str::to_string);
        self.slot.record(|info| {
            info.state = SessionState::Broken;
            info.last_error = last_error;
        });
        self.registry.retire(&self.slot);
        transport
    }

    /// Synchronous variant of `invalidate` used inside `acquire`
    fn discard(&mut self, reason: &str) {
        if let Some(transport) = self.break_session(reason) {
            spawn_close(&self.slot.key, transport);
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "[registry] Invocation on {} abandoned before completion, invalidating session",
                self.slot.key
            );
            self.discard("invocation abandoned before completion");
        } else if self.slot.is_retired() {
            // Invalidated by someone else while this lease was held
            self.slot.forget_live();
            if let Some(transport) = self.guard.transport.take() {
                self.guard
                    .machine
                    .mark_broken("invalidated while in use".to_string());
                spawn_close(&self.slot.key, transport);
            }
        }
        self.slot.record(|info| info.busy = false);
    }
}

fn log_transition(key: &SessionKey, result: Result<(), StateTransitionError>) {
    if let Err(e) = result {
        warn!("[registry] Session {}: {}", key, e);
    }
}

async fn close_transport(key: &SessionKey, transport: Arc<dyn TransportHandle>) {
    if tokio::time::timeout(CLOSE_TIMEOUT, transport.close())
        .await
        .is_err()
    {
        warn!(
            "[registry] Disconnect of {} did not finish within {:?}",
            key, CLOSE_TIMEOUT
        );
    }
}

/// Close a transport without awaiting (usable from `Drop`)
fn spawn_close(key: &SessionKey, transport: Arc<dyn TransportHandle>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let key = key.clone();
            handle.spawn(async move {
                close_transport(&key, transport).await;
            });
        }
        Err(_) => {
            debug!("[registry] No runtime, dropping transport of {}", key);
        }
    }
}

/// Close a slot that has already been removed from the map.
///
/// A running invocation gets `SHUTDOWN_WAIT` to finish; after that its
/// transport is closed underneath it and the invocation fails.
async fn shutdown_slot(slot: Arc<SessionSlot>) {
    slot.retired.store(true, Ordering::Release);
    match tokio::time::timeout(SHUTDOWN_WAIT, slot.session.lock()).await {
        Ok(mut session) => {
            slot.forget_live();
            let transport = session.transport.take();
            session.machine.reset();
            drop(session);
            slot.record(|info| info.state = SessionState::Unconnected);
            if let Some(transport) = transport {
                close_transport(&slot.key, transport).await;
            }
            info!("[registry] Session closed: {}", slot.key);
        }
        Err(_) => {
            warn!(
                "[registry] Session {} still busy after {:?}, closing its transport",
                slot.key, SHUTDOWN_WAIT
            );
            let transport = slot.live.lock().take();
            slot.record(|info| {
                info.state = SessionState::Broken;
                info.last_error = Some("closed during shutdown".to_string());
            });
            if let Some(transport) = transport {
                close_transport(&slot.key, transport).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bad_creds, creds, MockConnector};

    fn registry(connector: &MockConnector) -> SessionRegistry {
        SessionRegistry::new(Arc::new(connector.clone()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_acquire_reuses_ready_session() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let key = SessionKey::from("host1");

        let lease = registry.acquire(&key, Some(&creds())).await.unwrap();
        assert_eq!(lease.state(), SessionState::Ready);
        lease.release();

        let lease = registry.acquire(&key, None).await.unwrap();
        lease.release();

        assert_eq!(connector.connects(), 1);
        assert_eq!(registry.len(), 1);
        let info = &registry.list()[0];
        assert_eq!(info.invocations, 2);
        assert_eq!(info.target.as_deref(), Some("user@host1"));
        assert!(!info.busy);
    }

    #[tokio::test]
    async fn test_failed_auth_leaves_no_session() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let key = SessionKey::from("host1");

        let err = registry.acquire(&key, Some(&bad_creds())).await.err().unwrap();
        assert!(matches!(err, ConnectionError::AuthRejected(_)));
        assert!(!registry.contains(&key));
        assert!(!registry.has_credentials(&key));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let key = SessionKey::from("nowhere");

        let err = registry.acquire(&key, None).await.err().unwrap();
        assert!(matches!(err, ConnectionError::MissingCredentials(ref k) if k == "nowhere"));
        assert!(registry.is_empty());
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let key = SessionKey::from("host1");

        registry.acquire(&key, Some(&creds())).await.unwrap().release();
        registry.invalidate(&key).await;
        registry.invalidate(&key).await;
        registry.invalidate(&SessionKey::from("absent")).await;

        assert!(!registry.contains(&key));
        assert_eq!(connector.closes(), 1);
        assert!(registry.has_credentials(&key));

        // Next acquire reconnects with the remembered credentials
        registry.acquire(&key, None).await.unwrap().release();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_dead_transport_reconnects() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let key = SessionKey::from("host1");

        registry.acquire(&key, Some(&creds())).await.unwrap().release();
        connector.sever_all();

        let lease = registry.acquire(&key, None).await.unwrap();
        assert!(lease.transport().is_some_and(|t| t.is_alive()));
        lease.release();
        assert_eq!(connector.connects(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_lease_invalidates() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let key = SessionKey::from("host1");

        let lease = registry.acquire(&key, Some(&creds())).await.unwrap();
        drop(lease);

        assert!(!registry.contains(&key));
        registry.acquire(&key, None).await.unwrap().release();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_while_in_use() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let key = SessionKey::from("host1");

        let lease = registry.acquire(&key, Some(&creds())).await.unwrap();
        registry.invalidate(&key).await;
        assert!(!registry.contains(&key));
        // Still usable by the current holder
        assert!(lease.transport().is_some());
        lease.release();

        let lease = registry.acquire(&key, None).await.unwrap();
        lease.release();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_close_all_forgets_everything() {
        let connector = MockConnector::new();
        let registry = registry(&connector);

        for host in ["a", "b", "c"] {
            let key = SessionKey::from(host);
            registry.acquire(&key, Some(&creds())).await.unwrap().release();
        }
        assert_eq!(registry.len(), 3);

        registry.close_all().await;
        assert!(registry.is_empty());
        assert_eq!(connector.closes(), 3);
        assert!(!registry.has_credentials(&SessionKey::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_reports_why_previous_session_broke() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let key = SessionKey::from("host1");

        let lease = registry.acquire(&key, Some(&creds())).await.unwrap();
        lease.invalidate("connection reset by peer").await;

        connector.set_connect_delay(Duration::from_secs(2));
        let reconnect = tokio::spawn({
            let registry = registry.clone();
            let key = key.clone();
            async move { registry.acquire(&key, None).await.map(SessionLease::release) }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let info = &registry.list()[0];
        assert_eq!(info.state, SessionState::Connecting);
        assert_eq!(info.last_error.as_deref(), Some("connection reset by peer"));

        reconnect.await.unwrap().unwrap();
        let info = &registry.list()[0];
        assert_eq!(info.state, SessionState::Ready);
        assert_eq!(info.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_reason_carries_over() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let key = SessionKey::from("host1");

        registry.acquire(&key, Some(&bad_creds())).await.err().unwrap();
        connector.set_connect_delay(Duration::from_millis(50));
        let pending = tokio::spawn({
            let registry = registry.clone();
            let key = key.clone();
            async move { registry.acquire(&key, Some(&creds())).await.map(SessionLease::release) }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            registry.list()[0].last_error.as_deref(),
            Some("Authentication rejected: Permission denied (password)")
        );
        pending.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let connector = MockConnector::new();
        connector.set_connect_delay(Duration::from_secs(60));
        let registry = registry(&connector);
        let key = SessionKey::from("host1");

        let err = registry.acquire(&key, Some(&creds())).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Timeout(5)));
        assert!(!registry.contains(&key));
    }
}
