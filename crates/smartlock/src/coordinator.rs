//! Reference-counted ownership of the single shared provider session.
//!
//! All consumers share one lazily-established connection. `acquire()`
//! counts the caller before anything externally observable happens, so a
//! connection failure still leaves every waiter responsible for its own
//! `release()`. Exactly one connect attempt is outstanding at a time;
//! concurrent acquirers join its broadcast instead of connecting again.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::error::{Result, SmartLockError};
use crate::provider::{CredentialProvider, ProviderSession};

/// Per-waiter queue depth for connect-outcome broadcasts; each waiter
/// consumes exactly one message.
const CONNECT_WAITERS_CAPACITY: usize = 16;

type ConnectOutcome = std::result::Result<Session, SmartLockError>;

/// The single shared handle to the connected credential service.
#[derive(Clone)]
pub struct Session {
    id: u64,
    service: Arc<dyn ProviderSession>,
}

impl Session {
    pub fn new(id: u64, service: Arc<dyn ProviderSession>) -> Self {
        Self { id, service }
    }

    /// Generation id; a fresh connect after teardown yields a new one.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn service(&self) -> &Arc<dyn ProviderSession> {
        &self.service
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

enum ConnectionState {
    Disconnected,
    Connecting {
        outcome_tx: broadcast::Sender<ConnectOutcome>,
    },
    Connected(Session),
    Failed(SmartLockError),
}

struct CoordinatorState {
    state: ConnectionState,
    ref_count: usize,
}

/// Owns the shared connection: refcounted acquire/release, deduplicated
/// connect-in-progress, multicast of the connected session or its
/// terminal error to every waiter.
pub struct SessionCoordinator {
    provider: Arc<dyn CredentialProvider>,
    inner: Mutex<CoordinatorState>,
    next_session_id: AtomicU64,
}

impl SessionCoordinator {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            inner: Mutex::new(CoordinatorState {
                state: ConnectionState::Disconnected,
                ref_count: 0,
            }),
            next_session_id: AtomicU64::new(0),
        }
    }

    /// Registers the caller as a consumer and resolves with the shared
    /// session once connected.
    ///
    /// The consumer count is incremented before the connect side effect is
    /// triggered, and it is incremented on the error paths too: the caller
    /// owes a `release()` whatever the outcome. A coordinator in the
    /// failed window resolves immediately with the cached error; no
    /// automatic retry happens until the window closes.
    pub async fn acquire(self: &Arc<Self>) -> Result<Session> {
        let mut outcome_rx = {
            let mut inner = self.inner.lock().await;
            inner.ref_count += 1;
            match &inner.state {
                ConnectionState::Connected(session) => {
                    debug!(
                        target = "smartlock.session",
                        session_id = session.id,
                        ref_count = inner.ref_count,
                        "joined connected session"
                    );
                    return Ok(session.clone());
                }
                ConnectionState::Failed(err) => {
                    debug!(
                        target = "smartlock.session",
                        ref_count = inner.ref_count,
                        "acquire during failed window; returning cached error"
                    );
                    return Err(err.clone());
                }
                ConnectionState::Connecting { outcome_tx } => outcome_tx.subscribe(),
                ConnectionState::Disconnected => {
                    let (outcome_tx, outcome_rx) =
                        broadcast::channel(CONNECT_WAITERS_CAPACITY);
                    inner.state = ConnectionState::Connecting { outcome_tx };
                    self.spawn_connect();
                    outcome_rx
                }
            }
        };

        match outcome_rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(SmartLockError::Connection(
                "connection attempt ended without an outcome".to_string(),
            )),
        }
    }

    /// Drops one consumer. The last release tears the session down:
    /// disconnect side effect, state reset to `Disconnected`, cached
    /// handle (or cached error) dropped. Calling this more times than
    /// `acquire()` is a programming error and is rejected.
    pub async fn release(&self) -> Result<()> {
        let session_to_close = {
            let mut inner = self.inner.lock().await;
            if inner.ref_count == 0 {
                warn!(
                    target = "smartlock.session",
                    "release() without matching acquire()"
                );
                return Err(SmartLockError::ReleaseUnderflow);
            }
            inner.ref_count -= 1;
            if inner.ref_count > 0 {
                None
            } else {
                match std::mem::replace(&mut inner.state, ConnectionState::Disconnected) {
                    ConnectionState::Connected(session) => Some(session),
                    ConnectionState::Connecting { outcome_tx } => {
                        // A connect is still in flight; leave it running and
                        // let on_connected observe the zero count.
                        inner.state = ConnectionState::Connecting { outcome_tx };
                        None
                    }
                    // Failed or Disconnected: the failed window closes here.
                    _ => None,
                }
            }
        };

        if let Some(session) = session_to_close {
            info!(
                target = "smartlock.session",
                session_id = session.id,
                "last consumer released; disconnecting"
            );
            session.service.disconnect().await;
        }
        Ok(())
    }

    /// Completes the in-flight connect: `Connecting -> Connected`, one
    /// multicast delivery to every current waiter. If every consumer
    /// already released, the fresh session is torn down instead of cached.
    pub async fn on_connected(&self, session: Session) {
        let orphaned = {
            let mut inner = self.inner.lock().await;
            let ConnectionState::Connecting { outcome_tx } = &inner.state else {
                warn!(
                    target = "smartlock.session",
                    session_id = session.id,
                    "connect completed outside a connect attempt; discarding"
                );
                return;
            };
            let waiters = outcome_tx.send(Ok(session.clone())).unwrap_or(0);
            if inner.ref_count == 0 {
                inner.state = ConnectionState::Disconnected;
                true
            } else {
                info!(
                    target = "smartlock.session",
                    session_id = session.id,
                    waiters,
                    "credential service connected"
                );
                inner.state = ConnectionState::Connected(session.clone());
                false
            }
        };

        if orphaned {
            debug!(
                target = "smartlock.session",
                session_id = session.id,
                "all consumers released during connect; tearing down"
            );
            session.service.disconnect().await;
        }
    }

    /// Fails the in-flight connect: `Connecting -> Failed`, the same error
    /// multicast to every current waiter. The consumer count is untouched;
    /// each waiter still owes a `release()`, and the cached error is
    /// served to acquirers until the count drains to zero.
    pub async fn on_connection_error(&self, err: SmartLockError) {
        let mut inner = self.inner.lock().await;
        let ConnectionState::Connecting { outcome_tx } = &inner.state else {
            warn!(
                target = "smartlock.session",
                error = %err,
                "connect failure outside a connect attempt; discarding"
            );
            return;
        };
        let waiters = outcome_tx.send(Err(err.clone())).unwrap_or(0);
        warn!(
            target = "smartlock.session",
            error = %err,
            waiters,
            "credential service connection failed"
        );
        inner.state = if inner.ref_count == 0 {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Failed(err)
        };
    }

    /// Current consumer count.
    pub async fn ref_count(&self) -> usize {
        self.inner.lock().await.ref_count
    }

    /// True when no session is cached and no connect is in flight.
    pub async fn is_disconnected(&self) -> bool {
        matches!(
            self.inner.lock().await.state,
            ConnectionState::Disconnected
        )
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.inner.lock().await.state, ConnectionState::Connected(_))
    }

    fn spawn_connect(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            debug!(
                target = "smartlock.session",
                "opening connection to credential service"
            );
            match coordinator.provider.connect().await {
                Ok(service) => {
                    let id = coordinator.next_session_id.fetch_add(1, Ordering::SeqCst);
                    coordinator.on_connected(Session::new(id, service)).await;
                }
                Err(err) => {
                    let err = match err {
                        SmartLockError::Connection(_) => err,
                        other => SmartLockError::Connection(other.to_string()),
                    };
                    coordinator.on_connection_error(err).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeProviderBuilder;

    #[tokio::test]
    async fn concurrent_acquires_share_one_connect() {
        let (provider, controller) = FakeProviderBuilder::new().manual_connect().build();
        let coordinator = Arc::new(SessionCoordinator::new(provider));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move { coordinator.acquire().await }));
        }

        while controller.pending_connects() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(controller.connect_attempts(), 1);
        assert_eq!(coordinator.ref_count().await, 4);

        controller.complete_connect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id());
        }
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(controller.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn failed_window_serves_cached_error_without_reconnecting() {
        let (provider, controller) = FakeProviderBuilder::new().manual_connect().build();
        let coordinator = Arc::new(SessionCoordinator::new(provider));

        let first = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.acquire().await }
        });
        while controller.pending_connects() == 0 {
            tokio::task::yield_now().await;
        }
        controller.fail_connect("no eligible accounts");

        let first_err = first.await.unwrap().unwrap_err();
        assert_eq!(
            first_err,
            SmartLockError::Connection("no eligible accounts".to_string())
        );

        // The first waiter has not released yet, so a late acquirer gets
        // the identical cached error and no new connect is attempted.
        let second_err = coordinator.acquire().await.unwrap_err();
        assert_eq!(second_err, first_err);
        assert_eq!(controller.connect_attempts(), 1);

        coordinator.release().await.unwrap();
        coordinator.release().await.unwrap();
        assert_eq!(coordinator.ref_count().await, 0);
        assert!(coordinator.is_disconnected().await);

        // The window is closed; a fresh acquire starts a new generation.
        let third = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.acquire().await }
        });
        while controller.pending_connects() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(controller.connect_attempts(), 2);
        controller.complete_connect();
        third.await.unwrap().unwrap();
        coordinator.release().await.unwrap();
    }

    #[tokio::test]
    async fn release_beyond_acquire_is_rejected() {
        let (provider, _controller) = FakeProviderBuilder::new().build();
        let coordinator = Arc::new(SessionCoordinator::new(provider));

        assert_eq!(
            coordinator.release().await.unwrap_err(),
            SmartLockError::ReleaseUnderflow
        );

        coordinator.acquire().await.unwrap();
        coordinator.release().await.unwrap();
        assert_eq!(
            coordinator.release().await.unwrap_err(),
            SmartLockError::ReleaseUnderflow
        );
        assert_eq!(coordinator.ref_count().await, 0);
    }

    #[tokio::test]
    async fn last_release_disconnects_exactly_once() {
        let (provider, controller) = FakeProviderBuilder::new().build();
        let coordinator = Arc::new(SessionCoordinator::new(provider));

        coordinator.acquire().await.unwrap();
        coordinator.acquire().await.unwrap();
        assert!(coordinator.is_connected().await);

        coordinator.release().await.unwrap();
        assert_eq!(controller.disconnects(), 0);

        coordinator.release().await.unwrap();
        assert_eq!(controller.disconnects(), 1);
        assert!(coordinator.is_disconnected().await);
    }

    #[tokio::test]
    async fn connect_completing_after_all_released_tears_down() {
        let (provider, controller) = FakeProviderBuilder::new().manual_connect().build();
        let coordinator = Arc::new(SessionCoordinator::new(provider));

        let waiter = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.acquire().await }
        });
        while controller.pending_connects() == 0 {
            tokio::task::yield_now().await;
        }

        // The waiter abandons interest but still releases, as required.
        waiter.abort();
        let _ = waiter.await;
        coordinator.release().await.unwrap();
        assert_eq!(coordinator.ref_count().await, 0);

        controller.complete_connect();
        while controller.disconnects() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(coordinator.is_disconnected().await);
    }

    #[tokio::test]
    async fn new_generation_after_teardown_gets_new_session_id() {
        let (provider, _controller) = FakeProviderBuilder::new().build();
        let coordinator = Arc::new(SessionCoordinator::new(provider));

        let first = coordinator.acquire().await.unwrap();
        coordinator.release().await.unwrap();
        let second = coordinator.acquire().await.unwrap();
        coordinator.release().await.unwrap();

        assert_ne!(first.id(), second.id());
    }
}
