//! Public facade: the five credential operations over one shared session.
//!
//! Every operation follows acquire -> execute -> release, releasing
//! exactly once regardless of outcome. Under N concurrent calls exactly
//! one connection attempt occurs and is shared by all N; the session
//! tears down once the last caller releases.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::bus::{ResultBus, ResultPublisher};
use crate::coordinator::{Session, SessionCoordinator};
use crate::credential::{Credential, Hint, HintRequest, RetrieveRequest};
use crate::error::Result;
use crate::executor::{OperationExecutor, OperationKind};
use crate::gate::ResolutionGate;
use crate::provider::{CredentialProvider, ResolutionHost};

/// The five credential operations, as a seam for swapping implementations.
#[async_trait]
pub trait SmartLock: Send + Sync {
    /// Retrieves stored credentials, resolving a picker flow if the
    /// provider requires one.
    async fn retrieve_credentials(&self) -> Result<Credential>;

    /// Retrieves sign-in hint data via the hint picker.
    async fn retrieve_sign_in_hints(&self) -> Result<Hint>;

    /// Stores a credential, confirming with the user when asked to.
    async fn store_credentials(&self, credential: Credential) -> Result<()>;

    /// Deletes a stored credential.
    async fn delete_stored_credentials(&self, credential: Credential) -> Result<()>;

    /// Disables automatic sign-in.
    async fn disable_auto_sign_in(&self) -> Result<()>;
}

/// Coordinates the five operations over one refcounted provider session.
pub struct SmartLockBroker {
    coordinator: Arc<SessionCoordinator>,
    executor: OperationExecutor,
    bus: ResultBus,
    retrieve_request: RetrieveRequest,
    hint_request: HintRequest,
}

impl SmartLockBroker {
    /// Broker with default options; see [`SmartLockBrokerBuilder`] for the
    /// knobs.
    pub fn new(provider: Arc<dyn CredentialProvider>, host: Arc<dyn ResolutionHost>) -> Self {
        Self::builder(provider, host).build()
    }

    pub fn builder(
        provider: Arc<dyn CredentialProvider>,
        host: Arc<dyn ResolutionHost>,
    ) -> SmartLockBrokerBuilder {
        SmartLockBrokerBuilder {
            provider,
            host,
            result_bus: None,
            retrieve_request: RetrieveRequest::default(),
            hint_request: HintRequest::default(),
        }
    }

    /// Publisher the resolution host's completion hook reports through.
    pub fn result_publisher(&self) -> ResultPublisher {
        self.bus.publisher()
    }

    /// The shared-session coordinator, exposed for lifecycle inspection.
    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    pub async fn retrieve_credentials(&self) -> Result<Credential> {
        self.with_session(OperationKind::Retrieve, |session| async move {
            self.executor
                .retrieve(&session, &self.retrieve_request)
                .await
        })
        .await
    }

    pub async fn retrieve_sign_in_hints(&self) -> Result<Hint> {
        self.with_session(OperationKind::Hint, |session| async move {
            self.executor.hint(&session, &self.hint_request).await
        })
        .await
    }

    pub async fn store_credentials(&self, credential: Credential) -> Result<()> {
        self.with_session(OperationKind::Store, |session| async move {
            self.executor.store(&session, &credential).await
        })
        .await
    }

    pub async fn delete_stored_credentials(&self, credential: Credential) -> Result<()> {
        self.with_session(OperationKind::Delete, |session| async move {
            self.executor.delete(&session, &credential).await
        })
        .await
    }

    pub async fn disable_auto_sign_in(&self) -> Result<()> {
        self.with_session(OperationKind::DisableAutoSignIn, |session| async move {
            self.executor.disable_auto_sign_in(&session).await
        })
        .await
    }

    /// Runs one operation inside an acquire/release pair. A failed acquire
    /// still counted us as a consumer, so it is released too.
    async fn with_session<T, F, Fut>(&self, operation: OperationKind, run: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        debug!(target = "smartlock.broker", %operation, "operation started");
        let session = match self.coordinator.acquire().await {
            Ok(session) => session,
            Err(err) => {
                self.release_after(operation).await;
                debug!(
                    target = "smartlock.broker",
                    %operation,
                    error = %err,
                    "operation failed before a session was available"
                );
                return Err(err);
            }
        };

        let outcome = run(session).await;
        self.release_after(operation).await;

        match &outcome {
            Ok(_) => debug!(target = "smartlock.broker", %operation, "operation completed"),
            Err(err) => debug!(
                target = "smartlock.broker",
                %operation,
                error = %err,
                "operation failed"
            ),
        }
        outcome
    }

    async fn release_after(&self, operation: OperationKind) {
        if let Err(err) = self.coordinator.release().await {
            warn!(
                target = "smartlock.broker",
                %operation,
                error = %err,
                "release after operation failed"
            );
        }
    }
}

#[async_trait]
impl SmartLock for SmartLockBroker {
    async fn retrieve_credentials(&self) -> Result<Credential> {
        SmartLockBroker::retrieve_credentials(self).await
    }

    async fn retrieve_sign_in_hints(&self) -> Result<Hint> {
        SmartLockBroker::retrieve_sign_in_hints(self).await
    }

    async fn store_credentials(&self, credential: Credential) -> Result<()> {
        SmartLockBroker::store_credentials(self, credential).await
    }

    async fn delete_stored_credentials(&self, credential: Credential) -> Result<()> {
        SmartLockBroker::delete_stored_credentials(self, credential).await
    }

    async fn disable_auto_sign_in(&self) -> Result<()> {
        SmartLockBroker::disable_auto_sign_in(self).await
    }
}

/// Builds a [`SmartLockBroker`] with non-default wiring.
pub struct SmartLockBrokerBuilder {
    provider: Arc<dyn CredentialProvider>,
    host: Arc<dyn ResolutionHost>,
    result_bus: Option<ResultBus>,
    retrieve_request: RetrieveRequest,
    hint_request: HintRequest,
}

impl SmartLockBrokerBuilder {
    /// Uses an externally created bus. Hosts usually need the publisher
    /// before the broker exists; create the bus first, hand
    /// `bus.publisher()` to the host, then pass the bus here.
    pub fn with_result_bus(mut self, bus: ResultBus) -> Self {
        self.result_bus = Some(bus);
        self
    }

    pub fn with_retrieve_request(mut self, request: RetrieveRequest) -> Self {
        self.retrieve_request = request;
        self
    }

    pub fn with_hint_request(mut self, request: HintRequest) -> Self {
        self.hint_request = request;
        self
    }

    pub fn build(self) -> SmartLockBroker {
        let bus = self.result_bus.unwrap_or_default();
        let gate = Arc::new(ResolutionGate::new(bus.clone(), self.host));
        SmartLockBroker {
            coordinator: Arc::new(SessionCoordinator::new(self.provider)),
            executor: OperationExecutor::new(gate),
            bus,
            retrieve_request: self.retrieve_request,
            hint_request: self.hint_request,
        }
    }
}

/// Drop-in no-op implementation: mutations complete immediately and
/// retrievals never resolve. Useful where the credential service is
/// unavailable but callers are wired against [`SmartLock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSmartLock;

#[async_trait]
impl SmartLock for DisabledSmartLock {
    async fn retrieve_credentials(&self) -> Result<Credential> {
        std::future::pending().await
    }

    async fn retrieve_sign_in_hints(&self) -> Result<Hint> {
        std::future::pending().await
    }

    async fn store_credentials(&self, _credential: Credential) -> Result<()> {
        Ok(())
    }

    async fn delete_stored_credentials(&self, _credential: Credential) -> Result<()> {
        Ok(())
    }

    async fn disable_auto_sign_in(&self) -> Result<()> {
        Ok(())
    }
}
