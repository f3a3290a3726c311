//! Fake credential provider and resolution host for exercising the
//! coordinator without a real credential service.
//!
//! Both doubles follow the same pattern: a builder produces the trait
//! object handed to the broker plus a controller handle for scripting
//! outcomes and inspecting what happened.
//!
//! # Example
//!
//! ```ignore
//! let bus = ResultBus::default();
//! let (provider, provider_ctl) = FakeProviderBuilder::new().manual_connect().build();
//! let (host, host_ctl) = FakeHostBuilder::new(bus.publisher()).build();
//! let broker = SmartLockBroker::builder(provider, host)
//!     .with_result_bus(bus)
//!     .build();
//!
//! let fut = broker.retrieve_credentials();
//! provider_ctl.complete_connect();
//! let credential = fut.await?;
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::bus::{RequestCode, ResultCode, ResultEvent, ResultPublisher};
use crate::credential::{Credential, HintRequest, RetrieveRequest};
use crate::error::{Result, SmartLockError};
use crate::executor::OperationKind;
use crate::provider::{
    CredentialProvider, ProviderResponse, ProviderSession, ResolutionHandle, ResolutionHost,
};

/// Credential the fake session returns when no response is scripted.
pub fn canned_credential() -> Credential {
    Credential::new("ada@example.com")
        .with_name("Ada Lovelace")
        .with_password("enchantress-of-number")
}

#[derive(Clone)]
enum ConnectMode {
    Immediate(std::result::Result<(), SmartLockError>),
    Manual,
}

#[derive(Default)]
struct SessionScript {
    retrieve: VecDeque<ProviderResponse<Credential>>,
    save: VecDeque<ProviderResponse<()>>,
    delete: VecDeque<ProviderResponse<()>>,
    hint: VecDeque<ProviderResponse<Credential>>,
    disable: VecDeque<ProviderResponse<()>>,
}

struct FakeProviderInner {
    connect_mode: ConnectMode,
    connect_attempts: AtomicUsize,
    disconnects: AtomicUsize,
    pending_connects: Mutex<VecDeque<oneshot::Sender<std::result::Result<(), SmartLockError>>>>,
    script: Mutex<SessionScript>,
    operations: Mutex<Vec<OperationKind>>,
}

/// Builder for the fake provider.
pub struct FakeProviderBuilder {
    connect_mode: ConnectMode,
}

impl FakeProviderBuilder {
    /// Provider whose connects succeed immediately.
    pub fn new() -> Self {
        Self {
            connect_mode: ConnectMode::Immediate(Ok(())),
        }
    }

    /// Connects stay pending until the controller completes or fails them.
    pub fn manual_connect(mut self) -> Self {
        self.connect_mode = ConnectMode::Manual;
        self
    }

    /// Every connect fails immediately with the given message.
    pub fn failing_connect(mut self, message: &str) -> Self {
        self.connect_mode =
            ConnectMode::Immediate(Err(SmartLockError::Connection(message.to_string())));
        self
    }

    pub fn build(self) -> (Arc<FakeProvider>, FakeProviderController) {
        let inner = Arc::new(FakeProviderInner {
            connect_mode: self.connect_mode,
            connect_attempts: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            pending_connects: Mutex::new(VecDeque::new()),
            script: Mutex::new(SessionScript::default()),
            operations: Mutex::new(Vec::new()),
        });
        let provider = Arc::new(FakeProvider {
            inner: Arc::clone(&inner),
        });
        (provider, FakeProviderController { inner })
    }
}

impl Default for FakeProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory [`CredentialProvider`].
pub struct FakeProvider {
    inner: Arc<FakeProviderInner>,
}

#[async_trait]
impl CredentialProvider for FakeProvider {
    async fn connect(&self) -> Result<Arc<dyn ProviderSession>> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        match &self.inner.connect_mode {
            ConnectMode::Immediate(Ok(())) => {}
            ConnectMode::Immediate(Err(err)) => return Err(err.clone()),
            ConnectMode::Manual => {
                let (tx, rx) = oneshot::channel();
                self.inner.pending_connects.lock().push_back(tx);
                match rx.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(_) => {
                        return Err(SmartLockError::Connection(
                            "fake connect abandoned".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(Arc::new(FakeSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct FakeSession {
    inner: Arc<FakeProviderInner>,
}

impl FakeSession {
    fn record(&self, operation: OperationKind) {
        self.inner.operations.lock().push(operation);
    }
}

#[async_trait]
impl ProviderSession for FakeSession {
    async fn request(&self, _request: &RetrieveRequest) -> ProviderResponse<Credential> {
        self.record(OperationKind::Retrieve);
        self.inner
            .script
            .lock()
            .retrieve
            .pop_front()
            .unwrap_or_else(|| ProviderResponse::Success(canned_credential()))
    }

    async fn save(&self, _credential: &Credential) -> ProviderResponse<()> {
        self.record(OperationKind::Store);
        self.inner
            .script
            .lock()
            .save
            .pop_front()
            .unwrap_or(ProviderResponse::Success(()))
    }

    async fn delete(&self, _credential: &Credential) -> ProviderResponse<()> {
        self.record(OperationKind::Delete);
        self.inner
            .script
            .lock()
            .delete
            .pop_front()
            .unwrap_or(ProviderResponse::Success(()))
    }

    async fn hint_resolution(&self, _request: &HintRequest) -> ProviderResponse<Credential> {
        self.record(OperationKind::Hint);
        self.inner
            .script
            .lock()
            .hint
            .pop_front()
            .unwrap_or_else(|| ProviderResponse::Success(canned_credential()))
    }

    async fn disable_auto_sign_in(&self) -> ProviderResponse<()> {
        self.record(OperationKind::DisableAutoSignIn);
        self.inner
            .script
            .lock()
            .disable
            .pop_front()
            .unwrap_or(ProviderResponse::Success(()))
    }

    async fn disconnect(&self) {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripts outcomes and inspects the fake provider.
pub struct FakeProviderController {
    inner: Arc<FakeProviderInner>,
}

impl FakeProviderController {
    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    /// Number of manual connects currently waiting on the controller.
    pub fn pending_connects(&self) -> usize {
        self.inner.pending_connects.lock().len()
    }

    /// Completes the oldest pending manual connect. Returns whether one
    /// was waiting.
    pub fn complete_connect(&self) -> bool {
        match self.inner.pending_connects.lock().pop_front() {
            Some(tx) => tx.send(Ok(())).is_ok(),
            None => false,
        }
    }

    /// Fails the oldest pending manual connect with a connection error.
    pub fn fail_connect(&self, message: &str) -> bool {
        match self.inner.pending_connects.lock().pop_front() {
            Some(tx) => tx
                .send(Err(SmartLockError::Connection(message.to_string())))
                .is_ok(),
            None => false,
        }
    }

    pub fn push_retrieve(&self, response: ProviderResponse<Credential>) {
        self.inner.script.lock().retrieve.push_back(response);
    }

    pub fn push_save(&self, response: ProviderResponse<()>) {
        self.inner.script.lock().save.push_back(response);
    }

    pub fn push_delete(&self, response: ProviderResponse<()>) {
        self.inner.script.lock().delete.push_back(response);
    }

    pub fn push_hint(&self, response: ProviderResponse<Credential>) {
        self.inner.script.lock().hint.push_back(response);
    }

    pub fn push_disable(&self, response: ProviderResponse<()>) {
        self.inner.script.lock().disable.push_back(response);
    }

    /// Every session operation observed so far, in order.
    pub fn operations(&self) -> Vec<OperationKind> {
        self.inner.operations.lock().clone()
    }
}

/// What the fake host does when launched.
#[derive(Clone)]
pub enum LaunchBehavior {
    /// Publish the given outcome from inside `launch`.
    Publish(ResultCode, Option<Credential>),
    /// Fail the launch itself.
    Fail(String),
    /// Return without publishing; the test publishes later (or never).
    Stall,
}

struct FakeHostInner {
    publisher: ResultPublisher,
    default_behavior: LaunchBehavior,
    script: Mutex<VecDeque<LaunchBehavior>>,
    launches: Mutex<Vec<RequestCode>>,
}

/// Builder for the fake resolution host.
pub struct FakeHostBuilder {
    publisher: ResultPublisher,
    default_behavior: LaunchBehavior,
}

impl FakeHostBuilder {
    /// Host that confirms every launch with the canned credential.
    pub fn new(publisher: ResultPublisher) -> Self {
        Self {
            publisher,
            default_behavior: LaunchBehavior::Publish(ResultCode::Ok, Some(canned_credential())),
        }
    }

    /// Host that launches but never reports, leaving the outcome to the
    /// test.
    pub fn stalled(mut self) -> Self {
        self.default_behavior = LaunchBehavior::Stall;
        self
    }

    /// Host whose launches fail outright.
    pub fn failing(mut self, message: &str) -> Self {
        self.default_behavior = LaunchBehavior::Fail(message.to_string());
        self
    }

    /// Host that cancels every confirmation flow.
    pub fn canceling(mut self) -> Self {
        self.default_behavior = LaunchBehavior::Publish(ResultCode::Canceled, None);
        self
    }

    pub fn build(self) -> (Arc<FakeHost>, FakeHostController) {
        let inner = Arc::new(FakeHostInner {
            publisher: self.publisher,
            default_behavior: self.default_behavior,
            script: Mutex::new(VecDeque::new()),
            launches: Mutex::new(Vec::new()),
        });
        let host = Arc::new(FakeHost {
            inner: Arc::clone(&inner),
        });
        (host, FakeHostController { inner })
    }
}

/// In-memory [`ResolutionHost`].
pub struct FakeHost {
    inner: Arc<FakeHostInner>,
}

#[async_trait]
impl ResolutionHost for FakeHost {
    async fn launch(&self, code: RequestCode, _handle: ResolutionHandle) -> Result<()> {
        self.inner.launches.lock().push(code);
        let behavior = self
            .inner
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.inner.default_behavior.clone());
        match behavior {
            LaunchBehavior::Publish(result, payload) => {
                self.inner.publisher.publish(ResultEvent {
                    code,
                    result,
                    payload,
                });
                Ok(())
            }
            LaunchBehavior::Fail(message) => Err(SmartLockError::ResolutionDeclined(message)),
            LaunchBehavior::Stall => Ok(()),
        }
    }
}

/// Scripts and inspects the fake host.
pub struct FakeHostController {
    inner: Arc<FakeHostInner>,
}

impl FakeHostController {
    /// Overrides the default behavior for the next launch.
    pub fn push_behavior(&self, behavior: LaunchBehavior) {
        self.inner.script.lock().push_back(behavior);
    }

    /// Request codes launched so far, in order.
    pub fn launches(&self) -> Vec<RequestCode> {
        self.inner.launches.lock().clone()
    }
}
