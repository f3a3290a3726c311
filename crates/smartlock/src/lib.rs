//! Asynchronous credential-session coordinator.
//!
//! One lazily-established connection to an external credential service is
//! shared, by reference count, across concurrently issued operations
//! (retrieve / store / delete / fetch-hints / disable-auto-sign-in).
//! Operations that need a user-facing confirmation go through a
//! single-flight resolution gate whose outcome arrives over a correlated
//! result bus.
//!
//! The external service and the confirmation surface are collaborators
//! behind the traits in [`provider`]; [`fake`] supplies in-memory doubles
//! for tests.

pub mod broker;
pub mod bus;
pub mod coordinator;
pub mod credential;
pub mod error;
pub mod executor;
pub mod fake;
pub mod gate;
pub mod provider;

pub use broker::{DisabledSmartLock, SmartLock, SmartLockBroker, SmartLockBrokerBuilder};
pub use bus::{
    DEFAULT_BUS_CAPACITY, RequestCode, ResultBus, ResultCode, ResultEvent, ResultPublisher,
    ResultSubscription,
};
pub use coordinator::{Session, SessionCoordinator};
pub use credential::{Credential, Hint, HintRequest, RetrieveRequest};
pub use error::{Result, SmartLockError};
pub use executor::{OperationExecutor, OperationKind};
pub use gate::ResolutionGate;
pub use provider::{
    CredentialProvider, ProviderFailure, ProviderResponse, ProviderSession, ResolutionHandle,
    ResolutionHost,
};
