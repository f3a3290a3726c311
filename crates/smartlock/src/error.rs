//! Error taxonomy for credential-session operations.
//!
//! Every error is `Clone` so a single terminal connection failure can fan
//! out to all current waiters as the identical kind.

use thiserror::Error;

use crate::bus::RequestCode;
use crate::executor::OperationKind;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SmartLockError>;

/// Terminal error for a single credential operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmartLockError {
    /// The shared connection to the credential service could not be
    /// established. Fans out to every waiter of the active connection
    /// generation; a fresh top-level call starts a new attempt.
    #[error("connection to credential service failed: {0}")]
    Connection(String),

    /// The provider reports no stored credential and offers no resolvable
    /// prompt.
    #[error("sign-in required: {0}")]
    SignInRequired(String),

    /// The user declined the interactive resolution, or the resolution host
    /// could not be launched.
    #[error("interactive resolution declined: {0}")]
    ResolutionDeclined(String),

    /// The provider rejected the operation outright.
    #[error("provider rejected {operation}: {message}")]
    ProviderOperation {
        operation: OperationKind,
        message: String,
    },

    /// A resolution for the same request code is already in flight. The
    /// caller is rejected immediately rather than queued.
    #[error("a resolution for {0} is already in flight")]
    GateBusy(RequestCode),

    /// `release()` was called more times than `acquire()`.
    #[error("release() called without a matching acquire()")]
    ReleaseUnderflow,
}

impl SmartLockError {
    /// True for errors that reset the shared session generation.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_gate_busy(&self) -> bool {
        matches!(self, Self::GateBusy(_))
    }
}
