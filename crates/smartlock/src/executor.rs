//! Executes one semantic operation against an acquired session.
//!
//! The executor translates provider responses into exactly one terminal
//! outcome per operation: an immediate result maps directly, and a
//! `NeedsResolution` response is driven through the [`ResolutionGate`]
//! before being mapped. A busy gate surfaces as [`SmartLockError::GateBusy`]
//! instead of waiting.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::bus::{RequestCode, ResultCode, ResultEvent};
use crate::coordinator::Session;
use crate::credential::{Credential, Hint, HintRequest, RetrieveRequest};
use crate::error::{Result, SmartLockError};
use crate::gate::ResolutionGate;
use crate::provider::{ProviderFailure, ProviderResponse, ResolutionHandle};

/// The five semantic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Retrieve,
    Store,
    Delete,
    Hint,
    DisableAutoSignIn,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Retrieve => "retrieve",
            Self::Store => "store",
            Self::Delete => "delete",
            Self::Hint => "hint",
            Self::DisableAutoSignIn => "disable-auto-sign-in",
        };
        f.write_str(name)
    }
}

pub struct OperationExecutor {
    gate: Arc<ResolutionGate>,
}

impl OperationExecutor {
    pub fn new(gate: Arc<ResolutionGate>) -> Self {
        Self { gate }
    }

    pub async fn retrieve(
        &self,
        session: &Session,
        request: &RetrieveRequest,
    ) -> Result<Credential> {
        debug!(target = "smartlock.executor", session_id = session.id(), "retrieving credentials");
        match session.service().request(request).await {
            ProviderResponse::Success(credential) => {
                debug!(
                    target = "smartlock.executor",
                    credential_id = %credential.id,
                    "credentials retrieved"
                );
                Ok(credential)
            }
            ProviderResponse::Failure(failure) => {
                Err(failure_error(OperationKind::Retrieve, failure))
            }
            ProviderResponse::NeedsResolution { code, handle } => {
                let event = self.resolve(OperationKind::Retrieve, code, handle).await?;
                credential_outcome(event)
            }
        }
    }

    pub async fn store(&self, session: &Session, credential: &Credential) -> Result<()> {
        debug!(target = "smartlock.executor", session_id = session.id(), "saving credentials");
        match session.service().save(credential).await {
            ProviderResponse::Success(()) => {
                debug!(target = "smartlock.executor", "credentials saved");
                Ok(())
            }
            ProviderResponse::Failure(failure) => Err(failure_error(OperationKind::Store, failure)),
            ProviderResponse::NeedsResolution { code, handle } => {
                let event = self.resolve(OperationKind::Store, code, handle).await?;
                unit_outcome(event)
            }
        }
    }

    pub async fn delete(&self, session: &Session, credential: &Credential) -> Result<()> {
        debug!(target = "smartlock.executor", session_id = session.id(), "deleting credentials");
        // The credential may have been deleted via another device, so a
        // plain failure here is still scoped to this one operation.
        match session.service().delete(credential).await {
            ProviderResponse::Success(()) => {
                debug!(target = "smartlock.executor", "credentials deleted");
                Ok(())
            }
            ProviderResponse::Failure(failure) => {
                Err(failure_error(OperationKind::Delete, failure))
            }
            ProviderResponse::NeedsResolution { code, handle } => {
                let event = self.resolve(OperationKind::Delete, code, handle).await?;
                unit_outcome(event)
            }
        }
    }

    pub async fn hint(&self, session: &Session, request: &HintRequest) -> Result<Hint> {
        debug!(target = "smartlock.executor", session_id = session.id(), "retrieving sign-in hints");
        match session.service().hint_resolution(request).await {
            ProviderResponse::Success(credential) => Ok(Hint::from_credential(&credential)),
            ProviderResponse::Failure(failure) => Err(failure_error(OperationKind::Hint, failure)),
            ProviderResponse::NeedsResolution { code, handle } => {
                let event = self.resolve(OperationKind::Hint, code, handle).await?;
                let credential = credential_outcome(event)?;
                debug!(
                    target = "smartlock.executor",
                    credential_id = %credential.id,
                    "hints retrieved"
                );
                Ok(Hint::from_credential(&credential))
            }
        }
    }

    pub async fn disable_auto_sign_in(&self, session: &Session) -> Result<()> {
        debug!(target = "smartlock.executor", session_id = session.id(), "disabling auto sign-in");
        match session.service().disable_auto_sign_in().await {
            ProviderResponse::Success(()) => {
                debug!(target = "smartlock.executor", "auto sign-in disabled");
                Ok(())
            }
            ProviderResponse::Failure(failure) => {
                Err(failure_error(OperationKind::DisableAutoSignIn, failure))
            }
            ProviderResponse::NeedsResolution { code, handle } => {
                let event = self
                    .resolve(OperationKind::DisableAutoSignIn, code, handle)
                    .await?;
                unit_outcome(event)
            }
        }
    }

    async fn resolve(
        &self,
        operation: OperationKind,
        code: RequestCode,
        handle: ResolutionHandle,
    ) -> Result<ResultEvent> {
        debug!(
            target = "smartlock.executor",
            %operation,
            %code,
            "operation needs interactive resolution"
        );
        self.gate.request(code, handle).await
    }
}

fn failure_error(operation: OperationKind, failure: ProviderFailure) -> SmartLockError {
    if failure.sign_in_required {
        SmartLockError::SignInRequired(failure.message)
    } else {
        SmartLockError::ProviderOperation {
            operation,
            message: failure.message,
        }
    }
}

fn credential_outcome(event: ResultEvent) -> Result<Credential> {
    match (event.result, event.payload) {
        (ResultCode::Ok, Some(credential)) => Ok(credential),
        (ResultCode::Ok, None) => Err(SmartLockError::ResolutionDeclined(format!(
            "resolution for {} returned no credential",
            event.code
        ))),
        (ResultCode::Canceled, _) => Err(SmartLockError::ResolutionDeclined(format!(
            "resolution for {} was canceled",
            event.code
        ))),
    }
}

fn unit_outcome(event: ResultEvent) -> Result<()> {
    match event.result {
        ResultCode::Ok => Ok(()),
        ResultCode::Canceled => Err(SmartLockError::ResolutionDeclined(format!(
            "resolution for {} was canceled",
            event.code
        ))),
    }
}
