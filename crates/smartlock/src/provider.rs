//! External collaborator seams: the credential service and the
//! interactive resolution host.
//!
//! The coordinator never talks to a concrete service; it is wired over
//! these traits. Production integrations adapt a real provider SDK and a
//! real confirmation surface; [`crate::fake`] supplies in-memory doubles
//! for tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::bus::RequestCode;
use crate::credential::{Credential, HintRequest, RetrieveRequest};
use crate::error::Result;

/// Opaque payload a provider attaches to a pending resolution, forwarded
/// verbatim to the host that renders the confirmation flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionHandle(Value);

impl ResolutionHandle {
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }
}

/// Why the provider rejected an operation outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub message: String,
    /// True when the provider reports no stored credential and no
    /// resolvable prompt.
    pub sign_in_required: bool,
}

impl ProviderFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sign_in_required: false,
        }
    }

    pub fn sign_in_required(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sign_in_required: true,
        }
    }
}

/// One terminal signal from the provider for a single operation.
#[derive(Debug, Clone)]
pub enum ProviderResponse<T> {
    /// The operation completed without user involvement.
    Success(T),
    /// The operation failed and no resolution can help.
    Failure(ProviderFailure),
    /// The operation needs an out-of-band confirmation before it can
    /// complete; the handle parameterizes the host launch.
    NeedsResolution {
        code: RequestCode,
        handle: ResolutionHandle,
    },
}

/// Connects to the external credential service. Exactly one connect is
/// outstanding at a time; the coordinator enforces that, not the provider.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ProviderSession>>;
}

/// Capabilities of a connected credential service.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn request(&self, request: &RetrieveRequest) -> ProviderResponse<Credential>;
    async fn save(&self, credential: &Credential) -> ProviderResponse<()>;
    async fn delete(&self, credential: &Credential) -> ProviderResponse<()>;
    async fn hint_resolution(&self, request: &HintRequest) -> ProviderResponse<Credential>;
    async fn disable_auto_sign_in(&self) -> ProviderResponse<()>;
    async fn disconnect(&self);
}

/// Launches the user-facing confirmation flow for a pending resolution.
///
/// A host reports exactly one [`crate::bus::ResultEvent`] per launch
/// through the [`crate::bus::ResultPublisher`] it was constructed with.
#[async_trait]
pub trait ResolutionHost: Send + Sync {
    async fn launch(&self, code: RequestCode, handle: ResolutionHandle) -> Result<()>;
}
