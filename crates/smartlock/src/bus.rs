//! Correlated delivery of resolution outcomes from the external host.
//!
//! The bus is a multicast channel of [`ResultEvent`]s keyed by
//! [`RequestCode`]. Subscriptions filter on one code; events for other
//! codes are skipped, and an event published while no subscriber is armed
//! for its code is lost. The resolution gate therefore arms its
//! subscription before it launches the host.

use std::fmt;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::error::{Result, SmartLockError};

/// Default multicast capacity; one resolution rarely has more than one
/// event outstanding.
pub const DEFAULT_BUS_CAPACITY: usize = 16;

/// Correlation key binding a resolution launch to its eventual result.
/// One code exists per operation kind that can require resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    RetrieveCredential,
    SaveCredential,
    PickHint,
}

impl RequestCode {
    /// Stable wire value identifying this resolution kind to the host.
    pub const fn value(self) -> u16 {
        match self {
            Self::RetrieveCredential => 64357,
            Self::SaveCredential => 64358,
            Self::PickHint => 64359,
        }
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RetrieveCredential => "retrieve-credential",
            Self::SaveCredential => "save-credential",
            Self::PickHint => "pick-hint",
        };
        f.write_str(name)
    }
}

/// Outcome reported by the resolution host for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// The user confirmed the resolution.
    Ok,
    /// The user dismissed the flow, or the host aborted it.
    Canceled,
}

/// One resolution outcome. Ephemeral: not buffered beyond the channel
/// queues of currently-armed subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEvent {
    pub code: RequestCode,
    pub result: ResultCode,
    pub payload: Option<Credential>,
}

impl ResultEvent {
    pub fn ok(code: RequestCode, payload: Option<Credential>) -> Self {
        Self {
            code,
            result: ResultCode::Ok,
            payload,
        }
    }

    pub fn canceled(code: RequestCode) -> Self {
        Self {
            code,
            result: ResultCode::Canceled,
            payload: None,
        }
    }
}

/// Multicast channel carrying resolution outcomes.
#[derive(Clone)]
pub struct ResultBus {
    tx: broadcast::Sender<ResultEvent>,
}

impl ResultBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Handle handed to the resolution host so its completion hook can
    /// report outcomes back into the bus.
    pub fn publisher(&self) -> ResultPublisher {
        ResultPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Arms a subscription filtered on `code`. Only events published after
    /// this call are observed.
    pub fn subscribe(&self, code: RequestCode) -> ResultSubscription {
        ResultSubscription {
            code,
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ResultBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// Publishing side of the bus, held by the resolution host.
#[derive(Clone)]
pub struct ResultPublisher {
    tx: broadcast::Sender<ResultEvent>,
}

impl ResultPublisher {
    /// Delivers the event to every subscriber currently armed for its
    /// request code. An event with no live subscriber is dropped.
    pub fn publish(&self, event: ResultEvent) {
        let code = event.code;
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(target = "smartlock.bus", %code, receivers, "result event published");
            }
            Err(_) => {
                warn!(target = "smartlock.bus", %code, "result event dropped; no subscriber armed");
            }
        }
    }
}

/// A live subscription for a single request code.
pub struct ResultSubscription {
    code: RequestCode,
    rx: broadcast::Receiver<ResultEvent>,
}

impl ResultSubscription {
    pub fn code(&self) -> RequestCode {
        self.code
    }

    /// Waits for the next event matching this subscription's code.
    /// Events for other codes are skipped without being consumed from
    /// other subscribers.
    pub async fn recv(&mut self) -> Result<ResultEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.code == self.code => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target = "smartlock.bus",
                        code = %self.code,
                        skipped,
                        "result subscription lagged"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SmartLockError::ResolutionDeclined(
                        "result bus closed before a result arrived".to_string(),
                    ));
                }
            }
        }
    }
}
