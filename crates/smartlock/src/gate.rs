//! Single-flight gate for interactive resolutions.
//!
//! At most one resolution is in flight per [`RequestCode`]. A second
//! request for a busy code is rejected with [`SmartLockError::GateBusy`]
//! immediately instead of being queued. The bus subscription is armed
//! under the same lock that claims the code, before the host is launched,
//! so a host that completes instantly cannot publish into a window where
//! nobody is listening.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bus::{RequestCode, ResultBus, ResultEvent};
use crate::error::{Result, SmartLockError};
use crate::provider::{ResolutionHandle, ResolutionHost};

pub struct ResolutionGate {
    bus: ResultBus,
    host: Arc<dyn ResolutionHost>,
    in_flight: Mutex<HashSet<RequestCode>>,
}

impl ResolutionGate {
    pub fn new(bus: ResultBus, host: Arc<dyn ResolutionHost>) -> Self {
        Self {
            bus,
            host,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Launches the host for `code` and resolves with the first matching
    /// result event. The in-flight claim is released on every exit path,
    /// success or failure, re-enabling future resolutions for the code.
    pub async fn request(&self, code: RequestCode, handle: ResolutionHandle) -> Result<ResultEvent> {
        let mut subscription = {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(code) {
                debug!(target = "smartlock.gate", %code, "resolution already in flight");
                return Err(SmartLockError::GateBusy(code));
            }
            self.bus.subscribe(code)
        };

        debug!(target = "smartlock.gate", %code, "launching resolution host");
        if let Err(err) = self.host.launch(code, handle).await {
            self.clear(code);
            warn!(
                target = "smartlock.gate",
                %code,
                error = %err,
                "resolution host launch failed"
            );
            return Err(SmartLockError::ResolutionDeclined(format!(
                "could not launch resolution host: {err}"
            )));
        }

        let outcome = subscription.recv().await;
        self.clear(code);
        outcome
    }

    /// True while a resolution for `code` is outstanding.
    pub fn is_busy(&self, code: RequestCode) -> bool {
        self.in_flight.lock().contains(&code)
    }

    fn clear(&self, code: RequestCode) {
        self.in_flight.lock().remove(&code);
    }
}
