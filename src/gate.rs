//! Human-in-the-loop confirmation for flagged actions.

use log::{info, warn};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

use crate::types::AgentError;

struct Pending {
    reason: String,
    decision: oneshot::Sender<bool>,
}

/// Single-slot suspend/resume primitive.
///
/// At most one confirmation may be outstanding; a second request made while
/// the first is unresolved is refused with [`AgentError::ConfirmationPending`].
/// There is no timeout: the requester waits until a human answers.
#[derive(Default)]
pub struct SecurityGate {
    slot: Mutex<Option<Pending>>,
}

impl SecurityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspends until [`approve`](Self::approve) or [`deny`](Self::deny) is called.
    pub async fn request_confirmation(&self, reason: &str) -> Result<bool, AgentError> {
        let decision = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            // A waiter that was dropped no longer holds the slot.
            if let Some(pending) = slot.as_ref() {
                if !pending.decision.is_closed() {
                    return Err(AgentError::ConfirmationPending(pending.reason.clone()));
                }
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(Pending {
                reason: reason.to_string(),
                decision: tx,
            });
            rx
        };

        info!("Confirmation required: {reason}");
        decision.await.map_err(|_| AgentError::ConfirmationDropped)
    }

    /// Reason of the outstanding request, for display.
    pub fn pending_reason(&self) -> Option<String> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .filter(|pending| !pending.decision.is_closed())
            .map(|pending| pending.reason.clone())
    }

    /// Returns `false` when nothing was waiting.
    pub fn approve(&self) -> bool {
        self.resolve(true)
    }

    /// Returns `false` when nothing was waiting.
    pub fn deny(&self) -> bool {
        self.resolve(false)
    }

    fn resolve(&self, approved: bool) -> bool {
        let pending = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(pending) => {
                let delivered = pending.decision.send(approved).is_ok();
                if !delivered {
                    warn!("Confirmation '{}' had no waiter left", pending.reason);
                }
                delivered
            }
            None => false,
        }
    }
}
