//! Notifications the engine broadcasts to the wider application.
//!
//! Subscribe via [`SyncController::subscribe()`](crate::SyncController::subscribe).
//! Slow subscribers lag (and see `RecvError::Lagged`) rather than block a sync.

use datawallet_types::IdentityAddress;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// A synchronization with datawallet reconciliation completed.
    DatawalletSynchronized { identity: IdentityAddress },
}

pub(crate) struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: SyncEvent) {
        // No receivers is fine.
        if self.tx.send(event).is_err() {
            trace!("sync event dropped, no subscribers");
        }
    }
}
