//! Dispatched-Event Bus
//!
//! The single downstream signal of the pipeline: "message dispatched",
//! emitted after a delivery attempt succeeds. Subscribers (the lifecycle
//! cleaner) receive the submission id and locate its stored file set
//! through the registry. Never emitted when dispatch fails.

use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the event channel; cleanup lag beyond this loses events,
/// which only means the affected files persist.
const DISPATCH_CHANNEL_CAPACITY: usize = 64;

/// The "message dispatched" signal for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchEvent {
    /// The submission whose message was dispatched.
    pub submission_id: Uuid,
}

/// In-process fan-out for dispatch events.
#[derive(Debug, Clone)]
pub struct DispatchBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl Default for DispatchBus {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchBus {
    /// Create a bus.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DISPATCH_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to dispatch events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    /// Signal that the message for `submission_id` has been dispatched.
    ///
    /// Fire-and-forget: a missing subscriber is not an error.
    pub fn notify_dispatched(&self, submission_id: Uuid) {
        if self.tx.send(DispatchEvent { submission_id }).is_err() {
            tracing::debug!(%submission_id, "Dispatch event had no subscribers");
        }
    }
}
