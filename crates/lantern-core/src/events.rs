//! Runtime event bus.
//!
//! A thin wrapper over a tokio broadcast channel. Emission never fails
//! and never blocks: events with no subscribers are dropped. Observers
//! must not influence turn execution.

use tokio::sync::broadcast;

use lantern_types::event::RuntimeEvent;

/// Broadcast bus for [`RuntimeEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. Dropped silently when nobody listens.
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
