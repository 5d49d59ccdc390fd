//! Session event bus
//!
//! Broadcasts `SessionEvent`s to any number of subscribers (CLI printer,
//! tests, a future UI). The bounded diagnostic feed lives next to it.

pub mod diagnostics;
pub mod types;

pub use diagnostics::DiagnosticLog;
pub use types::SessionEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for session events
///
/// Events published without subscribers are dropped. A subscriber that falls
/// more than the channel capacity behind receives `Lagged`.
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        tracing::trace!("event {}", event.event_name());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
