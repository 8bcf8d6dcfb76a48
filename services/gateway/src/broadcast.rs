//! Non-blocking fan-out of session lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hubward_events::{EventFrame, TunnelEvent};
use tokio::sync::broadcast;

/// Default broadcast buffer capacity (frames).
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Broadcasts session lifecycle events to any number of observers.
///
/// Publishing never blocks and never fails: with no observers attached
/// the frame is dropped, and an observer that falls behind the buffer
/// loses the oldest frames rather than stalling a relay.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<EventFrame>,
    seq: Arc<AtomicU64>,
}

impl EventBroadcaster {
    /// Create a broadcaster with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event, stamping it with the next sequence number.
    pub fn publish(&self, event: TunnelEvent) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let frame = EventFrame::new(seq, event);
        // A send error means there are no live observers; the frame
        // is simply dropped.
        let _ = self.tx.send(frame);
    }

    /// Attach a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.tx.subscribe()
    }

    /// Number of currently attached observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}
