//! Session event seam toward the (external) web layer.
//!
//! The coordinator publishes position, address, and eviction updates on a
//! bounded channel. The consumer is best-effort: a full or closed channel
//! drops the event with a warning and never back-pressures coordination.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::pairing::Pairing;

/// Sensible bound for the event channel: bursts are small (one event per
/// queued or paired request per pass).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the web layer gets told about a request.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The request's 0-based place in the waiting queue moved.
    Position { id: String, position: usize },
    /// The request's pairing is live at these addresses.
    Addresses { id: String, pairing: Pairing },
    /// The request left the system.
    Evicted { id: String },
}

/// Fire-and-forget publish. Coordination must not block on a slow or
/// absent web layer, so a full or hung-up channel only warns.
pub fn publish(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if let Err(err) = tx.try_send(event) {
        let reason = match err {
            TrySendError::Full(_) => "channel full",
            TrySendError::Closed(_) => "no consumer",
        };
        warn!(reason, "dropping session event");
    }
}
