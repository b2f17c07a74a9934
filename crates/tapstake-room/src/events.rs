//! Where room events go after a commit.

use tapstake_protocol::RoomEvent;

/// Receives room-state-changed notifications.
///
/// Called after the transaction that produced the event committed, never
/// while locks are held. Implementations must not block; delivery is best
/// effort.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: RoomEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: RoomEvent) {}
}
