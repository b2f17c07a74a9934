//! Room event fan-out over a `tokio::sync::broadcast` channel.

use tapstake_protocol::RoomEvent;
use tapstake_room::EventSink;
use tokio::sync::broadcast;
use tracing::trace;

/// Publishes every committed room event to all current subscribers.
///
/// Slow subscribers lag and lose the oldest events; publishing never
/// waits for them.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<RoomEvent>,
}

impl BroadcastSink {
    /// Creates a sink buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: RoomEvent) {
        if self.tx.send(event).is_err() {
            trace!("room event dropped, no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use tapstake_protocol::{RoomEventKind, RoomId, RoomStatus, SystemClock, Clock};

    use super::*;

    fn event(room: u64) -> RoomEvent {
        RoomEvent {
            room_id: RoomId(room),
            status: RoomStatus::Waiting,
            participant_count: 1,
            at: SystemClock.now(),
            kind: RoomEventKind::Created,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let sink = BroadcastSink::new(8);
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 2);

        sink.publish(event(1));
        assert_eq!(a.recv().await.unwrap().room_id, RoomId(1));
        assert_eq!(b.recv().await.unwrap().room_id, RoomId(1));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let sink = BroadcastSink::new(8);
        sink.publish(event(1));
        assert_eq!(sink.subscriber_count(), 0);
    }
}
