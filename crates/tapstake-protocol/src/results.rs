//! Explicit result types for engine operations, plus the events the
//! engine publishes after each commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AccessKey, Participant, ParticipantId, Room, RoomId, RoomStatus, Stars,
    UserId,
};

/// Returned by `join_or_create` and `join_by_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOutcome {
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
    /// Status after the join (Preparation/Active if this join filled it).
    pub status: RoomStatus,
    pub participant_count: usize,
    /// `true` if the caller's join created the room.
    pub created: bool,
}

/// Returned by `create_private_room`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateRoomCreated {
    pub room_id: RoomId,
    pub access_key: AccessKey,
    /// The creator's own seat.
    pub participant_id: ParticipantId,
}

/// Prize distribution recorded when a room reaches Finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutSummary {
    pub room_id: RoomId,
    pub winner_id: UserId,
    pub participant_count: usize,
    /// `entry_fee × participant_count`.
    pub pool: Stars,
    pub winner_amount: Stars,
    /// Receives `organizer_amount`; `None` when the share is zero.
    pub organizer_id: Option<UserId>,
    pub organizer_amount: Stars,
}

/// One participant's refund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub user_id: UserId,
    pub amount: Stars,
}

/// Refunds recorded when a room reaches Canceled or Expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundSummary {
    pub room_id: RoomId,
    /// Canceled or Expired.
    pub status: RoomStatus,
    pub refunds: Vec<Refund>,
    pub total: Stars,
}

/// The single settlement attached to a terminal room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Settlement {
    Payout(PayoutSummary),
    Refund(RefundSummary),
}

/// Returned by `leave_room`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveOutcome {
    pub room_id: RoomId,
    /// The leaver's own stake, returned.
    pub refunded: Stars,
    /// Status after the leave (Canceled if the room emptied or the
    /// organizer left).
    pub status: RoomStatus,
    /// Set if leaving canceled the room for everyone else.
    pub canceled: Option<RefundSummary>,
}

/// Returned by `report_disconnect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectOutcome {
    pub room_id: RoomId,
    pub refunded: Stars,
    pub remaining: usize,
    /// Set if the drop left too few players and the room was canceled.
    pub canceled: Option<RefundSummary>,
}

/// What one sweep pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Waiting rooms expired and refunded.
    pub expired_rooms: usize,
    /// Individual refunds issued by those expiries.
    pub refunded_participants: usize,
    /// Preparation rooms whose countdown ended and moved to Active.
    pub promoted_rooms: usize,
    /// Rooms that failed to process; logged and retried next pass.
    pub failures: usize,
}

/// A read-path view of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room: Room,
    pub participants: Vec<Participant>,
    /// The status clients should act on. Equal to `room.status`, except
    /// that a Waiting room past its expiry window reads as Expired before
    /// the sweep has archived it.
    pub effective_status: RoomStatus,
}

/// What happened to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEventKind {
    Created,
    ParticipantJoined { user_id: UserId },
    ParticipantLeft { user_id: UserId },
    StatusChanged { from: RoomStatus, to: RoomStatus },
    Settled { settlement: Settlement },
}

/// A room-state-changed notification for the real-time fan-out.
///
/// Published only after the transaction that caused it committed.
/// Delivery is best effort; consumers must tolerate gaps and re-read the
/// room when in doubt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub room_id: RoomId,
    pub status: RoomStatus,
    pub participant_count: usize,
    pub at: DateTime<Utc>,
    pub kind: RoomEventKind,
}
