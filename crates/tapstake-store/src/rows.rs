//! Row types as loaded from and written back to the tables.

use chrono::{DateTime, Utc};
use tapstake_protocol::{
    Participant, Room, RoomId, RoomKind, RoomStatus, Stars, Transaction,
    User, UserId,
};

/// A user row: the account plus the engine's open-room markers.
///
/// The markers live on the same row as the balance, so one transaction
/// can check "is this user already playing?" and debit the stake.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub user: User,
    /// The open (non-terminal) public room this user plays in.
    pub open_public_room: Option<RoomId>,
    /// The open private room this user organizes.
    pub organizing_room: Option<RoomId>,
}

impl UserRow {
    /// A new row with no open rooms.
    pub fn new(user: User) -> Self {
        Self {
            user,
            open_public_room: None,
            organizing_room: None,
        }
    }

    /// Clears every marker pointing at `room`.
    pub fn release(&mut self, room: RoomId) {
        if self.open_public_room == Some(room) {
            self.open_public_room = None;
        }
        if self.organizing_room == Some(room) {
            self.organizing_room = None;
        }
    }
}

/// One user's row and their ledger entries, read together.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub row: UserRow,
    /// Append-only, oldest first.
    pub ledger: Vec<Transaction>,
}

/// A room row together with its participant set.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRow {
    pub room: Room,
    /// In join order.
    pub participants: Vec<Participant>,
}

impl RoomRow {
    /// A row with no participants yet.
    pub fn new(room: Room) -> Self {
        Self {
            room,
            participants: Vec::new(),
        }
    }

    /// Number of seated participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Returns `true` once every seat is taken.
    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.room.capacity
    }

    /// The participant record for `user`, if seated.
    pub fn participant(&self, user: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user)
    }

    /// User ids of everyone seated, in join order.
    pub fn participant_ids(&self) -> Vec<UserId> {
        self.participants.iter().map(|p| p.user_id).collect()
    }
}

/// Listing view of a committed room.
///
/// Listings are only ever a hint: callers load the row inside their
/// transaction and re-check it before acting.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSummary {
    pub id: RoomId,
    pub kind: RoomKind,
    pub entry_fee: Stars,
    pub capacity: usize,
    pub status: RoomStatus,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    pub preparation_started_at: Option<DateTime<Utc>>,
    pub participant_count: usize,
}

impl RoomSummary {
    /// Returns `true` if another seat is free.
    pub fn has_spare_seat(&self) -> bool {
        self.participant_count < self.capacity
    }
}
