//! Error types for the room engine.

use std::fmt;

use tapstake_ledger::LedgerError;
use tapstake_protocol::{
    AccessKey, ProtocolError, RefundSummary, RoomId, RoomStatus, Stars, UserId,
};
use tapstake_store::StorageError;

/// How a room was looked up, for `RoomNotFound` messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomLookup {
    Id(RoomId),
    Key(AccessKey),
}

impl fmt::Display for RoomLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Key(key) => write!(f, "with key {key}"),
        }
    }
}

/// Coarse classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected input; retrying with the same input fails again.
    Validation,
    /// The room or user is not in a state that allows the operation.
    StateConflict,
    /// Not enough balance or seats.
    InsufficientResource,
    /// Storage contention; the operation can be retried.
    Transient,
    /// Broken invariant or exhausted internal limit.
    Fatal,
}

/// Errors that can occur during room operations.
///
/// Every failure rolls the whole operation back. The one exception is
/// [`RoomError::TooFewParticipants`]: the refund and cancel it reports
/// were committed before the error was returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoomError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("room {0} not found")]
    RoomNotFound(RoomLookup),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// The room passed its expiry window while still Waiting.
    #[error("room {0} has expired")]
    RoomExpired(RoomId),

    #[error("room {room} costs {expected} Stars, caller expected {actual}")]
    FeeMismatch {
        room: RoomId,
        expected: Stars,
        actual: Stars,
    },

    /// An organizer tried to join their own room by key.
    #[error("user {user} created room {room} and cannot join it by key")]
    SelfJoin { room: RoomId, user: UserId },

    #[error("user {user} has {balance} Stars, {required} required")]
    InsufficientFunds {
        user: UserId,
        balance: Stars,
        required: Stars,
    },

    /// Every seat is taken.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("user {user} already joined room {room}")]
    AlreadyJoined { room: RoomId, user: UserId },

    /// The user already holds an open public participation.
    #[error("user {user} is already playing in room {room}")]
    AlreadyInRoom { user: UserId, room: RoomId },

    /// The user already organizes an open private room.
    #[error("user {user} already has open room {room}")]
    AlreadyHasOpenRoom { user: UserId, room: RoomId },

    #[error("room {room} is {status} and not accepting players")]
    RoomNotJoinable { room: RoomId, status: RoomStatus },

    #[error("only the creator of room {room} can start it, not {user}")]
    NotCreator { room: RoomId, user: UserId },

    #[error("user {user} is not a participant of room {room}")]
    NotParticipant { room: RoomId, user: UserId },

    /// The named winner organizes the room.
    #[error("user {user} organizes room {room} and cannot win it")]
    OrganizerCannotWin { room: RoomId, user: UserId },

    #[error("cannot {action} room {room} while it is {status}")]
    WrongState {
        room: RoomId,
        status: RoomStatus,
        action: &'static str,
    },

    /// Start was attempted with fewer than the minimum players. The room
    /// has been canceled and everyone refunded.
    #[error("room {room} has {count} players, {required} required; canceled and refunded")]
    TooFewParticipants {
        room: RoomId,
        count: usize,
        required: usize,
        refund: RefundSummary,
    },

    #[error("no free access key after {0} attempts")]
    KeyGenerationExhausted(u32),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl RoomError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_)
            | Self::SelfJoin { .. }
            | Self::FeeMismatch { .. }
            | Self::OrganizerCannotWin { .. } => ErrorCategory::Validation,
            Self::RoomNotFound(_)
            | Self::UserNotFound(_)
            | Self::RoomExpired(_)
            | Self::AlreadyJoined { .. }
            | Self::AlreadyInRoom { .. }
            | Self::AlreadyHasOpenRoom { .. }
            | Self::RoomNotJoinable { .. }
            | Self::NotCreator { .. }
            | Self::NotParticipant { .. }
            | Self::WrongState { .. }
            | Self::TooFewParticipants { .. } => ErrorCategory::StateConflict,
            Self::InsufficientFunds { .. } | Self::RoomFull(_) => {
                ErrorCategory::InsufficientResource
            }
            Self::Storage(e) if e.is_transient() => ErrorCategory::Transient,
            Self::Ledger(e) if e.is_transient() => ErrorCategory::Transient,
            Self::KeyGenerationExhausted(_) | Self::Storage(_) | Self::Ledger(_) => {
                ErrorCategory::Fatal
            }
        }
    }

    /// `true` if the whole operation should be retried.
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

impl From<LedgerError> for RoomError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                user,
                balance,
                required,
            } => Self::InsufficientFunds {
                user,
                balance,
                required,
            },
            LedgerError::UnknownUser(user) => Self::UserNotFound(user),
            overflow @ LedgerError::Overflow { .. } => Self::Validation(overflow.to_string()),
            LedgerError::Storage(e) => Self::Storage(e),
            other => Self::Ledger(other),
        }
    }
}

impl From<ProtocolError> for RoomError {
    fn from(err: ProtocolError) -> Self {
        Self::Validation(err.to_string())
    }
}
