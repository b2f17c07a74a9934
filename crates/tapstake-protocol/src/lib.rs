//! Shared vocabulary for Tapstake.
//!
//! This crate defines the data every other layer talks about:
//!
//! - **Identity** ([`UserId`], [`RoomId`], [`ParticipantId`],
//!   [`TransactionId`], [`AccessKey`]): newtype wrappers so ids can't be
//!   mixed up.
//! - **Money** ([`Stars`]): a fixed-scale (2 places) decimal amount.
//! - **Records** ([`User`], [`Room`], [`Participant`], [`Transaction`]):
//!   the rows the store persists.
//! - **Results** ([`JoinOutcome`], [`PayoutSummary`], [`RefundSummary`],
//!   [`RoomEvent`], ...): explicit result types for each engine operation.
//! - **Time** ([`Clock`]): where "now" comes from.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about locking or persistence. It only
//! describes values and the rules that hold for a single value (e.g. which
//! status transitions are legal).
//!
//! ```text
//! Protocol (values) → Store (rows + tx) → Ledger / Room (engine) → tapstake
//! ```

mod clock;
mod error;
mod money;
mod results;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ProtocolError;
pub use money::Stars;
pub use results::{
    DisconnectOutcome, JoinOutcome, LeaveOutcome, PayoutSummary,
    PrivateRoomCreated, Refund, RefundSummary, RoomEvent, RoomEventKind,
    RoomSnapshot, Settlement, SweepReport,
};
pub use types::{
    AccessKey, Participant, ParticipantId, Room, RoomId, RoomKind,
    RoomStatus, Transaction, TransactionId, TransactionKind, User, UserId,
};
