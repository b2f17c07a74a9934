//! Room lifecycle and settlement engine for Tapstake.
//!
//! Players stake Stars to enter a room, play a short tapping contest, and
//! the winner takes the pool minus an optional organizer fee. This crate
//! owns everything between "I want to play" and "the money has moved":
//! matchmaking, seats, the room state machine, expiry, refunds and
//! payouts.
//!
//! # Key types
//!
//! - [`RoomManager`]: every operation, each one transaction with retry
//! - [`RoomPolicy`]: per-kind behaviour (capacity, expiry, countdown,
//!   organizer share); public and private rooms are two policies, not two
//!   types
//! - [`RoomConfig`]: both policies plus engine limits
//! - [`EventSink`]: receives [`RoomEvent`](tapstake_protocol::RoomEvent)s
//!   after each commit
//! - [`RoomError`] / [`ErrorCategory`]: what went wrong and whether to
//!   retry
//!
//! # Guarantees
//!
//! - A room never seats more than its capacity, even when the last seat
//!   is contended.
//! - A user holds at most one open public seat and organizes at most one
//!   open private room.
//! - Every terminal room settles exactly once: a payout for Finished, a
//!   refund of every stake for Canceled and Expired.
//! - Room, seat, balance and ledger changes of one operation commit or
//!   roll back together.

mod config;
mod error;
mod events;
mod lifecycle;
mod manager;
mod matchmaker;
mod registry;
mod settlement;
mod work;

pub use config::{RoomConfig, RoomPolicy};
pub use error::{ErrorCategory, RoomError, RoomLookup};
pub use events::{EventSink, NullSink};
pub use manager::RoomManager;
pub use settlement::{PrizeSplit, split_pool};
