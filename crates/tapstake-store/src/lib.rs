//! SQLite-backed store for Tapstake.
//!
//! Users, rooms, participants and the append-only ledger live in SQLite
//! tables behind an sqlx pool. Access keys carry a UNIQUE constraint;
//! every unit of work is one database transaction.
//!
//! # Key types
//!
//! - [`Store`]: the pool plus committed read paths; cheap to clone
//! - [`Tx`]: a unit of work: reads rows, stages writes, commits or rolls
//!   back
//! - [`RoomRow`] / [`UserRow`] / [`Account`]: what a loaded row holds
//! - [`RoomSummary`]: the committed listing view of a room
//! - [`StorageError`]: lock timeouts, constraint violations
//!
//! # Isolation
//!
//! A [`Tx`] opens with a write, so it holds the database write lock from
//! [`Store::begin`] until it commits or is dropped. Units of work are
//! serialized: a row read inside one can be re-checked and modified
//! without any other writer interleaving. A second writer waits up to
//! [`StoreConfig::lock_timeout`] and then fails with
//! [`StorageError::LockTimeout`].

mod error;
mod rows;
mod schema;
mod sql;
mod store;
mod tx;

pub use error::{StorageError, StorageResult};
pub use rows::{Account, RoomRow, RoomSummary, UserRow};
pub use store::{Store, StoreConfig};
pub use tx::Tx;
