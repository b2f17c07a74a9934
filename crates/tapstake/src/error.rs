//! Unified error type for Tapstake.

use tapstake_ledger::LedgerError;
use tapstake_protocol::ProtocolError;
use tapstake_room::RoomError;
use tapstake_store::StorageError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TapstakeError {
    /// An amount or access key failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A storage failure (lock timeout, constraint violation).
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A ledger failure (funds, reconciliation).
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A rejected or failed room operation.
    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
