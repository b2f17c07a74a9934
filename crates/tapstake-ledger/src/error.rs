//! Error types for the ledger.

use tapstake_protocol::{Stars, UserId};
use tapstake_store::StorageError;

/// Errors raised by ledger operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// A debit would take the balance below zero.
    #[error("user {user} has {balance} Stars, {required} required")]
    InsufficientFunds {
        user: UserId,
        balance: Stars,
        required: Stars,
    },

    /// Transfer amounts are magnitudes; the kind decides the sign.
    #[error("transfer amount must be positive, got {0}")]
    NonPositiveAmount(Stars),

    #[error("user {0} not found")]
    UnknownUser(UserId),

    /// Withdrawals need a linked wallet to send the Stars to.
    #[error("user {0} has no external wallet")]
    NoExternalWallet(UserId),

    /// The stored balance disagrees with the sum of the user's ledger.
    /// Never expected; indicates a bug or out-of-band write.
    #[error("user {user} balance {stored} does not match ledger sum {computed}")]
    ReconciliationMismatch {
        user: UserId,
        stored: Stars,
        computed: Stars,
    },

    /// The new balance does not fit the amount type.
    #[error("user {user} balance {balance} cannot absorb {amount}")]
    Overflow {
        user: UserId,
        balance: Stars,
        amount: Stars,
    },

    #[error("user {user} has negative balance {balance}")]
    NegativeBalance { user: UserId, balance: Stars },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// `true` if retrying the enclosing operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_transient())
    }
}
