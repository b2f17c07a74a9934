//! Stars ledger for Tapstake.
//!
//! The only code allowed to change a user's balance. Every change is one
//! signed, append-only [`Transaction`](tapstake_protocol::Transaction)
//! written in the same store transaction as the balance update, so
//! `balance == Σ amounts` holds after every commit.
//!
//! [`Ledger::transfer`] works inside a caller's
//! [`Tx`](tapstake_store::Tx): the room engine debits stakes and pays
//! prizes as part of its own units of work, and a failed operation rolls
//! the money back together with the room change.

mod error;
mod ledger;

pub use error::LedgerError;
pub use ledger::{Ledger, Reconciliation, Transfer};
