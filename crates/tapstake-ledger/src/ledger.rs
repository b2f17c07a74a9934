//! Transfers, account lifecycle, and reconciliation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tapstake_protocol::{
    Clock, RoomId, Stars, Transaction, TransactionKind, UserId,
};
use tapstake_store::{Store, Tx};
use tracing::{debug, error, info, warn};

use crate::LedgerError;

/// One requested balance change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Positive magnitude. Debit kinds are negated when recorded.
    pub amount: Stars,
    pub description: String,
    pub room_id: Option<RoomId>,
}

impl Transfer {
    pub fn new(
        user_id: UserId,
        kind: TransactionKind,
        amount: Stars,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            amount,
            description: description.into(),
            room_id: None,
        }
    }

    /// Ties the entry to a room.
    pub fn for_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }
}

/// Result of checking one account.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub user_id: UserId,
    pub balance: Stars,
    pub ledger_sum: Stars,
    pub entries: usize,
}

/// The Stars ledger.
#[derive(Clone)]
pub struct Ledger {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Opens a zero-balance account.
    pub async fn open_account(&self, has_external_wallet: bool) -> Result<UserId, LedgerError> {
        let user = self.store.insert_user(has_external_wallet, self.now()).await?;
        info!(%user, "account opened");
        Ok(user)
    }

    /// Applies one balance change inside `tx`.
    ///
    /// Loads the user row (if `tx` does not hold it already), rejects a
    /// debit that would leave the balance negative or a credit that does
    /// not fit, then stages the new balance together with its ledger
    /// entry. Nothing is visible until
    /// the caller commits.
    pub async fn transfer(
        &self,
        tx: &mut Tx,
        transfer: Transfer,
    ) -> Result<Transaction, LedgerError> {
        let Transfer {
            user_id,
            kind,
            amount,
            description,
            room_id,
        } = transfer;
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }

        let balance = tx
            .user(user_id)
            .await?
            .ok_or(LedgerError::UnknownUser(user_id))?
            .user
            .balance;
        let signed = if kind.is_debit() { -amount } else { amount };
        let next = balance
            .checked_add(signed)
            .ok_or(LedgerError::Overflow { user: user_id, balance, amount: signed })?;
        if next.is_negative() {
            warn!(user = %user_id, %balance, required = %amount, %kind, "insufficient funds");
            return Err(LedgerError::InsufficientFunds {
                user: user_id,
                balance,
                required: amount,
            });
        }

        let entry = Transaction {
            id: tx.next_transaction_id().await?,
            user_id,
            room_id,
            amount: signed,
            kind,
            description,
            created_at: self.now(),
        };
        tx.user_mut(user_id)?.user.balance = next;
        tx.append_transaction(entry.clone())?;
        debug!(user = %user_id, %kind, amount = %signed, %next, "transfer staged");
        Ok(entry)
    }

    /// Credits Stars bought through the payment sink. Commits on its own.
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Stars,
        description: impl Into<String>,
    ) -> Result<Transaction, LedgerError> {
        let mut tx = self.store.begin().await?;
        let entry = self
            .transfer(
                &mut tx,
                Transfer::new(user_id, TransactionKind::Deposit, amount, description),
            )
            .await?;
        tx.commit().await?;
        info!(user = %user_id, %amount, "deposit recorded");
        Ok(entry)
    }

    /// Debits Stars sent to the user's external wallet. Commits on its own.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Stars,
        description: impl Into<String>,
    ) -> Result<Transaction, LedgerError> {
        let mut tx = self.store.begin().await?;
        let has_wallet = tx
            .user(user_id)
            .await?
            .ok_or(LedgerError::UnknownUser(user_id))?
            .user
            .has_external_wallet;
        if !has_wallet {
            return Err(LedgerError::NoExternalWallet(user_id));
        }
        let entry = self
            .transfer(
                &mut tx,
                Transfer::new(user_id, TransactionKind::Withdrawal, amount, description),
            )
            .await?;
        tx.commit().await?;
        info!(user = %user_id, %amount, "withdrawal recorded");
        Ok(entry)
    }

    /// The committed balance.
    pub async fn balance(&self, user_id: UserId) -> Result<Stars, LedgerError> {
        let row = self
            .store
            .user(user_id)
            .await?
            .ok_or(LedgerError::UnknownUser(user_id))?;
        Ok(row.user.balance)
    }

    /// Committed ledger entries, oldest first.
    pub async fn history(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let account = self
            .store
            .account(user_id)
            .await?
            .ok_or(LedgerError::UnknownUser(user_id))?;
        Ok(account.ledger)
    }

    /// Checks `balance == Σ amounts` and `balance ≥ 0` for one user.
    pub async fn reconcile(
        &self,
        user_id: UserId,
    ) -> Result<Reconciliation, LedgerError> {
        let account = self
            .store
            .account(user_id)
            .await?
            .ok_or(LedgerError::UnknownUser(user_id))?;
        let balance = account.row.user.balance;
        let ledger_sum: Stars = account.ledger.iter().map(|t| t.amount).sum();

        if balance != ledger_sum {
            error!(user = %user_id, %balance, %ledger_sum, "ledger does not reconcile");
            return Err(LedgerError::ReconciliationMismatch {
                user: user_id,
                stored: balance,
                computed: ledger_sum,
            });
        }
        if balance.is_negative() {
            error!(user = %user_id, %balance, "negative balance");
            return Err(LedgerError::NegativeBalance {
                user: user_id,
                balance,
            });
        }
        Ok(Reconciliation {
            user_id,
            balance,
            ledger_sum,
            entries: account.ledger.len(),
        })
    }

    /// Reconciles every account; stops at the first mismatch.
    pub async fn reconcile_all(&self) -> Result<Vec<Reconciliation>, LedgerError> {
        let mut checked = Vec::new();
        for user in self.store.user_ids().await? {
            checked.push(self.reconcile(user).await?);
        }
        Ok(checked)
    }

    /// Sum of every committed balance.
    pub async fn total_balance(&self) -> Result<Stars, LedgerError> {
        let mut total = Stars::ZERO;
        for user in self.store.user_ids().await? {
            let balance = self.balance(user).await?;
            total = total
                .checked_add(balance)
                .ok_or(LedgerError::Overflow { user, balance: total, amount: balance })?;
        }
        Ok(total)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("store", &self.store).finish()
    }
}
