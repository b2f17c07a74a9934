//! The connection pool and its committed read paths.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use tapstake_protocol::{
    AccessKey, RoomId, RoomKind, RoomStatus, Stars, Transaction, User, UserId,
};
use tracing::{debug, info, trace};

use crate::rows::{Account, RoomRow, RoomSummary, UserRow};
use crate::sql::{self, Sequence};
use crate::tx::Tx;
use crate::StorageResult;

/// Where the database lives and how long writers wait for each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// SQLite connection URL, e.g. `sqlite://tapstake.db` or
    /// `sqlite::memory:`.
    pub database_url: String,

    /// Pool size. An in-memory database always uses one connection.
    pub max_connections: u32,

    /// How long a transaction waits for the write lock (or a pooled
    /// connection) before giving up with
    /// [`StorageError::LockTimeout`](crate::StorageError::LockTimeout).
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tapstake.db".to_string(),
            max_connections: 5,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// A private in-memory database, gone when the store is dropped.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::default()
        }
    }

    /// A database file at `path`, created if missing.
    pub fn file(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            database_url: format!("sqlite://{}", path.as_ref().display()),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

/// The shared tables. Clones share the same pool.
///
/// Every [`Tx`] takes the database write lock with its first statement,
/// so units of work run one after another and each sees the previous
/// one's commit. Reads outside a `Tx` see committed data only.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    config: StoreConfig,
}

impl Store {
    /// Connects, creating the database file and any missing tables.
    pub async fn open(config: StoreConfig) -> StorageResult<Self> {
        let in_memory = config.is_in_memory();
        let mut options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.lock_timeout);
        if !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // An in-memory database lives exactly as long as its connection.
        let max_connections = if in_memory { 1 } else { config.max_connections.max(1) };
        let mut pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(config.lock_timeout);
        if in_memory {
            pool = pool.min_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool.connect_with(options).await?;

        crate::schema::migrate(&pool).await?;
        info!(url = %config.database_url, max_connections, "store opened");
        Ok(Self { pool, config })
    }

    /// [`open`](Self::open) on a fresh in-memory database.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::open(StoreConfig::in_memory()).await
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Opens a transaction holding the database write lock.
    pub async fn begin(&self) -> StorageResult<Tx> {
        let mut conn = self.pool.begin().await?;
        let id = sql::next_value(&mut conn, Sequence::Tx).await?;
        trace!(tx = id, "tx begin");
        Ok(Tx::new(conn, id))
    }

    /// Waits for in-flight work and closes every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Creates a user with a zero balance. Committed immediately.
    pub async fn insert_user(
        &self,
        has_external_wallet: bool,
        now: DateTime<Utc>,
    ) -> StorageResult<UserId> {
        let mut tx = self.begin().await?;
        let id = tx.insert_user(has_external_wallet, now).await?;
        tx.commit().await?;
        debug!(user = %id, has_external_wallet, "user inserted");
        Ok(id)
    }

    // -- committed reads ----------------------------------------------------

    /// Waiting rooms of `kind`, oldest first (by creation time, then id).
    /// `fee` narrows to one tier.
    pub async fn waiting_rooms(
        &self,
        kind: RoomKind,
        fee: Option<Stars>,
    ) -> StorageResult<Vec<RoomSummary>> {
        let mut conn = self.pool.acquire().await?;
        waiting_rooms(&mut conn, kind, fee).await
    }

    /// Every committed room currently in `status`, in id order.
    pub async fn rooms_with_status(
        &self,
        status: RoomStatus,
    ) -> StorageResult<Vec<RoomSummary>> {
        let mut conn = self.pool.acquire().await?;
        sql::room_summaries(&mut conn, status, None).await
    }

    pub async fn room_summary(&self, id: RoomId) -> StorageResult<Option<RoomSummary>> {
        let mut conn = self.pool.acquire().await?;
        sql::room_summary(&mut conn, id).await
    }

    /// Resolves an access key through the unique column.
    pub async fn room_id_for_key(&self, key: &AccessKey) -> StorageResult<Option<RoomId>> {
        let mut conn = self.pool.acquire().await?;
        sql::room_id_for_key(&mut conn, key).await
    }

    /// One room with its participants, read in a single snapshot.
    pub async fn room(&self, id: RoomId) -> StorageResult<Option<RoomRow>> {
        let mut read = self.pool.begin().await?;
        let row = sql::load_room(&mut read, id).await?;
        read.commit().await?;
        Ok(row)
    }

    pub async fn user(&self, id: UserId) -> StorageResult<Option<UserRow>> {
        let mut conn = self.pool.acquire().await?;
        sql::load_user(&mut conn, id).await
    }

    /// One user row and its ledger, read in a single snapshot.
    pub async fn account(&self, id: UserId) -> StorageResult<Option<Account>> {
        let mut read = self.pool.begin().await?;
        let Some(row) = sql::load_user(&mut read, id).await? else {
            return Ok(None);
        };
        let ledger = sql::user_transactions(&mut read, id).await?;
        read.commit().await?;
        Ok(Some(Account { row, ledger }))
    }

    /// Every committed ledger entry tied to `room`, across all users.
    pub async fn transactions_for_room(
        &self,
        room: RoomId,
    ) -> StorageResult<Vec<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        sql::room_transactions(&mut conn, room).await
    }

    /// Every user id, ascending.
    pub async fn user_ids(&self) -> StorageResult<Vec<UserId>> {
        let mut conn = self.pool.acquire().await?;
        sql::user_ids(&mut conn).await
    }
}

/// Shared by the pooled read and [`Tx::waiting_rooms`].
pub(crate) async fn waiting_rooms(
    conn: &mut sqlx::SqliteConnection,
    kind: RoomKind,
    fee: Option<Stars>,
) -> StorageResult<Vec<RoomSummary>> {
    let mut rooms: Vec<RoomSummary> =
        sql::room_summaries(conn, RoomStatus::Waiting, Some(kind))
            .await?
            .into_iter()
            .filter(|s| fee.is_none_or(|fee| s.entry_fee == fee))
            .collect();
    rooms.sort_by_key(|s| (s.created_at, s.id));
    Ok(rooms)
}

/// A fresh user row.
pub(crate) fn new_user(id: UserId, has_external_wallet: bool, now: DateTime<Utc>) -> UserRow {
    UserRow::new(User {
        id,
        balance: Stars::ZERO,
        has_external_wallet,
        created_at: now,
    })
}
