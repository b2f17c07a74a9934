//! Transactions: rows read once, writes staged, flushed on commit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction as SqlTransaction};
use tapstake_protocol::{
    AccessKey, ParticipantId, RoomId, RoomKind, Stars, Transaction, TransactionId, UserId,
};
use tracing::{debug, trace};

use crate::rows::{RoomRow, RoomSummary, UserRow};
use crate::sql::{self, Sequence};
use crate::{StorageError, StorageResult};

/// A loaded row plus its staged (uncommitted) copy.
struct Staged<T> {
    loaded: T,
    staged: Option<T>,
}

impl<T: Clone> Staged<T> {
    fn new(loaded: T) -> Self {
        Self { loaded, staged: None }
    }

    fn get(&self) -> &T {
        self.staged.as_ref().unwrap_or(&self.loaded)
    }

    fn get_mut(&mut self) -> &mut T {
        let loaded = &self.loaded;
        self.staged.get_or_insert_with(|| loaded.clone())
    }

    fn is_dirty(&self) -> bool {
        self.staged.is_some()
    }
}

/// A loaded user row and the ledger entries staged for it.
struct StagedAccount {
    row: Staged<UserRow>,
    appended: Vec<Transaction>,
}

/// A unit of work against the [`Store`](crate::Store).
///
/// The first statement of every `Tx` is a write, so it holds the database
/// write lock from `begin` to the end: a row read through a `Tx` cannot
/// change under it. Writes are staged on a private copy and flushed on
/// [`commit`](Self::commit). Dropping a `Tx` without committing rolls it
/// back.
pub struct Tx {
    conn: SqlTransaction<'static, Sqlite>,
    id: u64,
    rooms: BTreeMap<RoomId, Staged<RoomRow>>,
    new_rooms: BTreeMap<RoomId, RoomRow>,
    users: BTreeMap<UserId, StagedAccount>,
    reserved_keys: Vec<AccessKey>,
}

impl Tx {
    pub(crate) fn new(conn: SqlTransaction<'static, Sqlite>, id: u64) -> Self {
        Self {
            conn,
            id,
            rooms: BTreeMap::new(),
            new_rooms: BTreeMap::new(),
            users: BTreeMap::new(),
            reserved_keys: Vec::new(),
        }
    }

    /// Sequence number of this transaction, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    // -- ids ----------------------------------------------------------------

    pub async fn next_room_id(&mut self) -> StorageResult<RoomId> {
        Ok(RoomId(sql::next_value(&mut self.conn, Sequence::Rooms).await?))
    }

    pub async fn next_participant_id(&mut self) -> StorageResult<ParticipantId> {
        Ok(ParticipantId(
            sql::next_value(&mut self.conn, Sequence::Participants).await?,
        ))
    }

    pub async fn next_transaction_id(&mut self) -> StorageResult<TransactionId> {
        Ok(TransactionId(
            sql::next_value(&mut self.conn, Sequence::Transactions).await?,
        ))
    }

    // -- rooms --------------------------------------------------------------

    /// Loads and returns a room, or `None` if it does not exist.
    pub async fn room(&mut self, id: RoomId) -> StorageResult<Option<&RoomRow>> {
        if self.new_rooms.contains_key(&id) {
            return Ok(self.new_rooms.get(&id));
        }
        if !self.rooms.contains_key(&id) {
            let Some(row) = sql::load_room(&mut self.conn, id).await? else {
                return Ok(None);
            };
            trace!(tx = self.id, room = %id, "room loaded");
            self.rooms.insert(id, Staged::new(row));
        }
        Ok(self.rooms.get(&id).map(Staged::get))
    }

    /// A room this transaction already loaded or inserted.
    pub fn held_room(&self, id: RoomId) -> Option<&RoomRow> {
        self.new_rooms
            .get(&id)
            .or_else(|| self.rooms.get(&id).map(Staged::get))
    }

    /// Mutable access to a room this transaction already loaded or
    /// inserted.
    pub fn room_mut(&mut self, id: RoomId) -> StorageResult<&mut RoomRow> {
        if let Some(row) = self.new_rooms.get_mut(&id) {
            return Ok(row);
        }
        self.rooms
            .get_mut(&id)
            .map(Staged::get_mut)
            .ok_or(StorageError::NotLocked { table: "rooms", id: id.0 })
    }

    /// Stages a brand-new room. It becomes visible to others on commit.
    pub fn insert_room(&mut self, row: RoomRow) {
        self.new_rooms.insert(row.room.id, row);
    }

    /// Claims `key` for a room this transaction is about to insert.
    ///
    /// Fails with [`StorageError::UniqueViolation`] if a committed room or
    /// an earlier claim in this transaction already uses it. The column's
    /// UNIQUE constraint backs the check on commit.
    pub async fn reserve_access_key(
        &mut self,
        key: &AccessKey,
        room: RoomId,
    ) -> StorageResult<()> {
        let taken = self.reserved_keys.contains(key)
            || sql::room_id_for_key(&mut self.conn, key).await?.is_some();
        if taken {
            return Err(StorageError::UniqueViolation {
                constraint: "rooms.access_key",
            });
        }
        trace!(tx = self.id, room = %room, "access key reserved");
        self.reserved_keys.push(key.clone());
        Ok(())
    }

    /// Resolves an access key against committed rooms.
    pub async fn room_id_for_key(&mut self, key: &AccessKey) -> StorageResult<Option<RoomId>> {
        sql::room_id_for_key(&mut self.conn, key).await
    }

    /// Committed Waiting rooms of `kind`, oldest first.
    pub async fn waiting_rooms(
        &mut self,
        kind: RoomKind,
        fee: Option<Stars>,
    ) -> StorageResult<Vec<RoomSummary>> {
        crate::store::waiting_rooms(&mut self.conn, kind, fee).await
    }

    // -- users --------------------------------------------------------------

    /// Stages a zero-balance user and returns its id.
    pub async fn insert_user(
        &mut self,
        has_external_wallet: bool,
        now: DateTime<Utc>,
    ) -> StorageResult<UserId> {
        let id = UserId(sql::next_value(&mut self.conn, Sequence::Users).await?);
        let row = crate::store::new_user(id, has_external_wallet, now);
        sql::insert_user(&mut self.conn, &row).await?;
        self.users.insert(
            id,
            StagedAccount {
                row: Staged::new(row),
                appended: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Loads several user rows. Rows already held are skipped.
    ///
    /// Fails with [`StorageError::RowNotFound`] if any id is unknown.
    pub async fn lock_users(&mut self, ids: &[UserId]) -> StorageResult<()> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        for id in ids {
            if self.users.contains_key(&id) {
                continue;
            }
            let row = sql::load_user(&mut self.conn, id)
                .await?
                .ok_or(StorageError::RowNotFound { table: "users", id: id.0 })?;
            trace!(tx = self.id, user = %id, "user loaded");
            self.users.insert(
                id,
                StagedAccount {
                    row: Staged::new(row),
                    appended: Vec::new(),
                },
            );
        }
        Ok(())
    }

    /// Loads and returns a user row, or `None` if it does not exist.
    pub async fn user(&mut self, id: UserId) -> StorageResult<Option<&UserRow>> {
        match self.lock_users(&[id]).await {
            Ok(()) => {}
            Err(StorageError::RowNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }
        Ok(self.users.get(&id).map(|account| account.row.get()))
    }

    /// Mutable access to a user row this transaction already loaded.
    pub fn user_mut(&mut self, id: UserId) -> StorageResult<&mut UserRow> {
        self.users
            .get_mut(&id)
            .map(|account| account.row.get_mut())
            .ok_or(StorageError::NotLocked { table: "users", id: id.0 })
    }

    /// Stages a ledger entry for a user this transaction already loaded.
    pub fn append_transaction(&mut self, entry: Transaction) -> StorageResult<()> {
        let user = entry.user_id;
        let account = self.users.get_mut(&user).ok_or(StorageError::NotLocked {
            table: "users",
            id: user.0,
        })?;
        account.appended.push(entry);
        Ok(())
    }

    /// Entries this transaction has staged for `user`.
    pub fn staged_transactions(&self, user: UserId) -> &[Transaction] {
        self.users
            .get(&user)
            .map(|a| a.appended.as_slice())
            .unwrap_or(&[])
    }

    // -- end ----------------------------------------------------------------

    /// Returns `true` if no writes have been staged.
    pub fn is_read_only(&self) -> bool {
        self.new_rooms.is_empty()
            && self.rooms.values().all(|r| !r.is_dirty())
            && self
                .users
                .values()
                .all(|u| !u.row.is_dirty() && u.appended.is_empty())
    }

    /// Flushes every staged write and commits.
    ///
    /// New rooms go first so participants and ledger entries can refer to
    /// them.
    pub async fn commit(mut self) -> StorageResult<()> {
        let writes = !self.is_read_only();

        for row in self.new_rooms.values() {
            sql::insert_room(&mut self.conn, &row.room).await?;
            sql::replace_participants(&mut self.conn, row.room.id, &row.participants).await?;
        }
        for staged in self.rooms.values() {
            if let Some(row) = &staged.staged {
                sql::update_room(&mut self.conn, &row.room).await?;
                sql::replace_participants(&mut self.conn, row.room.id, &row.participants).await?;
            }
        }
        for account in self.users.values() {
            if let Some(row) = &account.row.staged {
                sql::update_user(&mut self.conn, row).await?;
            }
            for entry in &account.appended {
                sql::insert_transaction(&mut self.conn, entry).await?;
            }
        }
        self.conn.commit().await?;

        if writes {
            debug!(tx = self.id, "tx committed");
        } else {
            trace!(tx = self.id, "tx committed (read only)");
        }
        Ok(())
    }

    /// Discards every staged write.
    pub async fn rollback(self) -> StorageResult<()> {
        let writes = !self.is_read_only();
        self.conn.rollback().await?;
        if writes {
            debug!(tx = self.id, "tx rolled back");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id)
            .field("rooms", &self.rooms.len())
            .field("new_rooms", &self.new_rooms.len())
            .field("users", &self.users.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use tapstake_protocol::{Participant, Room, RoomStatus, TransactionKind};

    use super::*;
    use crate::{Store, StoreConfig};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    async fn store_with_user() -> (Store, UserId) {
        let store = Store::in_memory().await.unwrap();
        let user = store.insert_user(false, at(0)).await.unwrap();
        (store, user)
    }

    async fn stage_room(tx: &mut Tx, creator: UserId, key: Option<&str>, secs: i64) -> RoomId {
        let id = tx.next_room_id().await.unwrap();
        let key = key.map(|k| AccessKey::parse(k).unwrap());
        let kind = if key.is_some() { RoomKind::Private } else { RoomKind::Public };
        tx.insert_room(RoomRow::new(Room::new(
            id,
            kind,
            Stars::whole(20),
            4,
            creator,
            key,
            at(secs),
        )));
        id
    }

    #[tokio::test]
    async fn test_new_room_invisible_until_commit() {
        let (store, user) = store_with_user().await;
        let mut tx = store.begin().await.unwrap();
        let id = stage_room(&mut tx, user, None, 1).await;
        assert!(tx.held_room(id).is_some());
        tx.commit().await.unwrap();

        let row = store.room(id).await.unwrap().unwrap();
        assert_eq!(row.room.status, RoomStatus::Waiting);
        assert_eq!(row.room.creator_id, user);
    }

    #[tokio::test]
    async fn test_dropped_tx_discards_writes() {
        let (store, user) = store_with_user().await;
        let room = {
            let mut tx = store.begin().await.unwrap();
            tx.lock_users(&[user]).await.unwrap();
            tx.user_mut(user).unwrap().user.balance = Stars::whole(99);
            stage_room(&mut tx, user, None, 1).await
        };

        assert!(store.room(room).await.unwrap().is_none());
        let row = store.user(user).await.unwrap().unwrap();
        assert_eq!(row.user.balance, Stars::ZERO);
    }

    #[tokio::test]
    async fn test_commit_applies_rows_and_ledger() {
        let (store, user) = store_with_user().await;
        let mut tx = store.begin().await.unwrap();
        tx.lock_users(&[user]).await.unwrap();
        tx.user_mut(user).unwrap().user.balance = Stars::whole(100);
        let entry = Transaction {
            id: tx.next_transaction_id().await.unwrap(),
            user_id: user,
            room_id: None,
            amount: Stars::whole(100),
            kind: TransactionKind::Deposit,
            description: "deposit".to_string(),
            created_at: at(5),
        };
        tx.append_transaction(entry.clone()).unwrap();
        assert_eq!(tx.staged_transactions(user), &[entry.clone()]);
        assert!(!tx.is_read_only());
        tx.commit().await.unwrap();

        let account = store.account(user).await.unwrap().unwrap();
        assert_eq!(account.row.user.balance, Stars::whole(100));
        assert_eq!(account.ledger, vec![entry]);
    }

    #[tokio::test]
    async fn test_room_update_replaces_participants() {
        let (store, user) = store_with_user().await;
        let mut tx = store.begin().await.unwrap();
        let id = stage_room(&mut tx, user, None, 1).await;
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.room(id).await.unwrap().is_some());
        let participant = Participant {
            id: tx.next_participant_id().await.unwrap(),
            room_id: id,
            user_id: user,
            joined_at: at(2),
            stake: Stars::whole(20),
        };
        tx.room_mut(id).unwrap().participants.push(participant.clone());
        tx.commit().await.unwrap();

        let row = store.room(id).await.unwrap().unwrap();
        assert_eq!(row.participants, vec![participant]);
        let summary = store.room_summary(id).await.unwrap().unwrap();
        assert_eq!(summary.participant_count, 1);
    }

    #[tokio::test]
    async fn test_write_without_load_rejected() {
        let (store, user) = store_with_user().await;
        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.user_mut(user).unwrap_err(),
            StorageError::NotLocked { table: "users", id: user.0 }
        );
        assert!(matches!(
            tx.room_mut(RoomId(7)),
            Err(StorageError::NotLocked { table: "rooms", id: 7 })
        ));
        assert!(tx.is_read_only());
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (store, user) = store_with_user().await;
        let mut tx = store.begin().await.unwrap();
        let err = tx.lock_users(&[user, UserId(42)]).await.unwrap_err();
        assert_eq!(err, StorageError::RowNotFound { table: "users", id: 42 });
        assert!(tx.user(UserId(43)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_access_key_rejected() {
        let (store, user) = store_with_user().await;
        let key = AccessKey::parse("TAKEN1").unwrap();

        let mut tx = store.begin().await.unwrap();
        let first = stage_room(&mut tx, user, Some("TAKEN1"), 1).await;
        tx.reserve_access_key(&key, first).await.unwrap();
        let err = tx.reserve_access_key(&key, RoomId(99)).await.unwrap_err();
        assert_eq!(err, StorageError::UniqueViolation { constraint: "rooms.access_key" });
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.room_id_for_key(&key).await.unwrap(), Some(first));
        let err = tx.reserve_access_key(&key, RoomId(99)).await.unwrap_err();
        assert_eq!(err, StorageError::UniqueViolation { constraint: "rooms.access_key" });
    }

    #[tokio::test]
    async fn test_unique_column_backs_the_key() {
        let (store, user) = store_with_user().await;
        let mut tx = store.begin().await.unwrap();
        stage_room(&mut tx, user, Some("SAME01"), 1).await;
        tx.commit().await.unwrap();

        // Skips the reservation: the table itself refuses the second key.
        let mut tx = store.begin().await.unwrap();
        stage_room(&mut tx, user, Some("SAME01"), 2).await;
        let err = tx.commit().await.unwrap_err();
        assert_eq!(err, StorageError::UniqueViolation { constraint: "rooms.access_key" });
    }

    #[tokio::test]
    async fn test_second_writer_times_out() {
        let store = Store::open(StoreConfig {
            lock_timeout: Duration::from_millis(50),
            ..StoreConfig::in_memory()
        })
        .await
        .unwrap();

        let held = store.begin().await.unwrap();
        let err = store.begin().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
        drop(held);
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiting_rooms_oldest_first() {
        let (store, user) = store_with_user().await;
        let mut tx = store.begin().await.unwrap();
        let late = stage_room(&mut tx, user, None, 30).await;
        let early = stage_room(&mut tx, user, None, 10).await;
        stage_room(&mut tx, user, Some("PRIV01"), 5).await;
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let ids: Vec<RoomId> = tx
            .waiting_rooms(RoomKind::Public, None)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![early, late]);
        assert!(tx
            .waiting_rooms(RoomKind::Public, Some(Stars::whole(50)))
            .await
            .unwrap()
            .is_empty());
    }
}
