//! Queries and row decoding shared by [`Store`](crate::Store) reads and
//! [`Tx`](crate::Tx).
//!
//! Everything here runs on a borrowed connection, so the same function
//! serves a pooled read and a statement inside an open transaction.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tapstake_protocol::{
    AccessKey, Participant, ParticipantId, Room, RoomId, RoomKind, RoomStatus,
    Settlement, Transaction, TransactionId, User, UserId,
};

use crate::rows::{RoomRow, RoomSummary, UserRow};
use crate::{StorageError, StorageResult};

/// Named counters in the `sequences` table.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Sequence {
    Tx,
    Users,
    Rooms,
    Participants,
    Transactions,
}

impl Sequence {
    fn name(self) -> &'static str {
        match self {
            Self::Tx => "tx",
            Self::Users => "users",
            Self::Rooms => "rooms",
            Self::Participants => "participants",
            Self::Transactions => "transactions",
        }
    }
}

/// Takes the next value of `sequence`. This is a write, so inside a
/// transaction it also takes the database write lock.
pub(crate) async fn next_value(
    conn: &mut SqliteConnection,
    sequence: Sequence,
) -> StorageResult<u64> {
    let value: i64 = sqlx::query_scalar(
        "UPDATE sequences SET next_value = next_value + 1
         WHERE name = ? RETURNING next_value - 1",
    )
    .bind(sequence.name())
    .fetch_one(&mut *conn)
    .await?;
    Ok(from_db(value))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub(crate) async fn load_user(
    conn: &mut SqliteConnection,
    id: UserId,
) -> StorageResult<Option<UserRow>> {
    let row = sqlx::query(
        "SELECT id, balance, has_external_wallet, created_at,
                open_public_room, organizing_room
         FROM users WHERE id = ?",
    )
    .bind(to_db(id.0))
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(decode_user).transpose()
}

pub(crate) async fn insert_user(
    conn: &mut SqliteConnection,
    row: &UserRow,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO users (id, balance, has_external_wallet, created_at,
                            open_public_room, organizing_room)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(to_db(row.user.id.0))
    .bind(row.user.balance.to_string())
    .bind(row.user.has_external_wallet)
    .bind(row.user.created_at)
    .bind(row.open_public_room.map(|id| to_db(id.0)))
    .bind(row.organizing_room.map(|id| to_db(id.0)))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn update_user(
    conn: &mut SqliteConnection,
    row: &UserRow,
) -> StorageResult<()> {
    sqlx::query(
        "UPDATE users SET balance = ?, open_public_room = ?, organizing_room = ?
         WHERE id = ?",
    )
    .bind(row.user.balance.to_string())
    .bind(row.open_public_room.map(|id| to_db(id.0)))
    .bind(row.organizing_room.map(|id| to_db(id.0)))
    .bind(to_db(row.user.id.0))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn user_ids(conn: &mut SqliteConnection) -> StorageResult<Vec<UserId>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM users ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids.into_iter().map(|id| UserId(from_db(id))).collect())
}

fn decode_user(row: &SqliteRow) -> StorageResult<UserRow> {
    Ok(UserRow {
        user: User {
            id: UserId(from_db(row.try_get("id")?)),
            balance: parse(row, "users", "balance")?,
            has_external_wallet: row.try_get("has_external_wallet")?,
            created_at: row.try_get("created_at")?,
        },
        open_public_room: optional_id(row, "open_public_room")?.map(RoomId),
        organizing_room: optional_id(row, "organizing_room")?.map(RoomId),
    })
}

// ---------------------------------------------------------------------------
// Ledger entries
// ---------------------------------------------------------------------------

const TRANSACTION_COLUMNS: &str =
    "id, user_id, room_id, amount, kind, description, created_at";

pub(crate) async fn insert_transaction(
    conn: &mut SqliteConnection,
    entry: &Transaction,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO transactions (id, user_id, room_id, amount, kind,
                                   description, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(to_db(entry.id.0))
    .bind(to_db(entry.user_id.0))
    .bind(entry.room_id.map(|id| to_db(id.0)))
    .bind(entry.amount.to_string())
    .bind(entry.kind.as_str())
    .bind(entry.description.as_str())
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn user_transactions(
    conn: &mut SqliteConnection,
    user: UserId,
) -> StorageResult<Vec<Transaction>> {
    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ? ORDER BY id"
    );
    let rows = sqlx::query(&sql)
        .bind(to_db(user.0))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(decode_transaction).collect()
}

pub(crate) async fn room_transactions(
    conn: &mut SqliteConnection,
    room: RoomId,
) -> StorageResult<Vec<Transaction>> {
    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE room_id = ? ORDER BY id"
    );
    let rows = sqlx::query(&sql)
        .bind(to_db(room.0))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(decode_transaction).collect()
}

fn decode_transaction(row: &SqliteRow) -> StorageResult<Transaction> {
    Ok(Transaction {
        id: TransactionId(from_db(row.try_get("id")?)),
        user_id: UserId(from_db(row.try_get("user_id")?)),
        room_id: optional_id(row, "room_id")?.map(RoomId),
        amount: parse(row, "transactions", "amount")?,
        kind: parse(row, "transactions", "kind")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// Rooms and participants
// ---------------------------------------------------------------------------

pub(crate) async fn load_room(
    conn: &mut SqliteConnection,
    id: RoomId,
) -> StorageResult<Option<RoomRow>> {
    let row = sqlx::query(
        "SELECT id, kind, entry_fee, capacity, status, creator_id, access_key,
                created_at, preparation_started_at, active_started_at,
                finished_at, winner_id, settlement
         FROM rooms WHERE id = ?",
    )
    .bind(to_db(id.0))
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let room = decode_room(&row)?;
    let participants = load_participants(conn, id).await?;
    Ok(Some(RoomRow { room, participants }))
}

pub(crate) async fn insert_room(
    conn: &mut SqliteConnection,
    room: &Room,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO rooms (id, kind, entry_fee, capacity, status, creator_id,
                            access_key, created_at, preparation_started_at,
                            active_started_at, finished_at, winner_id, settlement)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(to_db(room.id.0))
    .bind(room.kind.as_str())
    .bind(room.entry_fee.to_string())
    .bind(to_db(room.capacity as u64))
    .bind(room.status.as_str())
    .bind(to_db(room.creator_id.0))
    .bind(room.access_key.as_ref().map(|key| key.as_str().to_string()))
    .bind(room.created_at)
    .bind(room.preparation_started_at)
    .bind(room.active_started_at)
    .bind(room.finished_at)
    .bind(room.winner_id.map(|id| to_db(id.0)))
    .bind(encode_settlement(room.settlement.as_ref())?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Writes every mutable room column. Kind, fee, capacity, creator and key
/// never change after insert.
pub(crate) async fn update_room(
    conn: &mut SqliteConnection,
    room: &Room,
) -> StorageResult<()> {
    sqlx::query(
        "UPDATE rooms SET status = ?, preparation_started_at = ?,
                          active_started_at = ?, finished_at = ?,
                          winner_id = ?, settlement = ?
         WHERE id = ?",
    )
    .bind(room.status.as_str())
    .bind(room.preparation_started_at)
    .bind(room.active_started_at)
    .bind(room.finished_at)
    .bind(room.winner_id.map(|id| to_db(id.0)))
    .bind(encode_settlement(room.settlement.as_ref())?)
    .bind(to_db(room.id.0))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Makes the stored participant set of `room` equal to `participants`.
pub(crate) async fn replace_participants(
    conn: &mut SqliteConnection,
    room: RoomId,
    participants: &[Participant],
) -> StorageResult<()> {
    sqlx::query("DELETE FROM participants WHERE room_id = ?")
        .bind(to_db(room.0))
        .execute(&mut *conn)
        .await?;
    for participant in participants {
        sqlx::query(
            "INSERT INTO participants (id, room_id, user_id, joined_at, stake)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(to_db(participant.id.0))
        .bind(to_db(participant.room_id.0))
        .bind(to_db(participant.user_id.0))
        .bind(participant.joined_at)
        .bind(participant.stake.to_string())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn load_participants(
    conn: &mut SqliteConnection,
    room: RoomId,
) -> StorageResult<Vec<Participant>> {
    let rows = sqlx::query(
        "SELECT id, room_id, user_id, joined_at, stake
         FROM participants WHERE room_id = ? ORDER BY id",
    )
    .bind(to_db(room.0))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| -> StorageResult<Participant> {
            Ok(Participant {
                id: ParticipantId(from_db(row.try_get("id")?)),
                room_id: RoomId(from_db(row.try_get("room_id")?)),
                user_id: UserId(from_db(row.try_get("user_id")?)),
                joined_at: row.try_get("joined_at")?,
                stake: parse(row, "participants", "stake")?,
            })
        })
        .collect()
}

pub(crate) async fn room_id_for_key(
    conn: &mut SqliteConnection,
    key: &AccessKey,
) -> StorageResult<Option<RoomId>> {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM rooms WHERE access_key = ?")
        .bind(key.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id.map(|id| RoomId(from_db(id))))
}

/// Summaries of every room in `status`, optionally of one kind, in id
/// order.
pub(crate) async fn room_summaries(
    conn: &mut SqliteConnection,
    status: RoomStatus,
    kind: Option<RoomKind>,
) -> StorageResult<Vec<RoomSummary>> {
    let rows = sqlx::query(
        "SELECT r.id, r.kind, r.entry_fee, r.capacity, r.status, r.creator_id,
                r.created_at, r.preparation_started_at,
                (SELECT COUNT(*) FROM participants p WHERE p.room_id = r.id)
                    AS participant_count
         FROM rooms r
         WHERE r.status = ? AND (? IS NULL OR r.kind = ?)
         ORDER BY r.id",
    )
    .bind(status.as_str())
    .bind(kind.map(RoomKind::as_str))
    .bind(kind.map(RoomKind::as_str))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(decode_summary).collect()
}

pub(crate) async fn room_summary(
    conn: &mut SqliteConnection,
    id: RoomId,
) -> StorageResult<Option<RoomSummary>> {
    let row = sqlx::query(
        "SELECT r.id, r.kind, r.entry_fee, r.capacity, r.status, r.creator_id,
                r.created_at, r.preparation_started_at,
                (SELECT COUNT(*) FROM participants p WHERE p.room_id = r.id)
                    AS participant_count
         FROM rooms r WHERE r.id = ?",
    )
    .bind(to_db(id.0))
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(decode_summary).transpose()
}

fn decode_room(row: &SqliteRow) -> StorageResult<Room> {
    let access_key: Option<String> = row.try_get("access_key")?;
    let settlement: Option<String> = row.try_get("settlement")?;
    Ok(Room {
        id: RoomId(from_db(row.try_get("id")?)),
        kind: parse(row, "rooms", "kind")?,
        entry_fee: parse(row, "rooms", "entry_fee")?,
        capacity: from_db(row.try_get("capacity")?) as usize,
        status: parse(row, "rooms", "status")?,
        creator_id: UserId(from_db(row.try_get("creator_id")?)),
        access_key: access_key
            .map(|key| AccessKey::parse(&key).map_err(|e| corrupt("rooms", e)))
            .transpose()?,
        created_at: row.try_get("created_at")?,
        preparation_started_at: row.try_get("preparation_started_at")?,
        active_started_at: row.try_get("active_started_at")?,
        finished_at: row.try_get("finished_at")?,
        winner_id: optional_id(row, "winner_id")?.map(UserId),
        settlement: settlement
            .map(|json| serde_json::from_str::<Settlement>(&json).map_err(|e| corrupt("rooms", e)))
            .transpose()?,
    })
}

fn decode_summary(row: &SqliteRow) -> StorageResult<RoomSummary> {
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(RoomSummary {
        id: RoomId(from_db(row.try_get("id")?)),
        kind: parse(row, "rooms", "kind")?,
        entry_fee: parse(row, "rooms", "entry_fee")?,
        capacity: from_db(row.try_get("capacity")?) as usize,
        status: parse(row, "rooms", "status")?,
        creator_id: UserId(from_db(row.try_get("creator_id")?)),
        created_at,
        preparation_started_at: row.try_get("preparation_started_at")?,
        participant_count: from_db(row.try_get("participant_count")?) as usize,
    })
}

fn encode_settlement(settlement: Option<&Settlement>) -> StorageResult<Option<String>> {
    settlement
        .map(|s| serde_json::to_string(s).map_err(|e| corrupt("rooms", e)))
        .transpose()
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// SQLite integers are signed 64-bit; ids and counts never reach 2^63.
fn to_db(value: u64) -> i64 {
    value as i64
}

fn from_db(value: i64) -> u64 {
    value as u64
}

fn optional_id(row: &SqliteRow, column: &str) -> StorageResult<Option<u64>> {
    let value: Option<i64> = row.try_get(column)?;
    Ok(value.map(from_db))
}

/// Reads a text column through the type's `FromStr`.
fn parse<T>(row: &SqliteRow, table: &'static str, column: &str) -> StorageResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| StorageError::Corrupt {
        table,
        detail: format!("{column} {raw:?}: {e}"),
    })
}

fn corrupt(table: &'static str, err: impl Display) -> StorageError {
    StorageError::Corrupt {
        table,
        detail: err.to_string(),
    }
}
