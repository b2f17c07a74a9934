//! Table definitions, applied on every open.
//!
//! Amounts are stored as decimal text with two places, timestamps as
//! RFC 3339 text and enums by name.

use sqlx::SqlitePool;
use tracing::debug;

use crate::StorageResult;

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sequences (
        name        TEXT PRIMARY KEY,
        next_value  INTEGER NOT NULL
    )",
    "INSERT OR IGNORE INTO sequences (name, next_value) VALUES
        ('tx', 1), ('users', 1), ('rooms', 1), ('participants', 1), ('transactions', 1)",
    "CREATE TABLE IF NOT EXISTS users (
        id                   INTEGER PRIMARY KEY,
        balance              TEXT    NOT NULL,
        has_external_wallet  INTEGER NOT NULL,
        created_at           TEXT    NOT NULL,
        open_public_room     INTEGER,
        organizing_room      INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS rooms (
        id                      INTEGER PRIMARY KEY,
        kind                    TEXT    NOT NULL,
        entry_fee               TEXT    NOT NULL,
        capacity                INTEGER NOT NULL,
        status                  TEXT    NOT NULL,
        creator_id              INTEGER NOT NULL REFERENCES users (id),
        access_key              TEXT    UNIQUE,
        created_at              TEXT    NOT NULL,
        preparation_started_at  TEXT,
        active_started_at       TEXT,
        finished_at             TEXT,
        winner_id               INTEGER REFERENCES users (id),
        settlement              TEXT
    )",
    "CREATE INDEX IF NOT EXISTS rooms_by_status ON rooms (status, kind)",
    "CREATE TABLE IF NOT EXISTS participants (
        id         INTEGER PRIMARY KEY,
        room_id    INTEGER NOT NULL REFERENCES rooms (id),
        user_id    INTEGER NOT NULL REFERENCES users (id),
        joined_at  TEXT    NOT NULL,
        stake      TEXT    NOT NULL,
        UNIQUE (room_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id           INTEGER PRIMARY KEY,
        user_id      INTEGER NOT NULL REFERENCES users (id),
        room_id      INTEGER REFERENCES rooms (id),
        amount       TEXT    NOT NULL,
        kind         TEXT    NOT NULL,
        description  TEXT    NOT NULL,
        created_at   TEXT    NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS transactions_by_user ON transactions (user_id, id)",
    "CREATE INDEX IF NOT EXISTS transactions_by_room ON transactions (room_id)",
];

/// Creates any missing table or index. Safe to run on every start.
pub(crate) async fn migrate(pool: &SqlitePool) -> StorageResult<()> {
    let mut tx = pool.begin().await?;
    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    debug!(statements = STATEMENTS.len(), "schema applied");
    Ok(())
}
