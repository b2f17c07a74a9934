//! Error types for the store layer.

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the store regardless of which table is involved.
///
/// Driver errors are flattened to strings so the enum stays `Clone` and
/// comparable; the engine's error types embed it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The database write lock or a pooled connection could not be
    /// acquired within the configured timeout.
    ///
    /// Transient: nothing was committed, so the whole operation can be
    /// retried from scratch.
    #[error("timed out waiting for {resource}")]
    LockTimeout { resource: String },

    /// A unique constraint rejected the write.
    #[error("unique constraint {constraint} violated")]
    UniqueViolation { constraint: &'static str },

    /// A row the transaction needed does not exist.
    #[error("{table} row {id} not found")]
    RowNotFound { table: &'static str, id: u64 },

    /// A write was attempted on a row the transaction never loaded. This
    /// is a bug in the caller, never a user error.
    #[error("{table} row {id} written without being read first")]
    NotLocked { table: &'static str, id: u64 },

    /// A stored value does not decode.
    #[error("corrupt {table} row: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("database error: {0}")]
    Database(String),
}

impl StorageError {
    /// `true` if retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Unique constraints the schema declares, by the column list SQLite
/// names in its error message.
const UNIQUE_CONSTRAINTS: &[(&str, &str)] = &[
    ("rooms.access_key", "rooms.access_key"),
    ("participants.room_id, participants.user_id", "participants.room_user"),
];

/// SQLite primary result codes for a held lock.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::LockTimeout {
                resource: "a database connection".to_string(),
            },
            sqlx::Error::Database(db) => {
                let primary = db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                if matches!(primary, Some(SQLITE_BUSY | SQLITE_LOCKED)) {
                    return Self::LockTimeout {
                        resource: "the database write lock".to_string(),
                    };
                }
                if db.is_unique_violation() {
                    let message = db.message();
                    if let Some(&(_, constraint)) = UNIQUE_CONSTRAINTS
                        .iter()
                        .find(|(columns, _)| message.contains(columns))
                    {
                        return Self::UniqueViolation { constraint };
                    }
                }
                Self::Database(db.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}
