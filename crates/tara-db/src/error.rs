use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("no database connection string configured (set TARA_DATABASE_URL)")]
    MissingConnectionString,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("parent message {0} is not a top-level message of this chat")]
    InvalidParent(String),

    #[error("database lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("blocking task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Map a UNIQUE / PRIMARY KEY violation to `Conflict`, pass anything else through.
    pub(crate) fn from_insert(err: rusqlite::Error, what: &str) -> Self {
        let duplicate = matches!(
            &err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        );
        if duplicate {
            DbError::Conflict(format!("{what} already exists"))
        } else {
            DbError::Sqlite(err)
        }
    }
}
