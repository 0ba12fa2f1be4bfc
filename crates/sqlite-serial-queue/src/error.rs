//! Database error types.

use rusqlite::ffi;
use thiserror::Error;

/// Database error type.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Operation attempted on a closed connection
    #[error("Database is not open")]
    NotOpen,

    /// Bound parameter count does not match the statement
    #[error("Parameter count mismatch: statement expects {expected}, got {actual}")]
    ParameterCount { expected: usize, actual: usize },

    /// Named parameter not present in the statement
    #[error("Unknown named parameter: {0}")]
    UnknownParameter(String),

    /// Column index past the end of the row
    #[error("Column index out of range: {0}")]
    ColumnOutOfRange(usize),

    /// Column name not present in the result set
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// Cursor read before the first advance or after exhaustion
    #[error("Cursor has no current row")]
    NoCurrentRow,

    /// Cursor used after close
    #[error("Cursor is closed")]
    CursorClosed,

    /// Savepoint name already on the active stack
    #[error("Savepoint already active: {0}")]
    DuplicateSavepoint(String),

    /// Savepoint name not on the active stack
    #[error("No active savepoint named {0}")]
    UnknownSavepoint(String),

    /// Checkpoint blocked by readers or writers
    #[error("Checkpoint blocked: {checkpointed_frames} of {log_frames} log frames checkpointed")]
    CheckpointBusy {
        log_frames: i32,
        checkpointed_frames: i32,
    },

    /// Row callback asked to stop a multi-statement execution
    #[error("Statement execution aborted by callback")]
    Aborted,

    /// Unit of work submitted to its own queue
    #[error("Reentrant submission: a unit of work cannot submit to the queue running it")]
    Reentrant,

    /// Queue worker has shut down
    #[error("Database queue is closed")]
    QueueClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Primary SQLite result code for this error.
    pub fn code(&self) -> i32 {
        self.extended_code() & 0xff
    }

    /// Extended SQLite result code for this error.
    ///
    /// Errors raised by this crate rather than the engine are mapped onto the
    /// closest engine code.
    pub fn extended_code(&self) -> i32 {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => err.extended_code,
            DbError::Sqlite(
                rusqlite::Error::InvalidParameterCount(..)
                | rusqlite::Error::InvalidParameterName(_)
                | rusqlite::Error::InvalidColumnIndex(_)
                | rusqlite::Error::InvalidColumnName(_),
            ) => ffi::SQLITE_RANGE,
            DbError::Sqlite(_) => ffi::SQLITE_ERROR,
            DbError::ParameterCount { .. }
            | DbError::UnknownParameter(_)
            | DbError::ColumnOutOfRange(_)
            | DbError::UnknownColumn(_) => ffi::SQLITE_RANGE,
            DbError::NotOpen
            | DbError::NoCurrentRow
            | DbError::CursorClosed
            | DbError::DuplicateSavepoint(_)
            | DbError::UnknownSavepoint(_)
            | DbError::Reentrant
            | DbError::QueueClosed => ffi::SQLITE_MISUSE,
            DbError::CheckpointBusy { .. } => ffi::SQLITE_BUSY,
            DbError::Aborted => ffi::SQLITE_ABORT,
            DbError::Io(_) => ffi::SQLITE_CANTOPEN,
        }
    }

    /// Human-readable message, preferring the engine's own text.
    pub fn message(&self) -> String {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, Some(msg))) => {
                format!("{msg} ({err})")
            }
            other => other.to_string(),
        }
    }

    /// True when the statement was cancelled through an interrupt request.
    pub fn is_interrupted(&self) -> bool {
        self.code() == ffi::SQLITE_INTERRUPT
    }

    /// True for UNIQUE / NOT NULL / CHECK / FOREIGN KEY violations.
    pub fn is_constraint_violation(&self) -> bool {
        self.code() == ffi::SQLITE_CONSTRAINT
    }

    /// True when the engine gave up waiting on a lock.
    pub fn is_busy(&self) -> bool {
        matches!(self.code(), ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED)
    }
}

/// Snapshot of the most recent failure on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: i32,
    pub extended_code: i32,
    pub message: String,
}

impl From<&DbError> for LastError {
    fn from(err: &DbError) -> Self {
        Self {
            code: err.code(),
            extended_code: err.extended_code(),
            message: err.message(),
        }
    }
}

/// Result type alias using DbError.
pub type DbResult<T> = Result<T, DbError>;
