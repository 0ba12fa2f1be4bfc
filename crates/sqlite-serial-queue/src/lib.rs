//! Serialized single-writer access to SQLite.
//!
//! This crate provides:
//! - [`Database`]: one connection with a statement cache, typed parameter
//!   binding, error tracking, transactions and named savepoints
//! - [`Cursor`]: forward-only access to query results by index or name
//! - [`DatabaseQueue`]: a dedicated worker thread that owns one `Database`
//!   and runs submitted units of work one at a time, in order
//! - Schema helpers, scalar query helpers and WAL checkpoints
//!
//! # Architecture
//!
//! A `Database` is not `Send`. Threads share a database by cloning a
//! `DatabaseQueue` handle and submitting closures to it; each closure gets
//! exclusive use of the connection and the caller blocks until it returns.
//!
//! ```no_run
//! use sqlite_serial_queue::{DatabaseQueue, Params, QueueOptions};
//! use std::path::Path;
//!
//! # fn main() -> sqlite_serial_queue::DbResult<()> {
//! let queue = DatabaseQueue::open(Some(Path::new("people.sqlite")), QueueOptions::default())?;
//! let name = queue.submit(|db| {
//!     db.query_string("SELECT name FROM Persons WHERE id = ?", Params::positional([1]))
//! })?;
//! # let _ = name;
//! # Ok(())
//! # }
//! ```
//!
//! **Important**: cursors stay inside the closure that created them. Copy the
//! values you need before returning.

mod cache;
mod checkpoint;
mod cursor;
mod db;
mod error;
mod executor;
mod options;
mod schema;
mod transaction;
mod value;

#[cfg(test)]
mod tests;

pub use cache::{normalize_sql, StatementCache, StatementEntry, StatementLease};
pub use checkpoint::{CheckpointMode, CheckpointResult};
pub use cursor::{ColumnIndex, Cursor};
pub use db::{Database, InterruptSlot};
pub use error::{DbError, DbResult, LastError};
pub use executor::DatabaseQueue;
pub use options::{
    DatabasePath, DatabaseSettings, QueueOptions, DEFAULT_BUSY_TIMEOUT,
    DEFAULT_STATEMENT_CACHE_CAPACITY,
};
pub use rusqlite::OpenFlags;
pub use transaction::{TransactionKind, TxOutcome};
pub use value::{Params, PatternFormatter, TimestampFormatter, Value};
