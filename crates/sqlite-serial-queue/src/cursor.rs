//! Forward-only cursor over query results.
//!
//! A cursor owns the engine statement of its query and steps it once per
//! [`Cursor::advance`], so only the current row is held in memory. It borrows
//! the [`Database`] that produced it: the connection cannot be closed or
//! reconfigured while a cursor is alive.
//!
//! ```compile_fail
//! use sqlite_serial_queue::Database;
//!
//! let mut db = Database::open_in_memory().unwrap();
//! let cursor = db.query("SELECT 1", ()).unwrap();
//! db.close().unwrap();
//! drop(cursor);
//! ```
//!
//! The statement's cache lease is held until the cursor is exhausted or
//! closed, so a second query on the same SQL compiles its own statement.

use crate::cache::StatementLease;
use crate::db::{Database, LiveStatement};
use crate::value::{from_unix_seconds, Value};
use crate::{DbError, DbResult};
use chrono::{DateTime, Utc};
use rusqlite::Statement;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    BeforeFirst,
    OnRow,
    Exhausted,
    Closed,
}

/// Something that names a column: a zero-based index or a column name.
pub trait ColumnIndex {
    fn column_position(&self, cursor: &Cursor<'_>) -> DbResult<usize>;
}

impl ColumnIndex for usize {
    fn column_position(&self, cursor: &Cursor<'_>) -> DbResult<usize> {
        if *self < cursor.columns.len() {
            Ok(*self)
        } else {
            Err(DbError::ColumnOutOfRange(*self))
        }
    }
}

impl ColumnIndex for &str {
    fn column_position(&self, cursor: &Cursor<'_>) -> DbResult<usize> {
        cursor.column_index(self)
    }
}

/// Result rows of one query.
pub struct Cursor<'db> {
    db: &'db Database,
    id: u64,
    sql: String,
    stmt: Option<LiveStatement<'db>>,
    lease: Option<StatementLease>,
    columns: Vec<String>,
    column_map: HashMap<String, usize>,
    current: Option<Vec<Value>>,
    state: CursorState,
}

impl<'db> Cursor<'db> {
    pub(crate) fn new(
        db: &'db Database,
        id: u64,
        sql: String,
        stmt: LiveStatement<'db>,
        lease: Option<StatementLease>,
    ) -> Self {
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut column_map = HashMap::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            column_map.entry(name.to_lowercase()).or_insert(idx);
        }
        Self {
            db,
            id,
            sql,
            stmt: Some(stmt),
            lease,
            columns,
            column_map,
            current: None,
            state: CursorState::BeforeFirst,
        }
    }

    /// Step to the next row. Returns `false` at the end of the results, after
    /// which the cursor is exhausted and has no current row.
    ///
    /// An engine error while stepping also exhausts the cursor and is recorded
    /// as the connection's last error.
    pub fn advance(&mut self) -> DbResult<bool> {
        self.check_live()?;
        let Some(stmt) = self.stmt.as_mut() else {
            return Ok(false);
        };
        match step(stmt, self.columns.len()) {
            Ok(Some(row)) => {
                self.current = Some(row);
                self.state = CursorState::OnRow;
                Ok(true)
            }
            Ok(None) => {
                self.finish(CursorState::Exhausted);
                Ok(false)
            }
            Err(err) => {
                self.db.record_error("step", &err);
                self.finish(CursorState::Exhausted);
                Err(err)
            }
        }
    }

    /// True while positioned on a row.
    pub fn has_another_row(&self) -> bool {
        self.state == CursorState::OnRow && self.check_live().is_ok()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> DbResult<usize> {
        self.column_map
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| DbError::UnknownColumn(name.to_string()))
    }

    pub fn column_name(&self, index: usize) -> DbResult<&str> {
        self.columns
            .get(index)
            .map(String::as_str)
            .ok_or(DbError::ColumnOutOfRange(index))
    }

    /// Raw value of a column on the current row.
    pub fn value<I: ColumnIndex>(&self, column: I) -> DbResult<&Value> {
        self.check_live()?;
        let position = column.column_position(self)?;
        let row = self.current.as_ref().ok_or(DbError::NoCurrentRow)?;
        row.get(position).ok_or(DbError::ColumnOutOfRange(position))
    }

    pub fn is_null<I: ColumnIndex>(&self, column: I) -> DbResult<bool> {
        Ok(self.value(column)?.is_null())
    }

    pub fn i64<I: ColumnIndex>(&self, column: I) -> DbResult<i64> {
        Ok(self.value(column)?.as_i64())
    }

    /// 32-bit view, truncating like the engine's `column_int`.
    pub fn int<I: ColumnIndex>(&self, column: I) -> DbResult<i32> {
        Ok(self.value(column)?.as_i64() as i32)
    }

    pub fn f64<I: ColumnIndex>(&self, column: I) -> DbResult<f64> {
        Ok(self.value(column)?.as_f64())
    }

    pub fn bool<I: ColumnIndex>(&self, column: I) -> DbResult<bool> {
        Ok(self.value(column)?.as_i64() != 0)
    }

    pub fn string<I: ColumnIndex>(&self, column: I) -> DbResult<Option<String>> {
        Ok(self.value(column)?.as_text())
    }

    pub fn blob<I: ColumnIndex>(&self, column: I) -> DbResult<Option<Vec<u8>>> {
        Ok(self.value(column)?.as_blob())
    }

    /// Timestamp stored either as formatter text or as Unix seconds.
    pub fn timestamp<I: ColumnIndex>(&self, column: I) -> DbResult<Option<DateTime<Utc>>> {
        let value = self.value(column)?;
        Ok(match (value, self.db.timestamp_formatter()) {
            (Value::Null, _) => None,
            (Value::Text(text), Some(formatter)) => formatter.parse(text),
            (other, _) => from_unix_seconds(other.as_f64()),
        })
    }

    /// Current row keyed by column name.
    pub fn row_dictionary(&self) -> DbResult<BTreeMap<String, Value>> {
        self.check_live()?;
        let row = self.current.as_ref().ok_or(DbError::NoCurrentRow)?;
        Ok(self
            .columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect())
    }

    /// SQL text that produced this cursor.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// True after `close`.
    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    /// Reset the statement and hand it back to the cache. Safe to call
    /// repeatedly.
    pub fn close(&mut self) {
        if self.state != CursorState::Closed {
            self.finish(CursorState::Closed);
        }
    }

    fn finish(&mut self, state: CursorState) {
        self.state = state;
        self.current = None;
        if let Some(mut stmt) = self.stmt.take() {
            // Returned statements keep their step position unless reset.
            drop(stmt.raw_query());
            drop(stmt);
            self.db.unregister_cursor(self.id);
            self.db.release_lease(self.lease.take());
        }
    }

    fn check_live(&self) -> DbResult<()> {
        match self.state {
            CursorState::Closed => Err(DbError::CursorClosed),
            _ => Ok(()),
        }
    }
}

/// Step `stmt` once and copy out the row it lands on.
///
/// A `Rows` resets its statement when dropped, so it is forgotten while the
/// statement is positioned on a row.
fn step(stmt: &mut Statement<'_>, width: usize) -> DbResult<Option<Vec<Value>>> {
    let mut rows = stmt.raw_query();
    let values = match rows.next()? {
        Some(row) => {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(Value::from(row.get_ref(idx)?));
            }
            values
        }
        None => return Ok(None),
    };
    std::mem::forget(rows);
    Ok(Some(values))
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("columns", &self.columns)
            .field("state", &self.state)
            .finish()
    }
}
