//! Database connection and statement execution.

use crate::cache::{normalize_sql, StatementCache, StatementLease};
use crate::cursor::Cursor;
use crate::options::{DatabasePath, DatabaseSettings};
use crate::value::{Params, TimestampFormatter, Value};
use crate::{DbError, DbResult, LastError};
use rusqlite::{CachedStatement, Connection, InterruptHandle, OpenFlags, Statement};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A prepared statement, either checked out of the connection's LRU or
/// compiled for one use.
pub(crate) enum LiveStatement<'conn> {
    Cached(CachedStatement<'conn>),
    Uncached(Statement<'conn>),
}

impl<'conn> Deref for LiveStatement<'conn> {
    type Target = Statement<'conn>;

    fn deref(&self) -> &Statement<'conn> {
        match self {
            LiveStatement::Cached(stmt) => &**stmt,
            LiveStatement::Uncached(stmt) => stmt,
        }
    }
}

impl DerefMut for LiveStatement<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            LiveStatement::Cached(stmt) => &mut **stmt,
            LiveStatement::Uncached(stmt) => stmt,
        }
    }
}

/// Thread-safe handle for cancelling the statement running on a connection.
///
/// Cloned out of the connection so another thread can interrupt work while
/// the owning thread is blocked inside the engine.
#[derive(Clone, Default)]
pub struct InterruptSlot(Arc<Mutex<Option<InterruptHandle>>>);

impl InterruptSlot {
    pub(crate) fn set(&self, handle: InterruptHandle) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn clear(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Ask the running statement to stop. Returns false when no connection is
    /// open.
    pub fn interrupt(&self) -> bool {
        match self.0.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(handle) => {
                handle.interrupt();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for InterruptSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let armed = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("InterruptSlot").field("armed", &armed).finish()
    }
}

/// One SQLite connection plus its statement cache, cursor registry and
/// savepoint stack.
///
/// Not `Send`: a `Database` lives on one thread for its whole life. Share it
/// across threads through a [`DatabaseQueue`](crate::DatabaseQueue).
///
/// Statement execution takes `&self`, so any number of cursors can be open
/// while further statements run. Opening, closing and changing settings take
/// `&mut self` and therefore cannot happen while a cursor borrows the
/// connection.
pub struct Database {
    pub(crate) path: DatabasePath,
    pub(crate) settings: DatabaseSettings,
    pub(crate) flags: OpenFlags,
    pub(crate) vfs: Option<String>,
    pub(crate) conn: Option<Connection>,
    pub(crate) cache: RefCell<StatementCache>,
    /// Open cursors by id, with the SQL they were created from.
    pub(crate) cursors: RefCell<HashMap<u64, String>>,
    next_cursor_id: Cell<u64>,
    pub(crate) last_error: RefCell<Option<LastError>>,
    pub(crate) savepoints: RefCell<Vec<String>>,
    pub(crate) savepoint_counter: Cell<u64>,
    pub(crate) formatter: Option<Box<dyn TimestampFormatter>>,
    pub(crate) interrupt: InterruptSlot,
}

impl Database {
    /// Create a closed connection for `path`.
    pub fn new(path: impl Into<DatabasePath>, settings: DatabaseSettings) -> Self {
        let cache = StatementCache::with_capacity(settings.statement_cache_capacity);
        Self {
            path: path.into(),
            settings,
            flags: OpenFlags::default(),
            vfs: None,
            conn: None,
            cache: RefCell::new(cache),
            cursors: RefCell::default(),
            next_cursor_id: Cell::new(0),
            last_error: RefCell::new(None),
            savepoints: RefCell::default(),
            savepoint_counter: Cell::new(0),
            formatter: None,
            interrupt: InterruptSlot::default(),
        }
    }

    /// Open an in-memory database with default settings.
    pub fn open_in_memory() -> DbResult<Self> {
        let mut db = Self::new(DatabasePath::Memory, DatabaseSettings::default());
        db.open()?;
        Ok(db)
    }

    /// Open with read-write-create flags and the default VFS.
    pub fn open(&mut self) -> DbResult<()> {
        self.open_with_flags(OpenFlags::default(), None)
    }

    /// Open with explicit flags and an optional VFS name.
    ///
    /// Opening an already open connection is a no-op.
    pub fn open_with_flags(&mut self, flags: OpenFlags, vfs: Option<&str>) -> DbResult<()> {
        if self.conn.is_some() {
            debug!(path = %self.path, "Database already open");
            return Ok(());
        }
        self.flags = flags;
        self.vfs = vfs.map(str::to_string);
        let conn = self.tracked("open", |db| {
            let conn = db.connect()?;
            conn.busy_timeout(db.settings.busy_timeout)?;
            conn.set_prepared_statement_cache_capacity(db.settings.statement_cache_capacity);
            Ok(conn)
        })?;
        self.interrupt.set(conn.get_interrupt_handle());
        self.conn = Some(conn);
        info!(path = %self.path, "Opened database");
        Ok(())
    }

    fn connect(&self) -> DbResult<Connection> {
        if let DatabasePath::File(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        let flags = self.flags;
        let conn = match (&self.path, self.vfs.as_deref()) {
            (DatabasePath::Memory, None) => Connection::open_in_memory_with_flags(flags)?,
            (DatabasePath::Memory, Some(vfs)) => {
                Connection::open_in_memory_with_flags_and_vfs(flags, vfs)?
            }
            (path, None) => Connection::open_with_flags(path.engine_path(), flags)?,
            (path, Some(vfs)) => {
                Connection::open_with_flags_and_vfs(path.engine_path(), flags, vfs)?
            }
        };
        Ok(conn)
    }

    /// Reopen with the flags and VFS of the last open, if currently closed.
    pub fn ensure_open(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let vfs = self.vfs.clone();
        self.open_with_flags(self.flags, vfs.as_deref())
    }

    /// Close the connection.
    ///
    /// The statement cache is emptied first. When the engine refuses to close
    /// (a statement is still alive), the connection stays open with its
    /// savepoints and cursor registry untouched and the error is returned.
    /// Closing a closed connection is a no-op.
    pub fn close(&mut self) -> DbResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.clear_error();
        self.cache.get_mut().clear();
        match conn.close() {
            Ok(()) => {
                self.interrupt.clear();
                self.savepoints.get_mut().clear();
                self.close_open_cursors();
                info!(path = %self.path, "Closed database");
                Ok(())
            }
            Err((conn, err)) => {
                self.conn = Some(conn);
                let err = DbError::from(err);
                self.record_error("close", &err);
                Err(err)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    /// Flags used by the most recent open.
    pub fn open_flags(&self) -> OpenFlags {
        self.flags
    }

    /// VFS used by the most recent open.
    pub fn vfs(&self) -> Option<&str> {
        self.vfs.as_deref()
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// Underlying engine connection, for work the typed API does not cover.
    pub fn connection(&self) -> DbResult<&Connection> {
        self.conn.as_ref().ok_or(DbError::NotOpen)
    }

    /// Handle that can interrupt this connection from another thread.
    pub fn interrupt_slot(&self) -> InterruptSlot {
        self.interrupt.clone()
    }

    /// Ask the running statement to stop with `SQLITE_INTERRUPT`.
    ///
    /// Returns `false` when the connection is closed.
    pub fn interrupt(&self) -> bool {
        self.interrupt.interrupt()
    }

    /// Run an update-style statement and return the number of rows changed.
    ///
    /// Statements that produce rows are stepped to completion and report 0.
    pub fn execute(&self, sql: &str, params: impl Into<Params>) -> DbResult<usize> {
        let params = params.into();
        self.tracked("execute", |db| {
            let (mut stmt, lease) = db.prepare_bound(sql, &params)?;
            let changes = if stmt.column_count() > 0 {
                drain(&mut stmt).map(|()| 0)
            } else {
                stmt.raw_execute().map_err(DbError::from)
            };
            drop(stmt);
            db.release_lease(lease);
            changes
        })
    }

    /// Run a statement outside the statement cache. Used for one-off SQL such
    /// as generated savepoint names.
    pub(crate) fn execute_uncached(&self, sql: &str) -> DbResult<usize> {
        self.tracked("execute", |db| {
            if db.settings.trace_execution {
                debug!(path = %db.path, sql = %normalize_sql(sql), "Executing statement");
            }
            Ok(db.connection()?.execute(sql, [])?)
        })
    }

    /// Run a query and return a cursor positioned before its first row.
    ///
    /// Rows are stepped out of the engine one at a time as the cursor
    /// advances.
    pub fn query(&self, sql: &str, params: impl Into<Params>) -> DbResult<Cursor<'_>> {
        let params = params.into();
        self.tracked("query", |_| {
            let (stmt, lease) = self.prepare_bound(sql, &params)?;
            Ok(self.register_cursor(sql, stmt, lease))
        })
    }

    /// Prepare `sql` and bind `params`.
    ///
    /// With caching on, the compiled statement is checked out of the
    /// connection's LRU and a lease is returned alongside it. The lease is
    /// released here if binding fails.
    fn prepare_bound(
        &self,
        sql: &str,
        params: &Params,
    ) -> DbResult<(LiveStatement<'_>, Option<StatementLease>)> {
        let conn = self.connection()?;
        if self.settings.trace_execution {
            debug!(path = %self.path, sql = %normalize_sql(sql), "Executing statement");
        }

        if self.settings.cache_statements {
            let mut stmt = LiveStatement::Cached(conn.prepare_cached(sql)?);
            let lease = self.cache.borrow_mut().acquire(sql);
            if let Err(err) = self.bind(&mut stmt, params) {
                drop(stmt);
                self.release_lease(Some(lease));
                return Err(err);
            }
            Ok((stmt, Some(lease)))
        } else {
            let mut stmt = LiveStatement::Uncached(conn.prepare(sql)?);
            self.bind(&mut stmt, params)?;
            Ok((stmt, None))
        }
    }

    pub(crate) fn release_lease(&self, lease: Option<StatementLease>) {
        if let Some(lease) = lease {
            self.cache.borrow_mut().release(lease);
        }
    }

    fn bind(&self, stmt: &mut Statement<'_>, params: &Params) -> DbResult<()> {
        let expected = stmt.parameter_count();
        if params.len() != expected {
            return Err(DbError::ParameterCount {
                expected,
                actual: params.len(),
            });
        }
        match params {
            Params::None => {}
            Params::Positional(values) => {
                for (idx, value) in values.iter().enumerate() {
                    self.bind_value(stmt, idx + 1, value)?;
                }
            }
            Params::Named(pairs) => {
                for (name, value) in pairs {
                    let idx = named_parameter_index(stmt, name)?;
                    self.bind_value(stmt, idx, value)?;
                }
            }
        }
        Ok(())
    }

    fn bind_value(&self, stmt: &mut Statement<'_>, idx: usize, value: &Value) -> DbResult<()> {
        match (value, &self.formatter) {
            (Value::Timestamp(ts), Some(formatter)) => {
                stmt.raw_bind_parameter(idx, formatter.format(ts))?
            }
            _ => stmt.raw_bind_parameter(idx, value)?,
        }
        Ok(())
    }

    fn register_cursor<'db>(
        &'db self,
        sql: &str,
        stmt: LiveStatement<'db>,
        lease: Option<StatementLease>,
    ) -> Cursor<'db> {
        let id = self.next_cursor_id.get();
        self.next_cursor_id.set(id + 1);
        self.cursors
            .borrow_mut()
            .insert(id, normalize_sql(sql).to_string());
        Cursor::new(self, id, sql.to_string(), stmt, lease)
    }

    pub(crate) fn unregister_cursor(&self, id: u64) {
        self.cursors.borrow_mut().remove(&id);
    }

    /// Run `f` with the last error cleared beforehand and recorded on failure.
    pub(crate) fn tracked<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Self) -> DbResult<T>,
    ) -> DbResult<T> {
        self.clear_error();
        let result = f(self);
        if let Err(err) = &result {
            self.record_error(op, err);
        }
        result
    }

    pub(crate) fn clear_error(&self) {
        self.last_error.replace(None);
    }

    pub(crate) fn record_error(&self, op: &'static str, err: &DbError) {
        if self.settings.log_errors {
            error!(op, path = %self.path, code = err.code(), error = %err, "Database operation failed");
        }
        self.last_error.replace(Some(LastError::from(err)));
    }

    /// Most recent failure, cleared at the start of every operation.
    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.borrow().clone()
    }

    pub fn had_error(&self) -> bool {
        self.last_error.borrow().is_some()
    }

    pub fn last_error_code(&self) -> i32 {
        self.last_error.borrow().as_ref().map_or(0, |e| e.code)
    }

    pub fn last_extended_error_code(&self) -> i32 {
        self.last_error
            .borrow()
            .as_ref()
            .map_or(0, |e| e.extended_code)
    }

    pub fn last_error_message(&self) -> Option<String> {
        self.last_error.borrow().as_ref().map(|e| e.message.clone())
    }

    /// Row id of the most recent successful insert.
    pub fn last_insert_row_id(&self) -> DbResult<i64> {
        Ok(self.connection()?.last_insert_rowid())
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> DbResult<u64> {
        Ok(self.connection()?.changes())
    }

    pub fn is_in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.is_autocommit())
    }

    /// Run a trivial query to confirm the connection works.
    pub fn good_connection(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.query("SELECT name FROM sqlite_master WHERE type = 'table'", ())
            .and_then(|mut cursor| cursor.advance())
            .is_ok()
    }

    pub fn has_open_cursors(&self) -> bool {
        !self.cursors.borrow().is_empty()
    }

    pub fn open_cursor_count(&self) -> usize {
        self.cursors.borrow().len()
    }

    /// Forget cursors that were leaked without being dropped. Returns how
    /// many were registered.
    pub fn close_open_cursors(&mut self) -> usize {
        let orphaned: Vec<(u64, String)> = self.cursors.get_mut().drain().collect();
        for (id, sql) in &orphaned {
            warn!(cursor = id, sql = %sql, "Discarding cursor left open");
        }
        orphaned.len()
    }

    /// Drop every idle cached statement.
    pub fn clear_cached_statements(&mut self) {
        let dropped = self.cache.get_mut().clear();
        if let Some(conn) = &self.conn {
            conn.flush_prepared_statement_cache();
        }
        if dropped > 0 {
            debug!(path = %self.path, dropped, "Cleared statement cache");
        }
    }

    /// Read-only view of the statement cache bookkeeping.
    pub fn with_statement_cache<R>(&self, f: impl FnOnce(&StatementCache) -> R) -> R {
        f(&self.cache.borrow())
    }

    pub fn should_cache_statements(&self) -> bool {
        self.settings.cache_statements
    }

    /// Turning caching off empties the cache.
    pub fn set_should_cache_statements(&mut self, on: bool) {
        if !on {
            self.clear_cached_statements();
        }
        self.settings.cache_statements = on;
    }

    /// Number of idle statements kept for reuse. Shrinking evicts the least
    /// recently used ones.
    pub fn set_statement_cache_capacity(&mut self, capacity: usize) {
        self.settings.statement_cache_capacity = capacity;
        self.cache.get_mut().set_capacity(capacity);
        if let Some(conn) = &self.conn {
            conn.set_prepared_statement_cache_capacity(capacity);
        }
    }

    pub fn set_busy_timeout(&mut self, timeout: Duration) -> DbResult<()> {
        self.settings.busy_timeout = timeout;
        if let Some(conn) = &self.conn {
            conn.busy_timeout(timeout)?;
        }
        Ok(())
    }

    pub fn set_trace_execution(&mut self, on: bool) {
        self.settings.trace_execution = on;
    }

    pub fn set_log_errors(&mut self, on: bool) {
        self.settings.log_errors = on;
    }

    /// Store timestamps as text through `formatter` instead of Unix seconds.
    pub fn set_timestamp_formatter<F: TimestampFormatter + 'static>(&mut self, formatter: F) {
        self.formatter = Some(Box::new(formatter));
    }

    pub fn clear_timestamp_formatter(&mut self) {
        self.formatter = None;
    }

    pub fn has_timestamp_formatter(&self) -> bool {
        self.formatter.is_some()
    }

    pub(crate) fn timestamp_formatter(&self) -> Option<&dyn TimestampFormatter> {
        self.formatter.as_deref()
    }

    /// Version string of the linked SQLite library.
    pub fn sqlite_lib_version() -> &'static str {
        rusqlite::version()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(path = %self.path, error = %err, "Failed to close database on drop");
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("open", &self.conn.is_some())
            .field("settings", &self.settings)
            .field("savepoints", &self.savepoints.borrow())
            .finish()
    }
}

/// Step a statement until it stops producing rows. Leaves it reset.
fn drain(stmt: &mut Statement<'_>) -> DbResult<()> {
    let mut rows = stmt.raw_query();
    while rows.next()?.is_some() {}
    Ok(())
}

/// Resolve a named parameter, accepting a bare name for any prefix.
fn named_parameter_index(stmt: &Statement<'_>, name: &str) -> DbResult<usize> {
    const PREFIXES: [char; 3] = [':', '@', '$'];
    if name.starts_with(&PREFIXES[..]) {
        if let Some(idx) = stmt.parameter_index(name)? {
            return Ok(idx);
        }
    } else {
        for prefix in PREFIXES {
            if let Some(idx) = stmt.parameter_index(&format!("{prefix}{name}"))? {
                return Ok(idx);
            }
        }
    }
    Err(DbError::UnknownParameter(name.to_string()))
}

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier("sp"), "\"sp\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn reopen_is_noop() {
        let mut db = Database::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (x)", ()).unwrap();
        db.open().unwrap();
        assert!(db.table_exists("t").unwrap());
    }

    #[test]
    fn temporary_database_starts_empty_after_reopen() {
        let mut db = Database::new(DatabasePath::Temporary, DatabaseSettings::default());
        db.open().unwrap();
        db.execute("CREATE TABLE t (x)", ()).unwrap();
        assert!(db.table_exists("t").unwrap());

        db.close().unwrap();
        db.open().unwrap();
        assert!(!db.table_exists("t").unwrap());
    }

    #[test]
    fn refused_close_keeps_connection_state() {
        let mut db = Database::open_in_memory().unwrap();
        db.start_savepoint("kept").unwrap();
        std::mem::forget(db.query("SELECT 1", ()).unwrap());
        assert_eq!(db.open_cursor_count(), 1);

        let err = db.close().unwrap_err();
        assert_eq!(err.code(), rusqlite::ffi::SQLITE_BUSY);
        assert_eq!(db.last_error_code(), rusqlite::ffi::SQLITE_BUSY);
        assert!(db.is_open());
        assert_eq!(db.active_savepoints(), ["kept".to_string()]);
        assert!(db.is_in_transaction());
        assert_eq!(db.open_cursor_count(), 1);
    }

    #[test]
    fn interrupt_slot_empty_when_closed() {
        let mut db = Database::open_in_memory().unwrap();
        let slot = db.interrupt_slot();
        assert!(slot.interrupt());
        db.close().unwrap();
        assert!(!slot.interrupt());
    }
}
