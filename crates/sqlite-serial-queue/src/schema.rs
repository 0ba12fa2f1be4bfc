//! Schema introspection, scalar query helpers and table maintenance.

use crate::cursor::Cursor;
use crate::db::{quote_identifier, Database};
use crate::value::{Params, Value};
use crate::{DbError, DbResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;

const SCHEMA_SQL: &str = "SELECT type, name, tbl_name, rootpage, sql \
     FROM (SELECT * FROM sqlite_master UNION ALL SELECT * FROM sqlite_temp_master) \
     WHERE type != 'meta' AND name NOT LIKE 'sqlite_%' \
     ORDER BY tbl_name, type DESC, name";

impl Database {
    /// True when a table named `name` exists, compared case-insensitively.
    pub fn table_exists(&self, name: &str) -> DbResult<bool> {
        let found = self.query_i64(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND lower(name) = lower(?)",
            Params::positional([name]),
        )?;
        Ok(found.unwrap_or(0) > 0)
    }

    /// Cursor over every schema object: `type`, `name`, `tbl_name`,
    /// `rootpage`, `sql`.
    pub fn get_schema(&self) -> DbResult<Cursor<'_>> {
        self.query(SCHEMA_SQL, ())
    }

    /// Cursor over `PRAGMA table_info` for `table`.
    pub fn get_table_schema(&self, table: &str) -> DbResult<Cursor<'_>> {
        self.query(&format!("PRAGMA table_info({})", quote_identifier(table)), ())
    }

    pub fn column_exists(&self, column: &str, table: &str) -> DbResult<bool> {
        let mut info = self.get_table_schema(table)?;
        while info.advance()? {
            if let Some(name) = info.string("name")? {
                if name.eq_ignore_ascii_case(column) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Names of user tables, sorted.
    pub fn table_names(&self) -> DbResult<Vec<String>> {
        let mut cursor = self.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            (),
        )?;
        let mut names = Vec::new();
        while cursor.advance()? {
            if let Some(name) = cursor.string(0)? {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Compile `sql` without running it.
    pub fn validate_sql(&self, sql: &str) -> DbResult<()> {
        self.tracked("validate", |db| {
            db.connection()?.prepare(sql)?;
            Ok(())
        })
    }

    /// First column of the first row, or `None` when there are no rows.
    pub fn query_value(&self, sql: &str, params: impl Into<Params>) -> DbResult<Option<Value>> {
        let mut cursor = self.query(sql, params)?;
        if !cursor.advance()? {
            return Ok(None);
        }
        let value = cursor.value(0)?.clone();
        cursor.close();
        Ok(Some(value))
    }

    pub fn query_i64(&self, sql: &str, params: impl Into<Params>) -> DbResult<Option<i64>> {
        Ok(non_null(self.query_value(sql, params)?).map(|v| v.as_i64()))
    }

    pub fn query_f64(&self, sql: &str, params: impl Into<Params>) -> DbResult<Option<f64>> {
        Ok(non_null(self.query_value(sql, params)?).map(|v| v.as_f64()))
    }

    pub fn query_bool(&self, sql: &str, params: impl Into<Params>) -> DbResult<Option<bool>> {
        Ok(non_null(self.query_value(sql, params)?).map(|v| v.as_i64() != 0))
    }

    pub fn query_string(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> DbResult<Option<String>> {
        Ok(non_null(self.query_value(sql, params)?).and_then(|v| v.as_text()))
    }

    pub fn query_blob(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> DbResult<Option<Vec<u8>>> {
        Ok(non_null(self.query_value(sql, params)?).and_then(|v| v.as_blob()))
    }

    pub fn query_timestamp(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> DbResult<Option<DateTime<Utc>>> {
        let mut cursor = self.query(sql, params)?;
        if !cursor.advance()? {
            return Ok(None);
        }
        cursor.timestamp(0)
    }

    pub fn user_version(&self) -> DbResult<i32> {
        Ok(self.query_i64("PRAGMA user_version", ())?.unwrap_or(0) as i32)
    }

    pub fn set_user_version(&self, version: i32) -> DbResult<()> {
        self.execute(&format!("PRAGMA user_version = {version}"), ())?;
        Ok(())
    }

    pub fn application_id(&self) -> DbResult<u32> {
        Ok(self.query_i64("PRAGMA application_id", ())?.unwrap_or(0) as u32)
    }

    pub fn set_application_id(&self, id: u32) -> DbResult<()> {
        self.execute(&format!("PRAGMA application_id = {}", id as i32), ())?;
        Ok(())
    }

    /// Run several semicolon-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.tracked("execute_batch", |db| {
            db.connection()?.execute_batch(sql)?;
            Ok(())
        })
    }

    /// Run several statements, handing every result row to `callback`.
    ///
    /// Returning `false` from the callback stops execution with
    /// [`DbError::Aborted`]; statements already run keep their effects.
    pub fn execute_statements(
        &self,
        sql: &str,
        mut callback: impl FnMut(&BTreeMap<String, Value>) -> bool,
    ) -> DbResult<()> {
        self.tracked("execute_statements", |db| {
            let conn = db.connection()?;
            let mut batch = rusqlite::Batch::new(conn, sql);
            while let Some(mut stmt) = batch.next()? {
                let columns: Vec<String> =
                    stmt.column_names().into_iter().map(String::from).collect();
                let mut rows = stmt.raw_query();
                while let Some(row) = rows.next()? {
                    let mut dict = BTreeMap::new();
                    for (idx, name) in columns.iter().enumerate() {
                        dict.insert(name.clone(), Value::from(row.get_ref(idx)?));
                    }
                    if !callback(&dict) {
                        return Err(DbError::Aborted);
                    }
                }
            }
            Ok(())
        })
    }

    /// Run `create_sql` unless a table called `name` already exists. Returns
    /// whether the table was created.
    pub fn create_table(&self, name: &str, create_sql: &str) -> DbResult<bool> {
        if self.table_exists(name)? {
            return Ok(false);
        }
        self.execute(create_sql, ())?;
        info!(table = %name, "Created table");
        Ok(true)
    }

    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        self.execute(&format!("DROP TABLE IF EXISTS {}", quote_identifier(name)), ())?;
        Ok(())
    }

    /// Delete every row of `name`, keeping the table.
    pub fn empty_table(&self, name: &str) -> DbResult<usize> {
        self.execute(&format!("DELETE FROM {}", quote_identifier(name)), ())
    }
}

fn non_null(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}
