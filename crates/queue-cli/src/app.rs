//! Command implementations.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use std::time::Duration;

use queue_config_and_utils::{Config, Paths};
use sqlite_serial_queue::{
    CheckpointMode, Database, DatabasePath, DatabaseQueue, DatabaseSettings, DbResult,
    OpenFlags, Params, QueueOptions, TxOutcome, Value,
};
use tracing::info;

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Pick the database location: the `--database` flag, then the config file,
/// then the default file under the base directory.
pub fn resolve_database(flag: Option<&str>, config: &Config, paths: &Paths) -> DatabasePath {
    match flag.or(config.database_path.as_deref()) {
        Some(":memory:") => DatabasePath::Memory,
        Some("") => DatabasePath::Temporary,
        Some(path) => DatabasePath::File(path.into()),
        None => DatabasePath::File(paths.database_file()),
    }
}

/// Queue options from the configuration.
pub fn queue_options(config: &Config) -> QueueOptions {
    let settings = DatabaseSettings {
        busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        cache_statements: config.cache_statements,
        statement_cache_capacity: config.statement_cache_capacity,
        trace_execution: config.trace_execution,
        log_errors: config.log_errors,
    };
    let mut options = QueueOptions::default().with_settings(settings);
    if config.read_only {
        options = options.with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
    }
    if let Some(vfs) = &config.vfs {
        options = options.with_vfs(vfs.clone());
    }
    options
}

pub fn open_queue(location: DatabasePath, config: &Config) -> DbResult<DatabaseQueue> {
    DatabaseQueue::open_at(location, queue_options(config))
}

/// Turn a command-line parameter into a value: integers, then reals, then
/// `null`, otherwise text.
pub fn parse_param(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::Real(f);
        }
    }
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    Value::Text(raw.to_string())
}

fn params_from(raw: &[String]) -> Params {
    if raw.is_empty() {
        Params::None
    } else {
        Params::Positional(raw.iter().map(|p| parse_param(p)).collect())
    }
}

pub fn run_exec(queue: &DatabaseQueue, sql: String, raw: &[String]) -> CliResult<()> {
    let params = params_from(raw);
    let (changes, row_id) = queue.submit(move |db| {
        let changes = db.execute(&sql, params)?;
        Ok((changes, db.last_insert_row_id()?))
    })?;
    println!("{changes} row(s) changed, last insert rowid {row_id}");
    Ok(())
}

pub fn run_query(queue: &DatabaseQueue, sql: String, raw: &[String]) -> CliResult<()> {
    let params = params_from(raw);
    let rows = queue.submit(move |db| collect_rows(db, &sql, params))?;
    for row in &rows {
        println!("{}", serde_json::to_string(row)?);
    }
    info!(rows = rows.len(), "Query finished");
    Ok(())
}

fn collect_rows(
    db: &Database,
    sql: &str,
    params: Params,
) -> DbResult<Vec<BTreeMap<String, Value>>> {
    let mut cursor = db.query(sql, params)?;
    let mut rows = Vec::new();
    while cursor.advance()? {
        rows.push(cursor.row_dictionary()?);
    }
    Ok(rows)
}

pub fn run_batch(queue: &DatabaseQueue, file: &Path) -> CliResult<()> {
    let sql = std::fs::read_to_string(file)?;
    queue
        .in_transaction(move |db| TxOutcome::rollback_on_err(db.execute_batch(&sql)))??;
    info!(file = %file.display(), "Batch committed");
    Ok(())
}

pub fn run_schema(queue: &DatabaseQueue, table: Option<String>) -> CliResult<()> {
    let rows = queue.submit(move |db| {
        let mut cursor = match &table {
            Some(table) => db.get_table_schema(table)?,
            None => db.get_schema()?,
        };
        let mut rows = Vec::new();
        while cursor.advance()? {
            rows.push(cursor.row_dictionary()?);
        }
        Ok(rows)
    })?;
    for row in &rows {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}

pub fn run_checkpoint(queue: &DatabaseQueue, mode: CheckpointMode) -> CliResult<()> {
    let result = queue.checkpoint(mode, None)?;
    println!(
        "{mode}: {} of {} log frame(s) checkpointed",
        result.checkpointed_frames, result.log_frames
    );
    Ok(())
}

pub fn run_info(queue: &DatabaseQueue) -> CliResult<()> {
    let (tables, user_version, journal_mode) = queue.submit(|db| {
        Ok((
            db.table_names()?,
            db.user_version()?,
            db.query_string("PRAGMA journal_mode", ())?,
        ))
    })?;
    let info = serde_json::json!({
        "path": queue.path().to_string(),
        "sqlite_version": Database::sqlite_lib_version(),
        "journal_mode": journal_mode,
        "user_version": user_version,
        "tables": tables,
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
