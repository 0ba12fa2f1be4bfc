//! WAL checkpoints against an on-disk database.

use crate::{
    CheckpointMode, Database, DatabasePath, DatabaseSettings, DbError, Params,
};
use std::path::Path;
use std::time::Duration;

fn wal_db(path: &Path, busy_timeout: Duration) -> Database {
    let settings = DatabaseSettings {
        busy_timeout,
        ..DatabaseSettings::default()
    };
    let mut db = Database::new(DatabasePath::from(path), settings);
    db.open().unwrap();
    assert_eq!(
        db.query_string("PRAGMA journal_mode = WAL", ()).unwrap().as_deref(),
        Some("wal")
    );
    db.execute("CREATE TABLE t (x INTEGER)", ()).unwrap();
    db
}

#[test]
fn passive_checkpoint_copies_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let db = wal_db(&dir.path().join("wal.sqlite"), Duration::from_secs(2));
    for i in 0..20 {
        db.execute("INSERT INTO t (x) VALUES (?)", Params::positional([i]))
            .unwrap();
    }

    let result = db.checkpoint(CheckpointMode::Passive, None).unwrap();
    assert!(result.log_frames > 0);
    assert_eq!(result.checkpointed_frames, result.log_frames);

    let truncated = db.checkpoint(CheckpointMode::Truncate, Some("main")).unwrap();
    assert_eq!(truncated.log_frames, 0);
}

#[test]
fn blocked_checkpoint_reports_busy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.sqlite");
    let db = wal_db(&path, Duration::from_millis(50));
    db.execute("INSERT INTO t (x) VALUES (1)", ()).unwrap();

    // A reader pinned to an old snapshot keeps a full checkpoint from finishing.
    let reader = rusqlite::Connection::open(&path).unwrap();
    reader.execute_batch("BEGIN").unwrap();
    let _: i64 = reader
        .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
        .unwrap();

    db.execute("INSERT INTO t (x) VALUES (2)", ()).unwrap();
    let err = db.checkpoint(CheckpointMode::Full, None).unwrap_err();
    assert!(matches!(err, DbError::CheckpointBusy { .. }));
    assert!(err.is_busy());
    assert!(db.had_error());

    reader.execute_batch("COMMIT").unwrap();
    assert!(db.checkpoint(CheckpointMode::Full, None).is_ok());
}
