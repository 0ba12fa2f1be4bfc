//! Write-ahead log checkpoints.

use crate::db::{quote_identifier, Database};
use crate::{DbError, DbResult};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How hard a checkpoint tries to copy the log back into the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointMode {
    /// Copy what can be copied without waiting on readers or writers.
    #[default]
    Passive,
    /// Wait for writers, then copy everything.
    Full,
    /// Like `Full`, then wait for readers so the log restarts from the top.
    Restart,
    /// Like `Restart`, then truncate the log file to zero bytes.
    Truncate,
}

impl CheckpointMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointMode::Passive => "PASSIVE",
            CheckpointMode::Full => "FULL",
            CheckpointMode::Restart => "RESTART",
            CheckpointMode::Truncate => "TRUNCATE",
        }
    }
}

impl fmt::Display for CheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "passive" => Ok(CheckpointMode::Passive),
            "full" => Ok(CheckpointMode::Full),
            "restart" => Ok(CheckpointMode::Restart),
            "truncate" => Ok(CheckpointMode::Truncate),
            other => Err(format!("unknown checkpoint mode: {other}")),
        }
    }
}

/// Frame counts reported by a completed checkpoint. Both are -1 when the
/// database is not in WAL mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointResult {
    pub log_frames: i32,
    pub checkpointed_frames: i32,
}

impl Database {
    /// Checkpoint the log of `schema` (`main` when `None`).
    ///
    /// Fails with [`DbError::CheckpointBusy`] when the mode could not finish
    /// because of other connections.
    pub fn checkpoint(
        &self,
        mode: CheckpointMode,
        schema: Option<&str>,
    ) -> DbResult<CheckpointResult> {
        let sql = format!(
            "PRAGMA {}.wal_checkpoint({})",
            quote_identifier(schema.unwrap_or("main")),
            mode.as_str()
        );
        self.tracked("checkpoint", |db| {
            let (busy, log_frames, checkpointed_frames) = db
                .connection()?
                .query_row(&sql, [], |row| {
                    Ok((row.get::<_, i32>(0)?, row.get::<_, i32>(1)?, row.get::<_, i32>(2)?))
                })?;
            if busy != 0 {
                return Err(DbError::CheckpointBusy {
                    log_frames,
                    checkpointed_frames,
                });
            }
            debug!(path = %db.path, %mode, log_frames, checkpointed_frames, "Checkpointed log");
            Ok(CheckpointResult {
                log_frames,
                checkpointed_frames,
            })
        })
    }
}
