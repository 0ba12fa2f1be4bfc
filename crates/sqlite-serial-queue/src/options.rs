//! Connection location and tuning knobs.

use rusqlite::OpenFlags;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time the engine keeps retrying on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Default capacity of the compiled-statement LRU.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 16;

/// Where a connection's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabasePath {
    /// A database file, created on open if the flags allow it.
    File(PathBuf),
    /// Private on-disk database, deleted when the connection closes.
    Temporary,
    /// Private in-memory database, destroyed when the connection closes.
    Memory,
}

impl DatabasePath {
    /// Map the conventional path forms: `None` is in-memory, an empty path is
    /// a temporary file, anything else is a file.
    pub fn from_optional(path: Option<&Path>) -> Self {
        match path {
            None => DatabasePath::Memory,
            Some(p) if p.as_os_str().is_empty() => DatabasePath::Temporary,
            Some(p) => DatabasePath::File(p.to_path_buf()),
        }
    }

    /// Path handed to the engine (`""` for a temporary database).
    pub(crate) fn engine_path(&self) -> &Path {
        match self {
            DatabasePath::File(p) => p,
            DatabasePath::Temporary | DatabasePath::Memory => Path::new(""),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, DatabasePath::Memory)
    }
}

impl fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabasePath::File(p) => write!(f, "{}", p.display()),
            DatabasePath::Temporary => f.write_str("<temporary>"),
            DatabasePath::Memory => f.write_str(":memory:"),
        }
    }
}

impl From<&Path> for DatabasePath {
    fn from(path: &Path) -> Self {
        DatabasePath::from_optional(Some(path))
    }
}

impl From<PathBuf> for DatabasePath {
    fn from(path: PathBuf) -> Self {
        DatabasePath::from_optional(Some(&path))
    }
}

/// Per-connection behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// How long the engine retries on a locked database before failing.
    pub busy_timeout: Duration,
    /// Keep compiled statements for reuse across calls.
    pub cache_statements: bool,
    /// Capacity of the compiled-statement LRU when caching is on.
    pub statement_cache_capacity: usize,
    /// Log every statement at debug level.
    pub trace_execution: bool,
    /// Log failures at error level as they are recorded.
    pub log_errors: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            cache_statements: false,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
            trace_execution: false,
            log_errors: true,
        }
    }
}

/// Options for opening a [`DatabaseQueue`](crate::DatabaseQueue).
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub flags: OpenFlags,
    pub vfs: Option<String>,
    pub settings: DatabaseSettings,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            flags: OpenFlags::default(),
            vfs: None,
            settings: DatabaseSettings::default(),
        }
    }
}

impl QueueOptions {
    pub fn with_settings(mut self, settings: DatabaseSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_vfs(mut self, vfs: impl Into<String>) -> Self {
        self.vfs = Some(vfs.into());
        self
    }
}
