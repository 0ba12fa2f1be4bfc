//! Configuration management for the queue tools.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 16;

/// Queue tool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Database location. `None` uses the default file under the base
    /// directory, `:memory:` an in-memory database and an empty string a
    /// temporary one.
    pub database_path: Option<String>,
    /// How long a locked database is retried, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Reuse compiled statements.
    pub cache_statements: bool,
    /// Capacity of the compiled-statement cache.
    pub statement_cache_capacity: usize,
    /// Log every statement at debug level.
    pub trace_execution: bool,
    /// Log database failures at error level.
    pub log_errors: bool,
    /// Open the database read-only.
    pub read_only: bool,
    /// Name of a registered SQLite VFS.
    pub vfs: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            cache_statements: false,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
            trace_execution: false,
            log_errors: true,
            read_only: false,
            vfs: None,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file if present, then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Reject settings the queue cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.cache_statements && self.statement_cache_capacity == 0 {
            return Err(CoreError::Config(
                "statement_cache_capacity must be positive when cache_statements is on".to_string(),
            ));
        }
        Ok(())
    }

    /// Override configuration from `SQLITE_QUEUE_*` environment variables.
    fn load_from_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(log_level) = lookup("SQLITE_QUEUE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(path) = lookup("SQLITE_QUEUE_DB_PATH") {
            self.database_path = Some(path);
        }
        if let Some(value) = lookup("SQLITE_QUEUE_CACHE_STATEMENTS") {
            self.cache_statements = parse_bool(&value);
        }
        if let Some(value) = lookup("SQLITE_QUEUE_BUSY_TIMEOUT_MS") {
            match value.trim().parse() {
                Ok(ms) => self.busy_timeout_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid SQLITE_QUEUE_BUSY_TIMEOUT_MS"),
            }
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
