//! File system paths for the queue tools.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Base directory name under the home directory.
const BASE_DIR_NAME: &str = ".sqlite-queue";
/// Default database filename under the base directory.
const DATABASE_FILE_NAME: &str = "queue.sqlite";

/// Manages file system paths for the queue tools.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.sqlite-queue)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.sqlite-queue`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.sqlite-queue).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.sqlite-queue/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the default database path (~/.sqlite-queue/queue.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE_NAME)
    }

    /// Ensure the base directory exists.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_hang_off_base_dir() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/q"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/q/config.json"));
        assert_eq!(paths.database_file(), PathBuf::from("/tmp/q/queue.sqlite"));
    }

    #[test]
    fn ensure_dirs_creates_base() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("a").join("b"));
        paths.ensure_dirs().unwrap();
        assert!(paths.base_dir().is_dir());
    }
}
