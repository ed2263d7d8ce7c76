//! Platform-aware data storage directory management
//!
//! ## Platform Paths
//!
//! | Type | Windows | macOS | Linux |
//! |------|---------|-------|-------|
//! | Data | `%APPDATA%\Confluence\` | `~/Library/Application Support/Confluence/` | `$XDG_DATA_HOME/confluence/` |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::constants::{APP_DOT_FOLDER, APP_NAME, ENV_DATA_DIR};

/// Data subdirectories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSubdir {
    Sqlite,
}

impl DataSubdir {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataSubdir::Sqlite => "sqlite",
        }
    }
}

/// Application storage manager
#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
}

impl AppStorage {
    /// Initialize storage with a platform-appropriate data directory
    pub async fn init() -> Result<Self> {
        let data_dir = Self::resolve_data_dir();

        // Create directories first (canonicalize requires the path to exist)
        Self::ensure_directories(&data_dir).await?;
        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        tracing::debug!(data_dir = %data_dir.display(), "Storage initialized");
        Ok(Self { data_dir })
    }

    /// Resolve the data directory: env override, platform dirs, dotfile fallback
    pub fn resolve_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }

        if let Some(dirs) = ProjectDirs::from("", "", APP_NAME) {
            return dirs.data_dir().to_path_buf();
        }

        // Home-relative dotfile as last resort
        dirs_fallback().join(APP_DOT_FOLDER)
    }

    async fn ensure_directories(data_dir: &Path) -> Result<()> {
        let sqlite_dir = data_dir.join(DataSubdir::Sqlite.as_str());
        tokio::fs::create_dir_all(&sqlite_dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", sqlite_dir.display()))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of a data subdirectory
    pub fn subdir(&self, sub: DataSubdir) -> PathBuf {
        self.data_dir.join(sub.as_str())
    }

    /// Build storage rooted at an explicit directory (tests)
    #[cfg(test)]
    pub fn at(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdir_paths() {
        let storage = AppStorage::at(PathBuf::from("/tmp/confluence-test"));
        assert_eq!(
            storage.subdir(DataSubdir::Sqlite),
            PathBuf::from("/tmp/confluence-test/sqlite")
        );
    }

    #[tokio::test]
    async fn test_ensure_directories_creates_sqlite_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("data");
        AppStorage::ensure_directories(&root).await.unwrap();
        assert!(root.join("sqlite").is_dir());
    }
}
