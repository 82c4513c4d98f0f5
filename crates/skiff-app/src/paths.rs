//! OS-specific directories for config and log files.

use std::path::{Path, PathBuf};

/// Errors that can occur while resolving or creating directories.
#[derive(Debug, thiserror::Error)]
pub enum PathsError {
    /// The OS did not provide a configuration directory.
    #[error("could not determine OS configuration directory")]
    NoConfigDir,
    /// Directory creation failed.
    #[error("failed to create {path}: {source}")]
    Create {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Where the client keeps `config.ron` and its log file.
///
/// Resolves to the platform-appropriate location (XDG on Linux, Known Folders
/// on Windows, Library on macOS).
#[derive(Debug, Clone)]
pub struct AppDirs {
    /// Holds `config.ron`.
    pub config_dir: PathBuf,
    /// Holds the debug-build JSON log.
    pub log_dir: PathBuf,
}

const APP_NAME: &str = "skiff";

impl AppDirs {
    /// Resolve the default directories without creating them.
    pub fn resolve() -> Result<Self, PathsError> {
        let base = dirs::config_dir().ok_or(PathsError::NoConfigDir)?;
        Ok(Self::with_root(&base.join(APP_NAME)))
    }

    /// Directories rooted at `root`, as used by `--config`.
    pub fn with_root(root: &Path) -> Self {
        Self {
            config_dir: root.to_path_buf(),
            log_dir: root.join("logs"),
        }
    }

    /// Create every directory on disk.
    pub fn create(&self) -> Result<(), PathsError> {
        for dir in [&self.config_dir, &self.log_dir] {
            std::fs::create_dir_all(dir).map_err(|source| PathsError::Create {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
