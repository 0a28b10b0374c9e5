//! Directory layout of a run under the working directory.

use sp_error::Result;
use sp_types::{StreamIndex, TestConfiguration};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Primary data directory, written by the loop.
pub const DATA_DIR: &str = "Data";
/// Destination of the shadow-copy mirror.
pub const SHADOW_BACKUP_DIR: &str = "ShadowBackup";
/// Destination of the direct (non-shadow) mirror.
pub const DIRECT_BACKUP_DIR: &str = "Backup";

/// `data.<MB>.<i>.dat`
#[must_use]
pub fn data_file_name(config: &TestConfiguration, stream: StreamIndex) -> String {
    format!("data.{}.{}.dat", config.size_mb_label(), stream.0)
}

/// The three sibling directories a run works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    #[must_use]
    pub fn shadow_dir(&self) -> PathBuf {
        self.root.join(SHADOW_BACKUP_DIR)
    }

    #[must_use]
    pub fn direct_dir(&self) -> PathBuf {
        self.root.join(DIRECT_BACKUP_DIR)
    }

    /// Path of stream `stream`'s file inside `dir`.
    #[must_use]
    pub fn stream_path(dir: &Path, config: &TestConfiguration, stream: StreamIndex) -> PathBuf {
        dir.join(data_file_name(config, stream))
    }

    /// Delete and recreate every run directory.
    ///
    /// A directory that cannot be deleted is logged and reused; one that
    /// cannot be created fails the run.
    pub fn recreate(&self) -> Result<()> {
        for dir in [self.shadow_dir(), self.direct_dir(), self.data_dir()] {
            if dir.exists() {
                match fs::remove_dir_all(&dir) {
                    Ok(()) => info!(target: "sp::harness::layout", dir = %dir.display(), "deleted"),
                    Err(err) => warn!(
                        target: "sp::harness::layout",
                        dir = %dir.display(),
                        error = %err,
                        "delete failed, reusing directory"
                    ),
                }
            }
            if let Err(err) = fs::create_dir_all(&dir) {
                error!(
                    target: "sp::harness::layout",
                    dir = %dir.display(),
                    error = %err,
                    "cannot create directory"
                );
                return Err(err.into());
            }
        }
        Ok(())
    }
}
