//! Put a shadow backup back in place of the data directory.

use crate::layout::WorkspaceLayout;
use sp_error::{Result, SpError};
use sp_spawn::{CopyReport, DirectoryCopier};
use std::io;
use tracing::info;

/// Mirror `ShadowBackup/` onto `Data/` with `copier`.
///
/// A missing backup directory is an I/O error; the copier's own failure
/// codes propagate unchanged.
pub fn restore_backup(layout: &WorkspaceLayout, copier: &mut dyn DirectoryCopier) -> Result<CopyReport> {
    let source = layout.shadow_dir();
    let destination = layout.data_dir();
    if !source.is_dir() {
        return Err(SpError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no backup to restore at {}", source.display()),
        )));
    }
    copier.ensure_available()?;
    std::fs::create_dir_all(&destination)?;
    info!(
        target: "sp::harness::restore",
        from = %source.display(),
        to = %destination.display(),
        tool = copier.name(),
        "restoring backup"
    );
    copier.copy_dir(&source, &destination)
}
