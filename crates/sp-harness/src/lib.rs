#![forbid(unsafe_code)]
//! Shadow-copy block integrity verification.
//!
//! [`IntegrityVerifier`] writes deterministic blocks across the data files of
//! a [`WorkspaceLayout`], has a [`DirectoryCopier`](sp_spawn::DirectoryCopier)
//! back the data directory up after every block and proves, block by block,
//! that the backup holds exactly what was written.

pub mod config;
pub mod layout;
pub mod restore;
pub mod verify;

pub use config::{HarnessConfig, SHADOWSPAWN_EXE, fresh_seed};
pub use layout::{DATA_DIR, DIRECT_BACKUP_DIR, SHADOW_BACKUP_DIR, WorkspaceLayout, data_file_name};
pub use restore::restore_backup;
pub use verify::{CancelToken, IntegrityVerifier, RunOutcome, RunState, VerificationReport};
