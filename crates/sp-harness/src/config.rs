//! Harness configuration.

use crate::layout::WorkspaceLayout;
use serde::{Deserialize, Serialize};
use sp_block::CacheMode;
use sp_error::{Result, SpError};
use sp_spawn::{DEFAULT_SHADOW_VERBOSITY, Robocopy};
use sp_types::TestConfiguration;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// File name of the shadow-copy launcher looked up beside the harness binary.
pub const SHADOWSPAWN_EXE: &str = if cfg!(windows) {
    "shadowspawn.exe"
} else {
    "shadowspawn"
};

/// Everything a verification run needs.
///
/// Missing fields in a JSON file take their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub test: TestConfiguration,
    /// Directory holding `Data/`, `ShadowBackup/` and `Backup/`.
    pub work_dir: PathBuf,
    /// Shadow-copy launcher; `None` means beside the harness executable.
    pub shadowspawn: Option<PathBuf>,
    /// Mirroring program, both wrapped by the launcher and run directly.
    pub mirror_program: String,
    pub shadow_verbosity: u8,
    /// Seed for block contents. Drawn fresh for each default configuration.
    pub seed: u64,
    /// Also mirror `Data/` to `Backup/` without a snapshot and check it.
    pub direct_copy: bool,
    pub cache_mode: CacheMode,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            test: TestConfiguration::default(),
            work_dir: PathBuf::from("."),
            shadowspawn: None,
            mirror_program: Robocopy::NAME.to_owned(),
            shadow_verbosity: DEFAULT_SHADOW_VERBOSITY,
            seed: fresh_seed(),
            direct_copy: false,
            cache_mode: CacheMode::Direct,
        }
    }
}

/// A seed that differs between runs and between calls in one process.
///
/// Mixes wall-clock time, the process id and a per-process counter. Not
/// secret; the value is logged and reported so a run can be replayed.
#[must_use]
pub fn fresh_seed() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let clock = now.as_secs().wrapping_mul(1_000_000_007) ^ u64::from(now.subsec_nanos());
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = clock
        ^ (u64::from(std::process::id()) << 32)
        ^ count.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    // splitmix64 finalizer
    let mut z = mixed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl HarnessConfig {
    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|err| SpError::InvalidConfig(format!("{}: {err}", path.display())))
    }

    #[must_use]
    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(&self.work_dir)
    }

    /// Resolve the launcher path.
    pub fn shadowspawn_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.shadowspawn {
            return Ok(path.clone());
        }
        let exe = std::env::current_exe()?;
        let dir = exe.parent().ok_or_else(|| {
            SpError::InvalidConfig(format!("{} has no parent directory", exe.display()))
        })?;
        Ok(dir.join(SHADOWSPAWN_EXE))
    }
}
