#![forbid(unsafe_code)]
//! Error types for ShadowProof.
//!
//! # Error Taxonomy
//!
//! Every detected fault ends the run. There is no recoverable class: the
//! harness is a fail-fast correctness oracle, so each variant is returned to
//! the binary, logged with its context and turned into a process exit code by
//! [`SpError::exit_code`].
//!
//! | Variant | Exit code | Meaning |
//! |---------|-----------|---------|
//! | `Io` | 1 | Local filesystem failure outside the verified block path |
//! | `InvalidConfig` | 1 | Configuration rejected before the run started |
//! | `NoFreeDriveLetter` | 1 | Every drive letter `a..=z` is mapped |
//! | `ToolMissing` | 3 | Shadow-copy executable absent at the expected path |
//! | `StreamNotFound` | 4 | Block mapped to a stream with no open handle |
//! | `LocalWriteMismatch` | 5 | Data read back from `Data/` differs from what was written |
//! | `ShadowCopyMismatch` | 6 | Data read back from the shadow copy differs |
//! | `MirrorFailed` | 7..=31 | Wrapped mirroring tool returned a failure code (propagated) |
//! | `LauncherFailed` | 40 | Shadow-copy launcher itself failed |
//! | `MissingRuntime` | 41 | Launcher could not load its runtime (`STATUS_DLL_NOT_FOUND`) |
//! | `DirectCopyMismatch` | 42 | Data read back from the direct mirror differs |
//!
//! Exit code 2 is reserved for usage errors reported by the argument parser.
//! robocopy's status is a 5-bit set, so `7..=31` is reserved for propagated
//! mirror failures; codes outside that band (negative, or from another tool)
//! collapse to [`exit_codes::MIRROR_FAILURE_MAX`].
//!
//! ## Design Constraints
//!
//! - `sp-error` does not depend on `sp-types`; block coordinates are carried
//!   as plain integers so every crate can construct these errors.
//! - The exit-code mapping is exhaustive (no wildcard arms) so adding a
//!   variant is a compile error until its code is assigned.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fixed process exit codes.
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const PROCESSING_ERROR: u8 = 1;
    pub const USAGE_ERROR: u8 = 2;
    pub const TOOL_MISSING: u8 = 3;
    pub const STREAM_NOT_FOUND: u8 = 4;
    pub const LOCAL_WRITE_MISMATCH: u8 = 5;
    pub const SHADOW_COPY_MISMATCH: u8 = 6;
    /// Lowest propagated mirroring-tool failure code.
    pub const MIRROR_FAILURE_MIN: u8 = 7;
    /// Highest propagated mirroring-tool failure code.
    pub const MIRROR_FAILURE_MAX: u8 = 31;
    pub const LAUNCHER_FAILURE: u8 = 40;
    pub const MISSING_RUNTIME: u8 = 41;
    pub const DIRECT_COPY_MISMATCH: u8 = 42;
}

/// Where a block was read from and how its hash disagreed with the data in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMismatch {
    /// File the block was read back from.
    pub path: PathBuf,
    pub block_index: u64,
    pub stream_index: u64,
    pub stream_block_index: u64,
    pub byte_offset: u64,
    /// Hash of the block as generated in memory.
    pub expected_hash: String,
    /// Hash of the block as read back.
    pub actual_hash: String,
}

impl fmt::Display for BlockMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} ({}.{} @ {}) in {}: {} != {}",
            self.block_index,
            self.stream_index,
            self.stream_block_index,
            self.byte_offset,
            self.path.display(),
            self.expected_hash,
            self.actual_hash
        )
    }
}

/// Unified error type for all ShadowProof operations.
#[derive(Debug, Error)]
pub enum SpError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration rejected before the run started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No unmapped drive letter is available for the shadow volume.
    #[error("no free drive letter, cannot map the shadow volume")]
    NoFreeDriveLetter,

    /// The shadow-copy executable does not exist.
    #[error("shadow-copy tool not found at {}", path.display())]
    ToolMissing { path: PathBuf },

    /// A block mapped to a stream index that has no open handle.
    #[error("no open stream with index {stream} (block {block})")]
    StreamNotFound { stream: u64, block: u64 },

    /// The block read back from the primary data directory does not match
    /// what was just written. Points at the local write path, not the backup.
    #[error("write readback hash mismatch: {0}")]
    LocalWriteMismatch(Box<BlockMismatch>),

    /// The block read back from the shadow copy does not match the data
    /// written. This is the backup-fidelity defect the harness exists to catch.
    #[error("shadow copy hash mismatch: {0}")]
    ShadowCopyMismatch(Box<BlockMismatch>),

    /// The block read back from the direct (non-shadow) mirror does not match.
    #[error("direct copy hash mismatch: {0}")]
    DirectCopyMismatch(Box<BlockMismatch>),

    /// The wrapped mirroring tool reported a failure code.
    #[error("{tool} mirroring failed with exit code {code} (raw {raw})")]
    MirrorFailed { tool: String, code: i32, raw: i32 },

    /// The launcher could not start because a runtime library is missing.
    #[error("{tool} cannot start: missing runtime library (exit code {raw})")]
    MissingRuntime { tool: String, raw: i32 },

    /// The launcher failed before or without running the wrapped command.
    #[error("{tool} failed with exit code {raw}")]
    LauncherFailed { tool: String, raw: i32 },
}

impl SpError {
    /// Process exit code for this condition.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Io(_) | Self::InvalidConfig(_) | Self::NoFreeDriveLetter => {
                exit_codes::PROCESSING_ERROR
            }
            Self::ToolMissing { .. } => exit_codes::TOOL_MISSING,
            Self::StreamNotFound { .. } => exit_codes::STREAM_NOT_FOUND,
            Self::LocalWriteMismatch(_) => exit_codes::LOCAL_WRITE_MISMATCH,
            Self::ShadowCopyMismatch(_) => exit_codes::SHADOW_COPY_MISMATCH,
            Self::DirectCopyMismatch(_) => exit_codes::DIRECT_COPY_MISMATCH,
            Self::MirrorFailed { code, .. } => u8::try_from(*code)
                .ok()
                .filter(|code| {
                    (exit_codes::MIRROR_FAILURE_MIN..=exit_codes::MIRROR_FAILURE_MAX)
                        .contains(code)
                })
                .unwrap_or(exit_codes::MIRROR_FAILURE_MAX),
            Self::MissingRuntime { .. } => exit_codes::MISSING_RUNTIME,
            Self::LauncherFailed { .. } => exit_codes::LAUNCHER_FAILURE,
        }
    }

    /// Block context for hash-mismatch variants.
    #[must_use]
    pub fn mismatch(&self) -> Option<&BlockMismatch> {
        match self {
            Self::LocalWriteMismatch(m)
            | Self::ShadowCopyMismatch(m)
            | Self::DirectCopyMismatch(m) => Some(m.as_ref()),
            _ => None,
        }
    }
}

/// Result alias using `SpError`.
pub type Result<T> = std::result::Result<T, SpError>;
