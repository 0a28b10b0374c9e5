//! Exit-code decoding for the shadow-copy launcher and the mirroring tool.
//!
//! The launcher multiplexes two facts into one integer. When the wrapped
//! command ran, the launcher exits with that command's status OR'ed with
//! [`SHADOW_WRAPPED_FLAG`]; otherwise it exits with its own status (1 for a
//! processing error, 2 for a usage error, or an NTSTATUS when the process
//! could not even load).
//!
//! The wrapped status follows robocopy's documented table. That table is
//! tool-specific: retargeting the harness at another mirroring tool means
//! replacing [`MirrorExit`], not reusing its thresholds.

use serde::Serialize;
use sp_error::{Result, SpError};
use std::fmt;

/// Set on the launcher's exit code when the wrapped command ran.
pub const SHADOW_WRAPPED_FLAG: i32 = 0x8000;

/// `STATUS_DLL_NOT_FOUND` (0xC0000135) as a signed exit code: the launcher's
/// C++ runtime is not installed.
#[allow(clippy::cast_possible_wrap)]
pub const MISSING_RUNTIME_SENTINEL: i32 = 0xC000_0135_u32 as i32;

/// Coarse classification of a decoded exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Informational,
    Fatal,
}

/// robocopy exit status.
///
/// Bits 0–2 describe what changed (copied, extra, mismatched); 8 and 16
/// signal copy failures. Codes below [`MirrorExit::FAILURE_THRESHOLD`] are
/// treated as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MirrorExit(pub i32);

impl MirrorExit {
    pub const FAILURE_THRESHOLD: i32 = 7;

    #[must_use]
    pub fn is_failure(self) -> bool {
        self.0 < 0 || self.0 >= Self::FAILURE_THRESHOLD
    }

    #[must_use]
    pub fn severity(self) -> Severity {
        match self.0 {
            0 => Severity::Success,
            _ if self.is_failure() => Severity::Fatal,
            _ => Severity::Informational,
        }
    }

    /// Check a direct mirroring invocation.
    pub fn check(self, tool: &str) -> Result<Self> {
        if self.is_failure() {
            return Err(SpError::MirrorFailed {
                tool: tool.to_owned(),
                code: self.0,
                raw: self.0,
            });
        }
        Ok(self)
    }
}

impl fmt::Display for MirrorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            return write!(f, "{}: abnormal termination", self.0);
        }
        if self.0 == 0 {
            return write!(f, "0: no change");
        }
        let mut parts = Vec::new();
        if self.0 & 0x01 != 0 {
            parts.push("files copied");
        }
        if self.0 & 0x02 != 0 {
            parts.push("extra files");
        }
        if self.0 & 0x04 != 0 {
            parts.push("mismatched files");
        }
        if self.0 & 0x08 != 0 {
            parts.push("copy failures");
        }
        if self.0 & 0x10 != 0 {
            parts.push("fatal error");
        }
        write!(f, "{}: {}", self.0, parts.join(", "))
    }
}

/// Decoded shadow-copy launcher exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum ShadowExit {
    /// Launcher and wrapped command both succeeded with nothing to report.
    Clean,
    /// Wrapped command succeeded with an informational status (1–6).
    Informational(i32),
    /// Wrapped command ran and failed (status ≥ 7).
    MirrorFailure(i32),
    /// Launcher could not load its runtime.
    MissingRuntime,
    /// Launcher failed without running the wrapped command.
    LauncherFailure(i32),
}

impl ShadowExit {
    /// Decode a raw launcher exit code.
    ///
    /// `0x8000` itself is the flag with a zero wrapped status and decodes
    /// to [`ShadowExit::Clean`].
    #[must_use]
    pub fn decode(raw: i32) -> Self {
        if raw >= SHADOW_WRAPPED_FLAG {
            let wrapped = MirrorExit(raw - SHADOW_WRAPPED_FLAG);
            return match wrapped.severity() {
                Severity::Success => Self::Clean,
                Severity::Informational => Self::Informational(wrapped.0),
                Severity::Fatal => Self::MirrorFailure(wrapped.0),
            };
        }
        match raw {
            0 => Self::Clean,
            MISSING_RUNTIME_SENTINEL => Self::MissingRuntime,
            other => Self::LauncherFailure(other),
        }
    }

    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::Clean => Severity::Success,
            Self::Informational(_) => Severity::Informational,
            Self::MirrorFailure(_) | Self::MissingRuntime | Self::LauncherFailure(_) => {
                Severity::Fatal
            }
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self.severity() != Severity::Fatal
    }

    /// Wrapped mirroring status, where the wrapped command ran.
    #[must_use]
    pub fn mirror_code(self) -> Option<i32> {
        match self {
            Self::Clean => Some(0),
            Self::Informational(code) | Self::MirrorFailure(code) => Some(code),
            Self::MissingRuntime | Self::LauncherFailure(_) => None,
        }
    }

    /// Turn fatal decodings into the matching [`SpError`].
    pub fn check(self, tool: &str, raw: i32) -> Result<Self> {
        match self {
            Self::Clean | Self::Informational(_) => Ok(self),
            Self::MirrorFailure(code) => Err(SpError::MirrorFailed {
                tool: tool.to_owned(),
                code,
                raw,
            }),
            Self::MissingRuntime => Err(SpError::MissingRuntime {
                tool: tool.to_owned(),
                raw,
            }),
            Self::LauncherFailure(_) => Err(SpError::LauncherFailed {
                tool: tool.to_owned(),
                raw,
            }),
        }
    }
}
