//! Command lines for the shadow-copy launcher and the mirroring tool.

use crate::drive::pick_free_drive;
use crate::exit::{MirrorExit, ShadowExit};
use crate::runner::{TracingSink, run};
use serde::Serialize;
use sp_error::{Result, SpError};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Mirror, no progress, no directory/header noise, include same files,
/// one retry after one second.
pub const MIRROR_FLAGS: [&str; 7] = ["/MIR", "/NP", "/ndl", "/njh", "/IS", "/r:1", "/w:1"];

/// Default launcher verbosity.
pub const DEFAULT_SHADOW_VERBOSITY: u8 = 2;

/// Arguments for `robocopy <from> <to>` with [`MIRROR_FLAGS`].
#[must_use]
pub fn mirror_args(from: &Path, to: &Path) -> Vec<OsString> {
    let mut args = vec![from.as_os_str().to_owned(), to.as_os_str().to_owned()];
    args.extend(MIRROR_FLAGS.iter().map(OsString::from));
    args
}

/// Outcome of one successful directory copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyReport {
    pub tool: String,
    pub raw_exit_code: i32,
    /// Mirroring tool status (0–6) behind the raw code.
    pub mirror_code: i32,
    pub elapsed_us: u64,
}

/// Something that copies one directory tree onto another.
///
/// Fatal tool outcomes come back as `Err`; an `Ok` report means the copy
/// is complete and the destination can be compared.
pub trait DirectoryCopier {
    fn name(&self) -> &str;

    /// Fail early if the copier cannot possibly run.
    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }

    fn copy_dir(&mut self, source: &Path, destination: &Path) -> Result<CopyReport>;
}

fn report_failure(tool: &str, sink: &TracingSink, err: &SpError) {
    error!(
        target: "sp::spawn::tools",
        tool,
        error = %err,
        stderr_tail = ?sink.stderr_tail(),
        "copy tool failed"
    );
}

/// `shadowspawn`: snapshot a directory, map the snapshot to a free drive
/// letter and mirror it with the wrapped tool.
#[derive(Debug, Clone)]
pub struct ShadowSpawn {
    exe: PathBuf,
    verbosity: u8,
    mirror_program: OsString,
}

impl ShadowSpawn {
    pub const NAME: &'static str = "shadowspawn";

    #[must_use]
    pub fn new(exe: impl Into<PathBuf>, verbosity: u8, mirror_program: impl AsRef<OsStr>) -> Self {
        Self {
            exe: exe.into(),
            verbosity,
            mirror_program: mirror_program.as_ref().to_owned(),
        }
    }

    #[must_use]
    pub fn exe(&self) -> &Path {
        &self.exe
    }

    /// Fail with `ToolMissing` if the launcher executable is absent.
    pub fn ensure_installed(&self) -> Result<()> {
        if self.exe.is_file() {
            Ok(())
        } else {
            Err(SpError::ToolMissing {
                path: self.exe.clone(),
            })
        }
    }

    /// `/verbosity=N <source> X: robocopy X:\ <destination> <flags>`
    #[must_use]
    pub fn args(&self, source: &Path, drive: char, destination: &Path) -> Vec<OsString> {
        let drive = drive.to_ascii_uppercase();
        let mut args = vec![
            OsString::from(format!("/verbosity={}", self.verbosity)),
            source.as_os_str().to_owned(),
            OsString::from(format!("{drive}:")),
            self.mirror_program.clone(),
        ];
        args.extend(mirror_args(
            Path::new(&format!("{drive}:\\")),
            destination,
        ));
        args
    }
}

impl DirectoryCopier for ShadowSpawn {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn ensure_available(&self) -> Result<()> {
        self.ensure_installed()
    }

    fn copy_dir(&mut self, source: &Path, destination: &Path) -> Result<CopyReport> {
        let drive = pick_free_drive()?;
        info!(
            target: "sp::spawn::tools",
            source = %source.display(),
            destination = %destination.display(),
            drive = %drive,
            "shadow copy"
        );
        let sink = TracingSink::new(Self::NAME);
        let outcome = run(&self.exe, self.args(source, drive, destination), &sink)?;
        let decoded = ShadowExit::decode(outcome.exit_code);
        let decoded = match decoded.check(Self::NAME, outcome.exit_code) {
            Ok(decoded) => decoded,
            Err(err) => {
                report_failure(Self::NAME, &sink, &err);
                return Err(err);
            }
        };
        Ok(CopyReport {
            tool: Self::NAME.to_owned(),
            raw_exit_code: outcome.exit_code,
            mirror_code: decoded.mirror_code().unwrap_or(0),
            elapsed_us: u64::try_from(outcome.elapsed.as_micros()).unwrap_or(u64::MAX),
        })
    }
}

/// Plain `robocopy` mirror without a snapshot.
#[derive(Debug, Clone)]
pub struct Robocopy {
    program: OsString,
}

impl Robocopy {
    pub const NAME: &'static str = "robocopy";

    #[must_use]
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
        }
    }
}

impl Default for Robocopy {
    fn default() -> Self {
        Self::new(Self::NAME)
    }
}

impl DirectoryCopier for Robocopy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn copy_dir(&mut self, source: &Path, destination: &Path) -> Result<CopyReport> {
        let sink = TracingSink::new(Self::NAME);
        let outcome = run(&self.program, mirror_args(source, destination), &sink)?;
        let status = match MirrorExit(outcome.exit_code).check(Self::NAME) {
            Ok(status) => status,
            Err(err) => {
                report_failure(Self::NAME, &sink, &err);
                return Err(err);
            }
        };
        info!(
            target: "sp::spawn::tools",
            status = %status,
            "mirror complete"
        );
        Ok(CopyReport {
            tool: Self::NAME.to_owned(),
            raw_exit_code: outcome.exit_code,
            mirror_code: status.0,
            elapsed_us: u64::try_from(outcome.elapsed.as_micros()).unwrap_or(u64::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn mirror_command_line() {
        let args = mirror_args(Path::new("from"), Path::new("to"));
        assert_eq!(
            strings(&args),
            vec!["from", "to", "/MIR", "/NP", "/ndl", "/njh", "/IS", "/r:1", "/w:1"]
        );
    }

    #[test]
    fn shadow_command_line_embeds_mirror_command() {
        let tool = ShadowSpawn::new("shadowspawn.exe", 2, "robocopy");
        let args = tool.args(Path::new("Data"), 'q', Path::new("ShadowBackup"));
        assert_eq!(
            strings(&args),
            vec![
                "/verbosity=2",
                "Data",
                "Q:",
                "robocopy",
                "Q:\\",
                "ShadowBackup",
                "/MIR",
                "/NP",
                "/ndl",
                "/njh",
                "/IS",
                "/r:1",
                "/w:1",
            ]
        );
    }

    #[test]
    fn missing_launcher_is_tool_missing() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShadowSpawn::new(dir.path().join("shadowspawn.exe"), 2, "robocopy");
        let err = tool.ensure_installed().unwrap_err();
        assert!(matches!(err, SpError::ToolMissing { .. }));
        assert_eq!(err.exit_code(), 3);

        std::fs::write(tool.exe(), b"").unwrap();
        assert!(tool.ensure_installed().is_ok());
        assert!(tool.ensure_available().is_ok());
    }

    #[test]
    fn names() {
        assert_eq!(Robocopy::default().name(), "robocopy");
        assert_eq!(
            ShadowSpawn::new("x", DEFAULT_SHADOW_VERBOSITY, "robocopy").name(),
            "shadowspawn"
        );
    }
}
