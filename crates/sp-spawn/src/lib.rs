#![forbid(unsafe_code)]
//! Orchestration of the external copy tools.
//!
//! The shadow-copy launcher (`shadowspawn`) snapshots a directory, exposes
//! the snapshot on a free drive letter and runs a wrapped mirroring command
//! (`robocopy`) against it. This crate runs those tools without a shell,
//! streams their output into `tracing`, and decodes their exit codes.

pub mod drive;
pub mod exit;
pub mod runner;
pub mod tools;

pub use drive::{free_drive_letter, in_use_drive_letters, pick_free_drive};
pub use exit::{MISSING_RUNTIME_SENTINEL, MirrorExit, SHADOW_WRAPPED_FLAG, Severity, ShadowExit};
pub use runner::{LineSink, ProcessOutcome, TracingSink, run};
pub use tools::{
    CopyReport, DEFAULT_SHADOW_VERBOSITY, DirectoryCopier, MIRROR_FLAGS, Robocopy, ShadowSpawn,
    mirror_args,
};
