#![forbid(unsafe_code)]
//! `shadowproof`: block-level integrity check of shadow-copy backups.
//!
//! # Commands
//!
//! - `run`: write blocks into `Data/`, back the directory up through the
//!   shadow-copy launcher after every block and compare each block's hash
//!   in memory, on disk and in `ShadowBackup/`. Prints a JSON report.
//! - `restore`: mirror `ShadowBackup/` back onto `Data/`.
//!
//! The process exit code identifies the failure class (see `sp_error`).
//! Ctrl+C lets the block in flight finish and exits with success.

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sp_block::CacheMode;
use sp_error::{SpError, exit_codes};
use sp_harness::{CancelToken, HarnessConfig, IntegrityVerifier, VerificationReport, restore_backup};
use sp_spawn::{Robocopy, ShadowSpawn};
use sp_types::{BlockSize, MIB, TestConfiguration};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "shadowproof")]
#[command(version)]
#[command(about = "Block-level integrity verification of shadow-copy backups")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to stdout instead of stderr.
    #[arg(long, global = true)]
    log_stdout: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the verification loop.
    Run(RunArgs),
    /// Mirror the shadow backup back onto the data directory.
    Restore(CommonArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// JSON configuration file; flags override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding Data/, ShadowBackup/ and Backup/.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Mirroring program.
    #[arg(long)]
    mirror: Option<String>,
}

impl CommonArgs {
    fn load(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)
                .with_context(|| format!("loading configuration {}", path.display()))?,
            None => HarnessConfig::default(),
        };
        if let Some(dir) = &self.work_dir {
            config.work_dir.clone_from(dir);
        }
        if let Some(mirror) = &self.mirror {
            config.mirror_program.clone_from(mirror);
        }
        Ok(config)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CacheModeArg {
    Direct,
    WriteThrough,
    Buffered,
}

impl From<CacheModeArg> for CacheMode {
    fn from(arg: CacheModeArg) -> Self {
        match arg {
            CacheModeArg::Direct => Self::Direct,
            CacheModeArg::WriteThrough => Self::WriteThrough,
            CacheModeArg::Buffered => Self::Buffered,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Size of each data file in MiB (1 MiB blocks only).
    #[arg(long, conflicts_with = "blocks_per_stream")]
    size_mb: Option<u32>,

    /// Size of each data file in blocks.
    #[arg(long)]
    blocks_per_stream: Option<u32>,

    /// Number of data files.
    #[arg(long)]
    files: Option<u32>,

    /// Block size in bytes (a multiple of 4096).
    #[arg(long)]
    block_size: Option<u32>,

    /// Seed for block contents.
    #[arg(long)]
    seed: Option<u64>,

    /// Shadow-copy launcher (default: beside this executable).
    #[arg(long)]
    shadowspawn: Option<PathBuf>,

    /// Launcher verbosity.
    #[arg(long)]
    verbosity: Option<u8>,

    /// Also mirror Data/ to Backup/ without a snapshot and check it.
    #[arg(long)]
    direct_copy: bool,

    /// How data files are opened.
    #[arg(long, value_enum)]
    cache_mode: Option<CacheModeArg>,
}

impl RunArgs {
    fn load(&self) -> Result<HarnessConfig> {
        let mut config = self.common.load()?;
        config.test = self.geometry(config.test)?;
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(path) = &self.shadowspawn {
            config.shadowspawn = Some(path.clone());
        }
        if let Some(verbosity) = self.verbosity {
            config.shadow_verbosity = verbosity;
        }
        if self.direct_copy {
            config.direct_copy = true;
        }
        if let Some(mode) = self.cache_mode {
            config.cache_mode = mode.into();
        }
        Ok(config)
    }

    fn geometry(&self, current: TestConfiguration) -> Result<TestConfiguration> {
        let block_size = match self.block_size {
            Some(bytes) => BlockSize::new(bytes).map_err(invalid)?,
            None => current.block_size(),
        };
        let blocks_per_stream = match (self.size_mb, self.blocks_per_stream) {
            (Some(_), _) if block_size.get() != MIB => {
                return Err(SpError::InvalidConfig(
                    "--size-mb needs 1 MiB blocks, use --blocks-per-stream".to_owned(),
                )
                .into());
            }
            (Some(blocks), _) | (None, Some(blocks)) => blocks,
            (None, None) => current.blocks_per_stream(),
        };
        let files = self.files.unwrap_or(current.stream_count());
        Ok(TestConfiguration::new(blocks_per_stream, files, block_size).map_err(invalid)?)
    }
}

fn invalid(err: impl std::fmt::Display) -> SpError {
    SpError::InvalidConfig(err.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_stdout);

    let result = match &cli.command {
        Commands::Run(args) => run_verification(args),
        Commands::Restore(args) => run_restore(args),
    };
    match result {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS),
        Err(err) => {
            let code = exit_code_for(&err);
            error!(target: "sp::harness", exit_code = code, "{err:#}");
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: u8, log_stdout: bool) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let builder = fmt().with_env_filter(filter).with_target(true);
    if log_stdout {
        builder.with_writer(std::io::stdout).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<SpError>()
        .map_or(exit_codes::PROCESSING_ERROR, SpError::exit_code)
}

fn run_verification(args: &RunArgs) -> Result<()> {
    let config = args.load()?;
    let shadow_exe = config.shadowspawn_path()?;
    info!(
        target: "sp::harness",
        work_dir = %config.work_dir.display(),
        shadowspawn = %shadow_exe.display(),
        blocks_per_stream = config.test.blocks_per_stream(),
        files = config.test.stream_count(),
        block_size = config.test.block_size().get(),
        direct_copy = config.direct_copy,
        "starting verification"
    );

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        warn!(target: "sp::harness", "interrupt received, stopping after the current block");
        on_interrupt.cancel();
    })
    .context("installing Ctrl+C handler")?;

    let worker = std::thread::Builder::new()
        .name("verify".to_owned())
        .spawn(move || -> sp_error::Result<VerificationReport> {
            let mut shadow =
                ShadowSpawn::new(shadow_exe, config.shadow_verbosity, &config.mirror_program);
            let mut direct = Robocopy::new(&config.mirror_program);
            let mut verifier =
                IntegrityVerifier::new(config.test, config.layout(), config.seed, &mut shadow)
                    .with_cache_mode(config.cache_mode)
                    .with_cancel(cancel);
            if config.direct_copy {
                verifier = verifier.with_direct_copy(&mut direct);
            }
            verifier.run()
        })
        .context("spawning verification thread")?;

    let report = worker
        .join()
        .map_err(|_| anyhow!("verification thread panicked"))??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_restore(args: &CommonArgs) -> Result<()> {
    let config = args.load()?;
    let mut copier = Robocopy::new(&config.mirror_program);
    let report = restore_backup(&config.layout(), &mut copier)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
