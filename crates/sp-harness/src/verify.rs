//! The block integrity verification loop.
//!
//! A run walks `Idle → Cleaning → Provisioning → Iterating` and ends in
//! `Completed`, `Cancelled` or `Fatal`. Each block is generated, written
//! through its stream, read back from `Data/`, copied by the shadow copier
//! and read back from `ShadowBackup/`. Every reading must hash the same as
//! the block in memory; the first disagreement ends the run.

use crate::layout::{WorkspaceLayout, data_file_name};
use serde::Serialize;
use sp_block::{
    AlignedBlock, BlockGenerator, BlockHash, CacheMode, StreamHandle, StreamTable, hash_block,
    read_block_at,
};
use sp_error::{BlockMismatch, Result, SpError};
use sp_spawn::{CopyReport, DirectoryCopier};
use sp_types::{BlockAddress, BlockIndex, TestConfiguration};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared stop request, polled once per block.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Cleaning,
    Provisioning,
    Iterating,
    Completed,
    Cancelled,
    Fatal,
}

/// Non-fatal end of a run. Both are reported as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Summary printed at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub config: TestConfiguration,
    pub seed: u64,
    pub outcome: RunOutcome,
    pub blocks_total: u64,
    pub blocks_verified: u64,
    pub shadow_copies: u64,
    pub direct_copies: u64,
    /// Cache mode the data files were opened with.
    pub cache_mode: CacheMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_shadow_copy: Option<CopyReport>,
    pub duration_us: u64,
}

#[derive(Debug, Default)]
struct Progress {
    blocks_verified: u64,
    shadow_copies: u64,
    direct_copies: u64,
    last_shadow_copy: Option<CopyReport>,
}

/// One configured verification run.
pub struct IntegrityVerifier<'a> {
    config: TestConfiguration,
    layout: WorkspaceLayout,
    generator: BlockGenerator,
    cache_mode: CacheMode,
    shadow: &'a mut dyn DirectoryCopier,
    direct: Option<&'a mut dyn DirectoryCopier>,
    cancel: CancelToken,
    state: RunState,
}

impl<'a> IntegrityVerifier<'a> {
    #[must_use]
    pub fn new(
        config: TestConfiguration,
        layout: WorkspaceLayout,
        seed: u64,
        shadow: &'a mut dyn DirectoryCopier,
    ) -> Self {
        Self {
            config,
            layout,
            generator: BlockGenerator::new(seed),
            cache_mode: CacheMode::Direct,
            shadow,
            direct: None,
            cancel: CancelToken::new(),
            state: RunState::Idle,
        }
    }

    /// Also mirror `Data/` to `Backup/` with `copier` and check every block there.
    #[must_use]
    pub fn with_direct_copy(mut self, copier: &'a mut dyn DirectoryCopier) -> Self {
        self.direct = Some(copier);
        self
    }

    #[must_use]
    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run to completion, cancellation or the first fatal condition.
    pub fn run(&mut self) -> Result<VerificationReport> {
        let start = Instant::now();
        let result = self.run_stages(start);
        if result.is_err() {
            self.enter(RunState::Fatal);
        }
        result
    }

    fn enter(&mut self, state: RunState) {
        debug!(
            target: "sp::harness::verify",
            from = ?self.state,
            to = ?state,
            "state change"
        );
        self.state = state;
    }

    fn run_stages(&mut self, start: Instant) -> Result<VerificationReport> {
        self.shadow.ensure_available()?;
        if let Some(direct) = &self.direct {
            direct.ensure_available()?;
        }

        self.enter(RunState::Cleaning);
        self.layout.recreate()?;

        self.enter(RunState::Provisioning);
        let config = self.config;
        let mut streams = StreamTable::provision(
            &self.layout.data_dir(),
            &config,
            self.cache_mode,
            |stream| data_file_name(&config, stream),
        )?;
        let cache_mode = streams
            .iter()
            .map(StreamHandle::mode)
            .next()
            .unwrap_or(self.cache_mode);
        if cache_mode != self.cache_mode {
            warn!(
                target: "sp::harness::verify",
                requested = ?self.cache_mode,
                effective = ?cache_mode,
                "data files opened with a weaker cache mode"
            );
        }

        self.enter(RunState::Iterating);
        info!(
            target: "sp::harness::verify",
            blocks = config.total_block_count(),
            streams = config.stream_count(),
            block_size = config.block_size().get(),
            seed = self.generator.seed(),
            "writing blocks"
        );
        let mut block = AlignedBlock::new(config.block_size());
        let mut readback = AlignedBlock::new(config.block_size());
        let mut progress = Progress::default();
        let mut outcome = RunOutcome::Completed;

        for block_index in config.block_indices() {
            if self.cancel.is_cancelled() {
                info!(
                    target: "sp::harness::verify",
                    next_block = block_index.0,
                    "cancellation requested, stopping"
                );
                outcome = RunOutcome::Cancelled;
                break;
            }
            self.verify_block(
                block_index,
                &mut streams,
                &mut block,
                &mut readback,
                &mut progress,
            )?;
        }
        streams.close_all();

        self.enter(match outcome {
            RunOutcome::Completed => RunState::Completed,
            RunOutcome::Cancelled => RunState::Cancelled,
        });
        let report = VerificationReport {
            config,
            seed: self.generator.seed(),
            outcome,
            blocks_total: config.total_block_count(),
            blocks_verified: progress.blocks_verified,
            shadow_copies: progress.shadow_copies,
            direct_copies: progress.direct_copies,
            cache_mode,
            last_shadow_copy: progress.last_shadow_copy,
            duration_us: u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
        };
        info!(
            target: "sp::harness::verify",
            outcome = ?report.outcome,
            blocks_verified = report.blocks_verified,
            duration_us = report.duration_us,
            "verification finished"
        );
        Ok(report)
    }

    fn verify_block(
        &mut self,
        block_index: BlockIndex,
        streams: &mut StreamTable,
        block: &mut AlignedBlock,
        readback: &mut AlignedBlock,
        progress: &mut Progress,
    ) -> Result<()> {
        self.generator.fill(block_index, block.as_mut_slice());
        let expected = hash_block(block.as_slice());
        debug!(
            target: "sp::harness::verify",
            block = block_index.0,
            hash = %expected,
            "memory"
        );

        let address = self.config.address_of(block_index);
        let stream = streams.get_mut(address.stream_index, block_index.0)?;
        info!(
            target: "sp::harness::verify",
            block = block_index.0,
            path = %stream.path().display(),
            address = %address,
            "write"
        );
        stream.write_block(address.byte_offset, block.as_slice())?;

        let data_dir = self.layout.data_dir();
        self.check_readback(&data_dir, address, expected, readback, SpError::LocalWriteMismatch)?;

        if let Some(direct) = self.direct.as_deref_mut() {
            let direct_dir = self.layout.direct_dir();
            direct.copy_dir(&data_dir, &direct_dir)?;
            progress.direct_copies += 1;
            self.check_readback(&direct_dir, address, expected, readback, SpError::DirectCopyMismatch)?;
        }

        let shadow_dir = self.layout.shadow_dir();
        let copy = self.shadow.copy_dir(&data_dir, &shadow_dir)?;
        progress.shadow_copies += 1;
        progress.last_shadow_copy = Some(copy);
        self.check_readback(&shadow_dir, address, expected, readback, SpError::ShadowCopyMismatch)?;

        progress.blocks_verified += 1;
        Ok(())
    }

    /// Read `address` from the copy of its stream in `dir` and compare hashes.
    fn check_readback(
        &self,
        dir: &Path,
        address: BlockAddress,
        expected: BlockHash,
        readback: &mut AlignedBlock,
        mismatch: fn(Box<BlockMismatch>) -> SpError,
    ) -> Result<()> {
        let path = WorkspaceLayout::stream_path(dir, &self.config, address.stream_index);
        read_block_at(&path, address.byte_offset, readback.as_mut_slice())?;
        let actual = hash_block(readback.as_slice());
        debug!(
            target: "sp::harness::verify",
            block = address.block_index.0,
            path = %path.display(),
            hash = %actual,
            "readback"
        );
        if actual == expected {
            return Ok(());
        }
        Err(mismatch(Box::new(BlockMismatch {
            path,
            block_index: address.block_index.0,
            stream_index: address.stream_index.0,
            stream_block_index: address.stream_block_index,
            byte_offset: address.byte_offset.0,
            expected_hash: expected.to_hex(),
            actual_hash: actual.to_hex(),
        })))
    }
}
