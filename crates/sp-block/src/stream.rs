//! Provisioned data files ("streams").
//!
//! Each stream is opened write-through and, where the platform and the
//! filesystem allow it, with the page cache bypassed. OS-level write caching
//! could otherwise satisfy a readback from memory and hide a defect in the
//! layer under test.

use serde::{Deserialize, Serialize};
use sp_error::{Result, SpError};
use sp_types::{ByteOffset, StreamIndex, TestConfiguration};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How a stream's writes reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Write-through with the OS page cache bypassed
    /// (`O_DIRECT | O_DSYNC`, `FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH`).
    Direct,
    /// Write-through only (`O_DSYNC`, `FILE_FLAG_WRITE_THROUGH`).
    WriteThrough,
    /// Plain buffered I/O.
    Buffered,
}

impl CacheMode {
    #[cfg(target_os = "linux")]
    fn custom_flags(self) -> i32 {
        match self {
            Self::Direct => libc::O_DIRECT | libc::O_DSYNC,
            Self::WriteThrough => libc::O_DSYNC,
            Self::Buffered => 0,
        }
    }

    // No O_DIRECT outside Linux; write-through is the closest available.
    #[cfg(all(unix, not(target_os = "linux")))]
    fn custom_flags(self) -> i32 {
        match self {
            Self::Direct | Self::WriteThrough => libc::O_DSYNC,
            Self::Buffered => 0,
        }
    }

    #[cfg(windows)]
    fn custom_flags(self) -> u32 {
        const FILE_FLAG_WRITE_THROUGH: u32 = 0x8000_0000;
        const FILE_FLAG_NO_BUFFERING: u32 = 0x2000_0000;
        match self {
            Self::Direct => FILE_FLAG_WRITE_THROUGH | FILE_FLAG_NO_BUFFERING,
            Self::WriteThrough => FILE_FLAG_WRITE_THROUGH,
            Self::Buffered => 0,
        }
    }

    fn weaker(self) -> Option<Self> {
        match self {
            Self::Direct => Some(Self::WriteThrough),
            Self::WriteThrough | Self::Buffered => None,
        }
    }
}

fn stream_open_options(mode: CacheMode) -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(mode.custom_flags());
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_SHARE_READ: u32 = 0x0000_0001;
        options
            .share_mode(FILE_SHARE_READ)
            .custom_flags(mode.custom_flags());
    }
    #[cfg(not(any(unix, windows)))]
    let _ = mode;
    options
}

/// One open data file.
#[derive(Debug)]
pub struct StreamHandle {
    index: StreamIndex,
    path: PathBuf,
    file: File,
    mode: CacheMode,
}

impl StreamHandle {
    /// Create (truncating) the file at `path`, pre-sized to `len` bytes.
    ///
    /// If the filesystem rejects the requested cache mode (tmpfs refuses
    /// `O_DIRECT` with `EINVAL`), the next weaker mode is tried.
    pub fn create(index: StreamIndex, path: &Path, len: u64, mode: CacheMode) -> Result<Self> {
        let mut mode = mode;
        let file = loop {
            match stream_open_options(mode).open(path) {
                Ok(file) => break file,
                Err(err) if err.kind() == io::ErrorKind::InvalidInput => {
                    let Some(weaker) = mode.weaker() else {
                        return Err(err.into());
                    };
                    warn!(
                        target: "sp::block::stream",
                        path = %path.display(),
                        rejected = ?mode,
                        fallback = ?weaker,
                        "filesystem rejected cache mode"
                    );
                    mode = weaker;
                }
                Err(err) => return Err(err.into()),
            }
        };
        file.set_len(len)?;
        info!(
            target: "sp::block::stream",
            stream = index.0,
            path = %path.display(),
            len,
            ?mode,
            "stream created"
        );
        Ok(Self {
            index,
            path: path.to_path_buf(),
            file,
            mode,
        })
    }

    #[must_use]
    pub fn index(&self) -> StreamIndex {
        self.index
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cache mode the file was actually opened with, after any fallback.
    #[must_use]
    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Seek to `offset` and write the whole of `block`.
    pub fn write_block(&mut self, offset: ByteOffset, block: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset.0))?;
        self.file.write_all(block)?;
        Ok(())
    }

    fn close(self) {
        if let Err(err) = self.file.sync_all() {
            debug!(
                target: "sp::block::stream",
                stream = self.index.0,
                error = %err,
                "sync on close failed (ignored)"
            );
        }
    }
}

/// Open streams keyed by stream index.
///
/// Owned by exactly one verification loop; handles are closed best-effort
/// when the table is dropped.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: BTreeMap<StreamIndex, StreamHandle>,
}

impl StreamTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create one stream per index of `config` inside `dir`.
    ///
    /// `file_name` maps a stream index to the file name used for it.
    pub fn provision<F>(
        dir: &Path,
        config: &TestConfiguration,
        mode: CacheMode,
        file_name: F,
    ) -> Result<Self>
    where
        F: Fn(StreamIndex) -> String,
    {
        let mut table = Self::new();
        for index in config.stream_indices() {
            let path = dir.join(file_name(index));
            let handle = StreamHandle::create(index, &path, config.stream_len_bytes(), mode)?;
            table.insert(handle);
        }
        Ok(table)
    }

    pub fn insert(&mut self, handle: StreamHandle) -> Option<StreamHandle> {
        self.streams.insert(handle.index(), handle)
    }

    /// Look up a stream for writing; a missing handle is a `StreamNotFound`.
    pub fn get_mut(&mut self, index: StreamIndex, block: u64) -> Result<&mut StreamHandle> {
        self.streams
            .get_mut(&index)
            .ok_or(SpError::StreamNotFound {
                stream: index.0,
                block,
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamHandle> {
        self.streams.values()
    }

    /// Close every handle, ignoring failures.
    pub fn close_all(&mut self) {
        for (_, handle) in std::mem::take(&mut self.streams) {
            handle.close();
        }
    }
}

impl Drop for StreamTable {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Open `path` read-only, seek to `offset` and fill `buf`.
///
/// Used for every readback so that each comparison goes through a fresh
/// handle rather than the writer's.
pub fn read_block_at(path: &Path, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset.0))?;
    file.read_exact(buf)?;
    Ok(())
}
