#![forbid(unsafe_code)]
//! Block geometry for the ShadowProof harness.
//!
//! A run spreads `blocks_per_stream × stream_count` fixed-size blocks over
//! `stream_count` data files. Every block is addressed by one global
//! [`BlockIndex`]; [`translate`] maps it to the file ("stream") that holds
//! it, the block's position inside that file, and the byte offset to seek to.
//!
//! Getting this mapping wrong silently checks the wrong file, so it is kept
//! pure and exhaustively tested here, away from any I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One mebibyte.
pub const MIB: u32 = 1024 * 1024;

/// Default block size: one mebibyte.
pub const DEFAULT_BLOCK_SIZE: u32 = MIB;

/// Alignment required for cache-bypassing (`O_DIRECT` / `FILE_FLAG_NO_BUFFERING`) I/O.
///
/// Buffer addresses, offsets and lengths must all be multiples of this value.
pub const DIRECT_IO_ALIGNMENT: u32 = 4096;

/// Global logical block index across all streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockIndex(pub u64);

/// Index of a provisioned data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamIndex(pub u64);

/// Byte offset inside one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StreamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("geometry overflow: {field}")]
    Overflow { field: &'static str },
}

/// Validated block size (a nonzero multiple of [`DIRECT_IO_ALIGNMENT`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BlockSize(u32);

impl BlockSize {
    pub const DEFAULT: Self = Self(DEFAULT_BLOCK_SIZE);

    pub fn new(value: u32) -> Result<Self, ConfigError> {
        if value == 0 || value % DIRECT_IO_ALIGNMENT != 0 {
            return Err(ConfigError::InvalidField {
                field: "block_size",
                reason: "must be a nonzero multiple of 4096",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        // u32 always fits usize on the 32/64-bit targets this crate builds for.
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for BlockSize {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BlockSize> for u32 {
    fn from(size: BlockSize) -> Self {
        size.0
    }
}

/// Location of one block: which stream, which block inside it, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockAddress {
    pub block_index: BlockIndex,
    pub stream_index: StreamIndex,
    pub stream_block_index: u64,
    pub byte_offset: ByteOffset,
}

impl fmt::Display for BlockAddress {
    /// `<stream>.<stream block> @ <offset>`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} @ {}",
            self.stream_index, self.stream_block_index, self.byte_offset
        )
    }
}

/// Map a global block index to its stream, intra-stream block and byte offset.
///
/// `blocks_per_stream` must be nonzero; [`TestConfiguration`] guarantees it.
/// A zero capacity is treated as one block per stream (block `n` lands in
/// stream `n` at offset 0) rather than panicking.
#[must_use]
pub fn translate(
    block_index: BlockIndex,
    blocks_per_stream: u64,
    block_size: BlockSize,
) -> BlockAddress {
    let capacity = blocks_per_stream.max(1);
    let stream_index = block_index.0 / capacity;
    let stream_block_index = block_index.0 % capacity;
    BlockAddress {
        block_index,
        stream_index: StreamIndex(stream_index),
        stream_block_index,
        byte_offset: ByteOffset(stream_block_index.saturating_mul(u64::from(block_size.get()))),
    }
}

/// Immutable shape of one verification run.
///
/// `blocks_per_stream` is the file size expressed in blocks; with the
/// default 1 MiB block it equals the file size in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTestConfiguration", into = "RawTestConfiguration")]
pub struct TestConfiguration {
    blocks_per_stream: u32,
    stream_count: u32,
    block_size: BlockSize,
}

#[derive(Serialize, Deserialize)]
struct RawTestConfiguration {
    blocks_per_stream: u32,
    stream_count: u32,
    #[serde(default)]
    block_size: BlockSize,
}

impl TestConfiguration {
    pub fn new(
        blocks_per_stream: u32,
        stream_count: u32,
        block_size: BlockSize,
    ) -> Result<Self, ConfigError> {
        if blocks_per_stream == 0 {
            return Err(ConfigError::InvalidField {
                field: "blocks_per_stream",
                reason: "must be positive",
            });
        }
        if stream_count == 0 {
            return Err(ConfigError::InvalidField {
                field: "stream_count",
                reason: "must be positive",
            });
        }
        u64::from(blocks_per_stream)
            .checked_mul(u64::from(block_size.get()))
            .ok_or(ConfigError::Overflow {
                field: "stream_len_bytes",
            })?;
        Ok(Self {
            blocks_per_stream,
            stream_count,
            block_size,
        })
    }

    /// Configuration with the default 1 MiB block, where file size in MiB
    /// and blocks per stream coincide.
    pub fn with_size_mb(size_mb: u32, stream_count: u32) -> Result<Self, ConfigError> {
        Self::new(size_mb, stream_count, BlockSize::DEFAULT)
    }

    #[must_use]
    pub fn blocks_per_stream(&self) -> u32 {
        self.blocks_per_stream
    }

    #[must_use]
    pub fn stream_count(&self) -> u32 {
        self.stream_count
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn total_block_count(&self) -> u64 {
        u64::from(self.blocks_per_stream) * u64::from(self.stream_count)
    }

    #[must_use]
    pub fn stream_len_bytes(&self) -> u64 {
        u64::from(self.blocks_per_stream) * u64::from(self.block_size.get())
    }

    /// File size label used in data file names (whole MiB, rounded down).
    #[must_use]
    pub fn size_mb_label(&self) -> u64 {
        self.stream_len_bytes() / u64::from(MIB)
    }

    #[must_use]
    pub fn address_of(&self, block_index: BlockIndex) -> BlockAddress {
        translate(
            block_index,
            u64::from(self.blocks_per_stream),
            self.block_size,
        )
    }

    /// Iterate every block index of the run in order.
    pub fn block_indices(&self) -> impl Iterator<Item = BlockIndex> {
        (0..self.total_block_count()).map(BlockIndex)
    }

    /// Iterate every stream index of the run in order.
    pub fn stream_indices(&self) -> impl Iterator<Item = StreamIndex> {
        (0..u64::from(self.stream_count)).map(StreamIndex)
    }
}

impl Default for TestConfiguration {
    /// Two 256 MiB files of 1 MiB blocks.
    fn default() -> Self {
        Self {
            blocks_per_stream: 256,
            stream_count: 2,
            block_size: BlockSize::DEFAULT,
        }
    }
}

impl TryFrom<RawTestConfiguration> for TestConfiguration {
    type Error = ConfigError;

    fn try_from(raw: RawTestConfiguration) -> Result<Self, Self::Error> {
        Self::new(raw.blocks_per_stream, raw.stream_count, raw.block_size)
    }
}

impl From<TestConfiguration> for RawTestConfiguration {
    fn from(config: TestConfiguration) -> Self {
        Self {
            blocks_per_stream: config.blocks_per_stream,
            stream_count: config.stream_count,
            block_size: config.block_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB64: u64 = MIB as u64;

    #[test]
    fn two_by_two_layout() {
        let config = TestConfiguration::with_size_mb(2, 2).unwrap();
        assert_eq!(config.total_block_count(), 4);

        let expected = [(0, 0, 0), (0, 1, MIB64), (1, 0, 0), (1, 1, MIB64)];
        for (index, (stream, block, offset)) in expected.into_iter().enumerate() {
            let addr = config.address_of(BlockIndex(index as u64));
            assert_eq!(addr.stream_index, StreamIndex(stream), "block {index}");
            assert_eq!(addr.stream_block_index, block, "block {index}");
            assert_eq!(addr.byte_offset, ByteOffset(offset), "block {index}");
        }
    }

    #[test]
    fn display_matches_log_format() {
        let config = TestConfiguration::with_size_mb(256, 2).unwrap();
        let addr = config.address_of(BlockIndex(257));
        assert_eq!(addr.to_string(), "1.1 @ 1048576");
    }

    #[test]
    fn default_is_two_256_mib_files() {
        let config = TestConfiguration::default();
        assert_eq!(config, TestConfiguration::with_size_mb(256, 2).unwrap());
        assert_eq!(config.size_mb_label(), 256);
        assert_eq!(config.total_block_count(), 512);
    }

    #[test]
    fn block_size_validation() {
        assert!(BlockSize::new(4096).is_ok());
        assert!(BlockSize::new(MIB).is_ok());
        assert!(BlockSize::new(0).is_err());
        assert!(BlockSize::new(1000).is_err());
        assert_eq!(BlockSize::default().get(), MIB);
    }

    #[test]
    fn configuration_rejects_empty_geometry() {
        assert!(TestConfiguration::with_size_mb(0, 2).is_err());
        assert!(TestConfiguration::with_size_mb(2, 0).is_err());
    }

    #[test]
    fn explicit_block_size_decouples_size_label() {
        let config = TestConfiguration::new(512, 3, BlockSize::new(64 * 1024).unwrap()).unwrap();
        assert_eq!(config.stream_len_bytes(), 32 * MIB64);
        assert_eq!(config.size_mb_label(), 32);
        assert_eq!(config.total_block_count(), 1536);
        let addr = config.address_of(BlockIndex(513));
        assert_eq!(addr.stream_index, StreamIndex(1));
        assert_eq!(addr.byte_offset, ByteOffset(64 * 1024));
    }

    #[test]
    fn zero_capacity_does_not_panic() {
        let addr = translate(BlockIndex(7), 0, BlockSize::DEFAULT);
        assert_eq!(addr.stream_index, StreamIndex(7));
        assert_eq!(addr.stream_block_index, 0);
        assert_eq!(addr.byte_offset, ByteOffset(0));
    }

    #[test]
    fn configuration_serde_validates() {
        let config: TestConfiguration =
            serde_json::from_str(r#"{"blocks_per_stream":4,"stream_count":3}"#).unwrap();
        assert_eq!(config.block_size(), BlockSize::DEFAULT);
        assert_eq!(config.total_block_count(), 12);

        let bad = serde_json::from_str::<TestConfiguration>(
            r#"{"blocks_per_stream":0,"stream_count":3}"#,
        );
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn translation_recomposes_block_index(
            block in 0_u64..1_000_000_000,
            per_stream in 1_u64..100_000,
            size_pages in 1_u32..512,
        ) {
            let block_size = BlockSize::new(size_pages * DIRECT_IO_ALIGNMENT).unwrap();
            let addr = translate(BlockIndex(block), per_stream, block_size);
            prop_assert_eq!(addr.stream_index.0 * per_stream + addr.stream_block_index, block);
            prop_assert!(addr.stream_block_index < per_stream);
            prop_assert_eq!(
                addr.byte_offset.0,
                addr.stream_block_index * u64::from(block_size.get())
            );
        }

        #[test]
        fn stream_index_stays_in_range(
            per_stream in 1_u32..4096,
            streams in 1_u32..64,
            seed in any::<u64>(),
        ) {
            let config = TestConfiguration::with_size_mb(per_stream, streams).unwrap();
            let block = seed % config.total_block_count();
            let addr = config.address_of(BlockIndex(block));
            prop_assert!(addr.stream_index.0 < u64::from(streams));
        }

        #[test]
        fn translation_is_idempotent(block in any::<u32>(), per_stream in 1_u64..10_000) {
            let first = translate(BlockIndex(u64::from(block)), per_stream, BlockSize::DEFAULT);
            let second = translate(BlockIndex(u64::from(block)), per_stream, BlockSize::DEFAULT);
            prop_assert_eq!(first, second);
        }
    }
}
