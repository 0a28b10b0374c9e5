#![forbid(unsafe_code)]
//! Block data and stream I/O for the verification loop.
//!
//! - [`AlignedBlock`]: the single reused block buffer, aligned for
//!   cache-bypassing I/O.
//! - [`BlockGenerator`]: deterministic pseudo-random block contents.
//! - [`BlockHash`]: BLAKE3 content hash used for every comparison.
//! - [`StreamTable`]: provisioned data files opened write-through, keyed by
//!   stream index.

pub mod buffer;
pub mod stream;

pub use buffer::{AlignedBlock, BlockGenerator, BlockHash, hash_block};
pub use stream::{CacheMode, StreamHandle, StreamTable, read_block_at};
