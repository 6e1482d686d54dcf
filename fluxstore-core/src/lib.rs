//! FluxStore Core - merge and search engine for columnar time-series parts
//!
//! Samples are stored in immutable, sorted *parts*. A part holds compressed
//! blocks of `(timestamp, value)` rows, each block belonging to one series
//! identified by a [`Tsid`].
//!
//! # Architecture
//!
//! - **Parts**: blocks, block headers, index blocks and the metaindex
//! - **Merge**: k-way merge of block streams into a new part (compaction),
//!   resolving overlaps and dropping deleted series
//! - **Search**: k-way merge of filtered per-part searches into one ordered
//!   block stream, reassembled into series by the caller
//! - **Partition**: the published part list of one time window

pub mod compression;
pub mod decimal;
pub mod merge;
pub mod part;
pub mod partition;
pub mod search;

mod error;
mod tsid;
mod types;

pub use error::{Result, StoreError};
pub use merge::{merge_block_streams, stop_channel, MergeCounters, StopHandle, StopSignal};
pub use part::{
    Block, BlockHeader, BlockRef, BlockSink, BlockSource, BlockStreamReader, BlockStreamWriter,
    InmemoryPart, MetaindexRow, Part, PartHeader, PartSearch,
};
pub use partition::Partition;
pub use search::{unpack_series, PartitionSearch, SeriesData};
pub use tsid::Tsid;
pub use types::*;

/// FluxStore version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Storage limits
pub mod config {
    /// Maximum number of rows per block
    pub const MAX_ROWS_PER_BLOCK: usize = 8 * 1024;

    /// Maximum size of a block payload or an uncompressed index block (64KB)
    pub const MAX_BLOCK_SIZE: usize = 8 * MAX_ROWS_PER_BLOCK;

    /// Precision of rows that do not ask for less (lossless)
    pub const DEFAULT_PRECISION_BITS: u8 = 64;
}
