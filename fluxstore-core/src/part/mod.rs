//! Immutable parts
//!
//! A part is a sorted run of blocks split into four sections:
//! - data: concatenated block payloads
//! - index: LZ4-compressed index blocks of marshaled block headers
//! - metaindex: LZ4-compressed metaindex rows, one per index block
//! - metadata: the part header as JSON
//!
//! Parts are built in memory by [`BlockStreamWriter`] and never change
//! afterwards. They are shared as `Arc<Part>`.

mod block;
mod block_header;
mod inmemory;
mod metaindex;
mod reader;
mod search;
mod writer;

pub use block::Block;
pub use block_header::BlockHeader;
pub use inmemory::InmemoryPart;
pub use metaindex::{unmarshal_metaindex_rows, MetaindexRow};
pub use reader::BlockStreamReader;
pub use search::{BlockRef, PartSearch};
pub use writer::BlockStreamWriter;

use crate::compression::decompress_section;
use crate::config::MAX_BLOCK_SIZE;
use crate::types::{format_timestamp, TimeRange, Timestamp};
use crate::{Result, StoreError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;

/// File holding block payloads
pub const DATA_FILENAME: &str = "data.bin";
/// File holding compressed index blocks
pub const INDEX_FILENAME: &str = "index.bin";
/// File holding the compressed metaindex
pub const METAINDEX_FILENAME: &str = "metaindex.bin";
/// File holding the part header
pub const METADATA_FILENAME: &str = "metadata.json";

/// Ordered producer of blocks
pub trait BlockSource {
    /// Advance to the next block.
    ///
    /// Returns `Ok(false)` once the source is exhausted. After an error the
    /// source is exhausted as well.
    fn next_block(&mut self) -> Result<bool>;

    /// Current block. Valid until the next call to `next_block`.
    fn block(&self) -> &Block;

    /// Mutable access to the current block
    fn block_mut(&mut self) -> &mut Block;
}

/// Consumer of merged blocks
pub trait BlockSink {
    /// Write `b`, folding it into `ph` and adding its rows to `rows_merged`
    fn write_external_block(&mut self, b: &mut Block, ph: &mut PartHeader, rows_merged: &AtomicU64);

    /// Flush everything buffered. Calling it twice is allowed.
    fn must_close(&mut self);
}

/// Aggregate statistics of a part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartHeader {
    /// Total number of rows
    pub rows_count: u64,
    /// Total number of blocks
    pub blocks_count: u64,
    /// Smallest timestamp in the part
    pub min_timestamp: Timestamp,
    /// Largest timestamp in the part
    pub max_timestamp: Timestamp,
}

impl Default for PartHeader {
    fn default() -> Self {
        Self {
            rows_count: 0,
            blocks_count: 0,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
        }
    }
}

impl PartHeader {
    /// Reset to the state of an empty part
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold a written block into the header
    pub fn update(&mut self, bh: &BlockHeader) {
        self.blocks_count += 1;
        self.rows_count += bh.rows_count as u64;
        self.min_timestamp = self.min_timestamp.min(bh.min_timestamp);
        self.max_timestamp = self.max_timestamp.max(bh.max_timestamp);
    }

    /// Time range covered by the part
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.min_timestamp, self.max_timestamp)
    }

    /// Read `metadata.json` from `dir`
    pub fn read_metadata(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILENAME);
        let data = std::fs::read(&path)?;
        let ph: PartHeader = serde_json::from_slice(&data).map_err(|e| {
            StoreError::InvalidFormat(format!("cannot parse {}: {}", path.display(), e))
        })?;
        if ph.rows_count < ph.blocks_count {
            return Err(StoreError::InvalidFormat(format!(
                "{}: rows count {} is smaller than blocks count {}",
                path.display(),
                ph.rows_count,
                ph.blocks_count
            )));
        }
        if ph.rows_count > 0 && ph.min_timestamp > ph.max_timestamp {
            return Err(StoreError::InvalidFormat(format!(
                "{}: min timestamp {} exceeds max timestamp {}",
                path.display(),
                ph.min_timestamp,
                ph.max_timestamp
            )));
        }
        Ok(ph)
    }

    /// Write `metadata.json` to `dir`
    pub fn write_metadata(&self, dir: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| StoreError::InvalidFormat(format!("cannot serialize part header: {}", e)))?;
        std::fs::write(dir.join(METADATA_FILENAME), data)?;
        Ok(())
    }
}

impl fmt::Display for PartHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows_count={}, blocks_count={}, min_timestamp={}, max_timestamp={}",
            self.rows_count,
            self.blocks_count,
            format_timestamp(self.min_timestamp),
            format_timestamp(self.max_timestamp)
        )
    }
}

/// Immutable part ready for reading
#[derive(Debug)]
pub struct Part {
    ph: PartHeader,
    data: Bytes,
    index: Bytes,
    metaindex: Vec<MetaindexRow>,
    path: Option<PathBuf>,
}

impl Part {
    /// Build a part from an in-memory part.
    ///
    /// Fails with `InvalidFormat` if the part holds no blocks.
    pub fn from_inmemory(mp: InmemoryPart) -> Result<Self> {
        if mp.ph.blocks_count == 0 {
            return Err(StoreError::InvalidFormat(
                "cannot build a part without blocks".into(),
            ));
        }
        let metaindex = unmarshal_metaindex_rows(&mp.metaindex)?;
        Ok(Self {
            ph: mp.ph,
            data: Bytes::from(mp.data),
            index: Bytes::from(mp.index),
            metaindex,
            path: None,
        })
    }

    /// Load a part stored with [`InmemoryPart::store_to_disk`]
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let ph = PartHeader::read_metadata(dir)?;
        let data = std::fs::read(dir.join(DATA_FILENAME))?;
        let index = std::fs::read(dir.join(INDEX_FILENAME))?;
        let metaindex_data = std::fs::read(dir.join(METAINDEX_FILENAME))?;
        let metaindex = unmarshal_metaindex_rows(&metaindex_data).map_err(|e| {
            StoreError::Corruption(format!(
                "cannot load metaindex of part {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(Self {
            ph,
            data: Bytes::from(data),
            index: Bytes::from(index),
            metaindex,
            path: Some(dir.to_path_buf()),
        })
    }

    /// Part header
    pub fn header(&self) -> &PartHeader {
        &self.ph
    }

    /// Metaindex rows sorted by tsid
    pub fn metaindex(&self) -> &[MetaindexRow] {
        &self.metaindex
    }

    /// Directory the part was loaded from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Size of the data and index sections in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len() + self.index.len()
    }

    /// Payload bytes of the block described by `bh`
    pub(crate) fn block_data(&self, bh: &BlockHeader) -> Result<&[u8]> {
        let range = section_range(bh.data_offset, bh.data_size, self.data.len()).ok_or_else(|| {
            StoreError::Corruption(format!(
                "block payload at offset {} with size {} is out of data section of {} bytes in part {}",
                bh.data_offset,
                bh.data_size,
                self.data.len(),
                self
            ))
        })?;
        Ok(&self.data[range])
    }

    /// Decompressed index block described by `mr`
    pub(crate) fn read_index_block(&self, mr: &MetaindexRow) -> Result<Vec<u8>> {
        let range = section_range(mr.index_block_offset, mr.index_block_size, self.index.len())
            .ok_or_else(|| {
                StoreError::Corruption(format!(
                    "index block at offset {} with size {} is out of index section of {} bytes in part {}",
                    mr.index_block_offset,
                    mr.index_block_size,
                    self.index.len(),
                    self
                ))
            })?;
        decompress_section(&self.index[range], MAX_BLOCK_SIZE).map_err(|e| {
            StoreError::Corruption(format!(
                "cannot decompress index block at offset {} in part {}: {}",
                mr.index_block_offset, self, e
            ))
        })
    }

    /// Decompress the index block of `mr` and unmarshal its headers
    pub(crate) fn read_block_headers(&self, mr: &MetaindexRow) -> Result<Vec<BlockHeader>> {
        let data = self.read_index_block(mr)?;
        if data.len() != mr.block_headers_count as usize * BlockHeader::MARSHALED_SIZE {
            return Err(StoreError::Corruption(format!(
                "index block at offset {} has {} bytes; want {} block headers in part {}",
                mr.index_block_offset,
                data.len(),
                mr.block_headers_count,
                self
            )));
        }
        let mut src = &data[..];
        let mut headers = Vec::with_capacity(mr.block_headers_count as usize);
        while !src.is_empty() {
            headers.push(BlockHeader::unmarshal(&mut src)?);
        }
        Ok(headers)
    }
}

/// Byte range `[offset, offset + size)` if it lies within a section of `len` bytes
fn section_range(offset: u64, size: u32, len: usize) -> Option<Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(size as usize)?;
    (end <= len).then_some(start..end)
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}", path.display()),
            None => write!(f, "inmemory part ({})", self.ph),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compress_section;
    use crate::tsid::Tsid;
    use crate::types::RawRow;
    use tempfile::TempDir;

    #[test]
    fn test_part_header_update() {
        let mut ph = PartHeader::default();
        assert_eq!(ph.min_timestamp, i64::MAX);
        ph.update(&BlockHeader {
            min_timestamp: 10,
            max_timestamp: 20,
            rows_count: 5,
            ..Default::default()
        });
        ph.update(&BlockHeader {
            min_timestamp: 5,
            max_timestamp: 15,
            rows_count: 3,
            ..Default::default()
        });
        assert_eq!(ph.rows_count, 8);
        assert_eq!(ph.blocks_count, 2);
        assert_eq!(ph.time_range(), TimeRange::new(5, 20));

        ph.reset();
        assert_eq!(ph, PartHeader::default());
    }

    #[test]
    fn test_store_and_open() {
        let dir = TempDir::new().unwrap();
        let mut rows: Vec<RawRow> = (0..100)
            .map(|i| RawRow::new(Tsid::with_metric_id(i % 3), i as i64 * 1000, i as f64 / 4.0))
            .collect();
        let mp = InmemoryPart::from_rows(&mut rows);
        mp.store_to_disk(dir.path()).unwrap();

        let part = Part::open(dir.path()).unwrap();
        assert_eq!(part.header().rows_count, 100);
        assert_eq!(part.header().blocks_count, 3);
        assert_eq!(part.path(), Some(dir.path()));
        assert_eq!(part.metaindex(), Part::from_inmemory(mp).unwrap().metaindex());
    }

    #[test]
    fn test_open_corrupted_metaindex() {
        let dir = TempDir::new().unwrap();
        let mut rows = vec![RawRow::new(Tsid::with_metric_id(1), 1, 1.0)];
        InmemoryPart::from_rows(&mut rows)
            .store_to_disk(dir.path())
            .unwrap();
        std::fs::write(dir.path().join(METAINDEX_FILENAME), b"garbage").unwrap();

        let err = Part::open(dir.path()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_index_block_offset_out_of_range() {
        let dir = TempDir::new().unwrap();
        let mut rows: Vec<RawRow> = (0..10)
            .map(|i| RawRow::new(Tsid::with_metric_id(1), i, i as f64))
            .collect();
        InmemoryPart::from_rows(&mut rows)
            .store_to_disk(dir.path())
            .unwrap();

        let path = dir.path().join(METAINDEX_FILENAME);
        let mut mrs = unmarshal_metaindex_rows(&std::fs::read(&path).unwrap()).unwrap();
        mrs[0].index_block_offset = u64::MAX - 4;
        let mut buf = Vec::new();
        for mr in &mrs {
            mr.marshal(&mut buf);
        }
        std::fs::write(&path, compress_section(&buf)).unwrap();

        let part = Part::open(dir.path()).unwrap();
        let err = part.read_block_headers(&part.metaindex()[0]).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("out of index section"));
    }

    #[test]
    fn test_block_payload_out_of_range() {
        let mut rows = vec![RawRow::new(Tsid::with_metric_id(1), 1, 1.0)];
        let part = Part::from_inmemory(InmemoryPart::from_rows(&mut rows)).unwrap();
        let headers = part.read_block_headers(&part.metaindex()[0]).unwrap();
        assert!(part.block_data(&headers[0]).is_ok());

        for (offset, size) in [(u64::MAX - 4, 16), (0, u32::MAX), (part.data.len() as u64, 1)] {
            let bh = BlockHeader {
                data_offset: offset,
                data_size: size,
                ..headers[0]
            };
            assert!(part.block_data(&bh).unwrap_err().is_corruption());
        }
    }

    #[test]
    fn test_empty_inmemory_part_is_rejected() {
        let mp = InmemoryPart::from_rows(&mut []);
        assert_eq!(mp.ph, PartHeader::default());
        assert!(matches!(
            Part::from_inmemory(mp),
            Err(StoreError::InvalidFormat(_))
        ));
    }
}
