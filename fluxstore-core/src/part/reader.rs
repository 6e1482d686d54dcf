//! Sequential block reader over a part

use super::block::Block;
use super::block_header::BlockHeader;
use super::metaindex::MetaindexRow;
use super::{BlockSource, InmemoryPart, Part};
use crate::tsid::Tsid;
use crate::{Result, StoreError};
use std::fmt;
use std::sync::Arc;

/// Reads every block of a part in stored order, checking the part for
/// consistency along the way.
pub struct BlockStreamReader {
    part: Arc<Part>,
    block: Block,
    tsid_prev: Tsid,

    mr_idx: usize,
    mr: Option<MetaindexRow>,
    index_data: Vec<u8>,
    index_cursor: usize,
    index_block_headers_count: u32,

    rows_count: u64,
    blocks_count: u64,
    data_offset: u64,
    index_block_offset: u64,

    done: bool,
}

impl BlockStreamReader {
    /// Create a reader over `part`
    pub fn new(part: Arc<Part>) -> Self {
        Self {
            part,
            block: Block::new(),
            tsid_prev: Tsid::default(),
            mr_idx: 0,
            mr: None,
            index_data: Vec::new(),
            index_cursor: 0,
            index_block_headers_count: 0,
            rows_count: 0,
            blocks_count: 0,
            data_offset: 0,
            index_block_offset: 0,
            done: false,
        }
    }

    /// Create a reader over an in-memory part
    pub fn from_inmemory(mp: InmemoryPart) -> Result<Self> {
        Ok(Self::new(Arc::new(Part::from_inmemory(mp)?)))
    }

    fn read_block(&mut self) -> Result<bool> {
        if self.index_cursor >= self.index_data.len() {
            if let Some(mr) = &self.mr {
                if self.index_block_headers_count != mr.block_headers_count {
                    return Err(StoreError::Corruption(format!(
                        "invalid number of block headers in index block at offset {}; got {}; want {}",
                        mr.index_block_offset, self.index_block_headers_count, mr.block_headers_count
                    )));
                }
            }
            self.index_block_headers_count = 0;
            if !self.read_index_block()? {
                return Ok(false);
            }
        }

        let index_block_offset = self.mr.map(|mr| mr.index_block_offset).unwrap_or_default();
        let tail = &self.index_data[self.index_cursor..];
        if tail.len() < BlockHeader::MARSHALED_SIZE {
            return Err(StoreError::Corruption(format!(
                "too short index data for block header in index block at offset {}; got {} bytes; want {} bytes",
                index_block_offset,
                tail.len(),
                BlockHeader::MARSHALED_SIZE
            )));
        }
        let bh = BlockHeader::unmarshal(&mut &tail[..BlockHeader::MARSHALED_SIZE]).map_err(|e| {
            StoreError::Corruption(format!(
                "cannot parse block header in index block at offset {}: {}",
                index_block_offset, e
            ))
        })?;
        self.index_cursor += BlockHeader::MARSHALED_SIZE;

        let ph = self.part.header();
        self.blocks_count += 1;
        if self.blocks_count > ph.blocks_count {
            return Err(StoreError::Corruption(format!(
                "too many blocks in the block stream; got {}; cannot be bigger than {}",
                self.blocks_count, ph.blocks_count
            )));
        }
        self.rows_count += bh.rows_count as u64;
        if self.rows_count > ph.rows_count {
            return Err(StoreError::Corruption(format!(
                "too many rows in the block stream; got {}; cannot be bigger than {}",
                self.rows_count, ph.rows_count
            )));
        }
        if bh.min_timestamp < ph.min_timestamp || bh.max_timestamp > ph.max_timestamp {
            return Err(StoreError::Corruption(format!(
                "block time range [{}..{}] is outside part time range [{}..{}]",
                bh.min_timestamp, bh.max_timestamp, ph.min_timestamp, ph.max_timestamp
            )));
        }
        if bh.data_offset != self.data_offset {
            return Err(StoreError::Corruption(format!(
                "invalid data offset in block header; got {}; want {}",
                bh.data_offset, self.data_offset
            )));
        }

        let data = self.part.block_data(&bh)?;
        self.block.init_encoded(bh, data);
        self.data_offset += bh.data_size as u64;
        self.index_block_headers_count += 1;
        Ok(true)
    }

    fn read_index_block(&mut self) -> Result<bool> {
        let Some(mr) = self.part.metaindex().get(self.mr_idx).copied() else {
            return Ok(false);
        };
        self.mr_idx += 1;

        let ph = self.part.header();
        if mr.index_block_offset != self.index_block_offset {
            return Err(StoreError::Corruption(format!(
                "invalid index block offset in metaindex row; got {}; want {}",
                mr.index_block_offset, self.index_block_offset
            )));
        }
        if mr.min_timestamp < ph.min_timestamp || mr.max_timestamp > ph.max_timestamp {
            return Err(StoreError::Corruption(format!(
                "metaindex row time range [{}..{}] is outside part time range [{}..{}]",
                mr.min_timestamp, mr.max_timestamp, ph.min_timestamp, ph.max_timestamp
            )));
        }

        self.index_data = self.part.read_index_block(&mr)?;
        self.index_cursor = 0;
        self.index_block_offset += mr.index_block_size as u64;
        self.mr = Some(mr);
        Ok(true)
    }
}

impl BlockSource for BlockStreamReader {
    fn next_block(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        self.tsid_prev = self.block.header.tsid;
        self.block.reset();

        match self.read_block() {
            Ok(true) => {
                if self.block.header.tsid.less(&self.tsid_prev) {
                    self.done = true;
                    return Err(StoreError::Corruption(format!(
                        "possible data corruption in part {}: the next tsid {} is smaller than the previous tsid {}",
                        self.part, self.block.header.tsid, self.tsid_prev
                    )));
                }
                Ok(true)
            }
            Ok(false) => {
                self.done = true;
                Ok(false)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    fn block(&self) -> &Block {
        &self.block
    }

    fn block_mut(&mut self) -> &mut Block {
        &mut self.block
    }
}

impl fmt::Display for BlockStreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.part)
    }
}
