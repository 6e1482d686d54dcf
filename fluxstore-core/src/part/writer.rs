//! Block stream writer

use super::block::Block;
use super::block_header::BlockHeader;
use super::inmemory::InmemoryPart;
use super::metaindex::MetaindexRow;
use super::{BlockSink, PartHeader};
use crate::compression::compress_section;
use crate::config::MAX_BLOCK_SIZE;
use std::sync::atomic::{AtomicU64, Ordering};

/// Writes blocks into in-memory part sections
#[derive(Debug, Default)]
pub struct BlockStreamWriter {
    data: Vec<u8>,
    index: Vec<u8>,
    /// Marshaled metaindex rows, compressed on close
    metaindex: Vec<u8>,

    /// Marshaled block headers of the index block being built
    index_block: Vec<u8>,
    mr: MetaindexRow,

    closed: bool,
}

impl BlockStreamWriter {
    /// Create a writer with empty sections
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the writer and return the part it built
    pub fn into_inmemory_part(mut self, ph: PartHeader) -> InmemoryPart {
        self.must_close();
        InmemoryPart {
            ph,
            data: self.data,
            index: self.index,
            metaindex: self.metaindex,
        }
    }

    fn flush_index_block(&mut self) {
        if self.index_block.is_empty() {
            return;
        }
        let compressed = compress_section(&self.index_block);
        self.mr.index_block_offset = self.index.len() as u64;
        self.mr.index_block_size = compressed.len() as u32;
        self.index.extend_from_slice(&compressed);

        self.mr.marshal(&mut self.metaindex);
        self.mr.reset();
        self.index_block.clear();
    }
}

impl BlockSink for BlockStreamWriter {
    fn write_external_block(&mut self, b: &mut Block, ph: &mut PartHeader, rows_merged: &AtomicU64) {
        assert!(!self.closed, "BUG: write to a closed block stream writer");

        rows_merged.fetch_add(b.rows_count() as u64, Ordering::Relaxed);
        b.marshal_data(self.data.len() as u64);

        if self.index_block.len() + BlockHeader::MARSHALED_SIZE > MAX_BLOCK_SIZE {
            self.flush_index_block();
        }
        b.header.marshal(&mut self.index_block);
        self.mr.register_block_header(&b.header);
        self.data.extend_from_slice(&b.data);

        ph.update(&b.header);
    }

    fn must_close(&mut self) {
        if self.closed {
            return;
        }
        self.flush_index_block();
        self.metaindex = compress_section(&self.metaindex);
        self.closed = true;
    }
}
