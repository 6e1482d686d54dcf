//! Filtered block search within a single part

use super::block::Block;
use super::block_header::BlockHeader;
use super::Part;
use crate::tsid::Tsid;
use crate::types::TimeRange;
use crate::Result;
use std::sync::Arc;

/// Reference to a block of a part
#[derive(Debug, Clone)]
pub struct BlockRef {
    part: Arc<Part>,
    header: BlockHeader,
}

impl BlockRef {
    /// Header of the referenced block
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Load the encoded block into `dst`
    pub fn read_block(&self, dst: &mut Block) -> Result<()> {
        let data = self.part.block_data(&self.header)?;
        dst.init_encoded(self.header, data);
        Ok(())
    }
}

/// Iterates blocks of one part matching a tsid set and a time range.
///
/// Blocks come out in `(tsid, min_timestamp)` order.
pub struct PartSearch {
    part: Arc<Part>,
    tsids: Arc<[Tsid]>,
    tsid_idx: usize,
    tr: TimeRange,

    mr_idx: usize,
    headers: Vec<BlockHeader>,
    header_idx: usize,

    block_ref: BlockRef,
    done: bool,
}

impl PartSearch {
    /// Create a search over `part`.
    ///
    /// `tsids` must be sorted and free of duplicates.
    pub fn new(part: Arc<Part>, tsids: Arc<[Tsid]>, tr: TimeRange) -> Self {
        debug_assert!(tsids.windows(2).all(|w| w[0].less(&w[1])));
        let ph = part.header();
        let done = tsids.is_empty() || !tr.overlaps(ph.min_timestamp, ph.max_timestamp);
        let block_ref = BlockRef {
            part: Arc::clone(&part),
            header: BlockHeader::default(),
        };
        Self {
            part,
            tsids,
            tsid_idx: 0,
            tr,
            mr_idx: 0,
            headers: Vec::new(),
            header_idx: 0,
            block_ref,
            done,
        }
    }

    /// Advance to the next matching block. Returns `Ok(false)` when there are
    /// no more blocks.
    pub fn next_block(&mut self) -> Result<bool> {
        match self.search_next() {
            Ok(true) => Ok(true),
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

    /// Current block reference
    pub fn block_ref(&self) -> &BlockRef {
        &self.block_ref
    }

    fn search_next(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        loop {
            if self.header_idx >= self.headers.len() && !self.next_index_block()? {
                return Ok(false);
            }
            let bh = self.headers[self.header_idx];
            self.header_idx += 1;

            if !self.seek_tsid(&bh.tsid) {
                return Ok(false);
            }
            if bh.tsid != self.tsids[self.tsid_idx] || bh.max_timestamp < self.tr.min_timestamp {
                continue;
            }
            if bh.min_timestamp > self.tr.max_timestamp {
                // Later blocks of this series start even later.
                self.tsid_idx += 1;
                continue;
            }

            self.block_ref.header = bh;
            return Ok(true);
        }
    }

    /// Skip wanted tsids smaller than `tsid`. Returns false if none remain.
    fn seek_tsid(&mut self, tsid: &Tsid) -> bool {
        while self.tsid_idx < self.tsids.len() && self.tsids[self.tsid_idx].less(tsid) {
            self.tsid_idx += 1;
        }
        self.tsid_idx < self.tsids.len()
    }

    fn next_index_block(&mut self) -> Result<bool> {
        let part = Arc::clone(&self.part);
        let mrs = part.metaindex();
        while self.mr_idx < mrs.len() {
            let mr = mrs[self.mr_idx];
            self.mr_idx += 1;

            if !self.seek_tsid(&mr.tsid) {
                return Ok(false);
            }
            // The index block ends where the next one starts, so it cannot
            // hold the wanted tsid if the next one starts past it.
            if let Some(next) = mrs.get(self.mr_idx) {
                if next.tsid.less(&self.tsids[self.tsid_idx]) {
                    continue;
                }
            }
            if !self.tr.overlaps(mr.min_timestamp, mr.max_timestamp) {
                continue;
            }

            self.headers = part.read_block_headers(&mr)?;
            self.header_idx = 0;
            return Ok(true);
        }
        Ok(false)
    }
}
