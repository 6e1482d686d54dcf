//! K-way merge of ordered block streams

use super::heap::BlockHeap;
use crate::part::{Block, BlockSource};
use crate::Result;
use tracing::debug;

fn source_less<S: BlockSource>(a: &S, b: &S) -> bool {
    a.block().header().less(b.block().header())
}

/// Merges block sources sorted by `(tsid, min_timestamp)` into one stream
/// with the same order.
pub struct BlockStreamMerger<S: BlockSource> {
    heap: BlockHeap<S>,
    next_block_noop: bool,
    failed: bool,
}

impl<S: BlockSource> BlockStreamMerger<S> {
    /// Pull the first block of every source and order the sources.
    ///
    /// Exhausted sources are dropped. An error from any source aborts
    /// construction.
    pub fn new(sources: Vec<S>) -> Result<Self> {
        let mut live = Vec::with_capacity(sources.len());
        for (i, mut source) in sources.into_iter().enumerate() {
            match source.next_block() {
                Ok(true) => live.push(source),
                Ok(false) => {}
                Err(e) => {
                    debug!(stream = i, error = %e, "cannot read the first block");
                    return Err(e);
                }
            }
        }
        let next_block_noop = !live.is_empty();
        Ok(Self {
            heap: BlockHeap::new(live, source_less::<S>),
            next_block_noop,
            failed: false,
        })
    }

    /// Advance to the next block in `(tsid, min_timestamp)` order.
    ///
    /// The first call after [`Self::new`] only exposes the smallest block.
    /// Returns `Ok(false)` once every source is exhausted.
    pub fn next_block(&mut self) -> Result<bool> {
        if self.failed {
            return Ok(false);
        }
        if self.next_block_noop {
            self.next_block_noop = false;
            return Ok(true);
        }
        let Some(root) = self.heap.peek_mut() else {
            return Ok(false);
        };
        match root.next_block() {
            Ok(true) => {
                self.heap.fix_root();
                Ok(true)
            }
            Ok(false) => {
                self.heap.pop_root();
                Ok(!self.heap.is_empty())
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Current block
    pub fn block(&self) -> &Block {
        match self.heap.peek() {
            Some(source) => source.block(),
            None => panic!("BUG: no current block in an exhausted block stream merger"),
        }
    }

    /// Mutable access to the current block
    pub fn block_mut(&mut self) -> &mut Block {
        match self.heap.peek_mut() {
            Some(source) => source.block_mut(),
            None => panic!("BUG: no current block in an exhausted block stream merger"),
        }
    }

    /// Number of sources that still have blocks
    pub fn live_sources(&self) -> usize {
        self.heap.len()
    }
}
