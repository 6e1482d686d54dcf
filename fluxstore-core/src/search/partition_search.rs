//! Search across all parts of a partition

use crate::merge::BlockHeap;
use crate::part::{BlockRef, Part, PartSearch};
use crate::partition::Partition;
use crate::tsid::Tsid;
use crate::types::TimeRange;
use crate::{Result, StoreError};
use std::sync::Arc;

fn part_search_less(a: &PartSearch, b: &PartSearch) -> bool {
    a.block_ref().header().less(b.block_ref().header())
}

/// Delivers matching blocks of every part in a partition in
/// `(tsid, min_timestamp)` order.
///
/// Blocks of one series coming from different parts may overlap in time.
/// Usage: [`init`](Self::init), then [`next_block`](Self::next_block) until it
/// returns `Ok(false)`, then [`must_close`](Self::must_close).
pub struct PartitionSearch {
    partition: Option<Arc<Partition>>,
    parts: Vec<Arc<Part>>,
    heap: BlockHeap<PartSearch>,
    time_range: TimeRange,

    next_block_noop: bool,
    need_closing: bool,
    err: Option<StoreError>,
    done: bool,
}

impl Default for PartitionSearch {
    fn default() -> Self {
        Self {
            partition: None,
            parts: Vec::new(),
            heap: BlockHeap::new(Vec::new(), part_search_less),
            time_range: TimeRange::all(),
            next_block_noop: false,
            need_closing: false,
            err: None,
            done: true,
        }
    }
}

impl PartitionSearch {
    /// Create a search that must be initialized before use
    pub fn new() -> Self {
        Self::default()
    }

    /// Start searching `pt` for `tsids` within `tr`.
    ///
    /// Panics if the previous search was not closed.
    pub fn init(&mut self, pt: &Arc<Partition>, tsids: &[Tsid], tr: TimeRange) {
        if self.need_closing {
            panic!("BUG: missing must_close() call before the next call to init()");
        }
        *self = Self::default();
        self.need_closing = true;
        self.time_range = tr;

        let ptr = pt.time_range();
        if tsids.is_empty() || !tr.overlaps(ptr.min_timestamp, ptr.max_timestamp) {
            return;
        }

        let mut sorted = tsids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let tsids: Arc<[Tsid]> = sorted.into();

        self.parts = pt.get_parts();
        self.partition = Some(Arc::clone(pt));

        let mut searches = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let mut ps = PartSearch::new(Arc::clone(part), Arc::clone(&tsids), tr);
            match ps.next_block() {
                Ok(true) => searches.push(ps),
                Ok(false) => {}
                Err(e) => {
                    self.err = Some(e);
                    break;
                }
            }
        }
        self.done = false;
        self.next_block_noop = self.err.is_none() && !searches.is_empty();
        self.heap = BlockHeap::new(searches, part_search_less);
    }

    /// Advance to the next block. Returns `Ok(false)` when the search is
    /// exhausted.
    pub fn next_block(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        if let Some(e) = self.err.take() {
            return Err(self.fail(e));
        }
        if self.next_block_noop {
            self.next_block_noop = false;
            return Ok(true);
        }
        let Some(root) = self.heap.peek_mut() else {
            self.done = true;
            return Ok(false);
        };
        match root.next_block() {
            Ok(true) => {
                self.heap.fix_root();
                Ok(true)
            }
            Ok(false) => {
                self.heap.pop_root();
                if self.heap.is_empty() {
                    self.done = true;
                    return Ok(false);
                }
                Ok(true)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Current block reference
    pub fn block_ref(&self) -> &BlockRef {
        match self.heap.peek() {
            Some(ps) if !self.done => ps.block_ref(),
            _ => panic!("BUG: no current block in partition search"),
        }
    }

    /// Time range passed to [`Self::init`]
    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    /// Release the parts snapshot.
    ///
    /// Panics if the search was not initialized.
    pub fn must_close(&mut self) {
        if !self.need_closing {
            panic!("BUG: missing init() call before must_close()");
        }
        if let Some(pt) = self.partition.take() {
            pt.put_parts(std::mem::take(&mut self.parts));
        }
        *self = Self::default();
    }

    fn fail(&mut self, e: StoreError) -> StoreError {
        self.done = true;
        StoreError::Search {
            parts: self.parts.len(),
            source: Box::new(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::InmemoryPart;
    use crate::types::RawRow;

    fn partition(parts: &[&[(u64, i64)]]) -> Arc<Partition> {
        let pt = Arc::new(Partition::new(TimeRange::new(0, 10_000)));
        for rows in parts {
            let mut rows: Vec<RawRow> = rows
                .iter()
                .map(|&(id, ts)| RawRow::new(Tsid::with_metric_id(id), ts, 1.0))
                .collect();
            pt.add_part(Arc::new(
                Part::from_inmemory(InmemoryPart::from_rows(&mut rows)).unwrap(),
            ));
        }
        pt
    }

    fn tsids(ids: &[u64]) -> Vec<Tsid> {
        ids.iter().map(|&id| Tsid::with_metric_id(id)).collect()
    }

    #[test]
    fn test_blocks_are_ordered_across_parts() {
        let pt = partition(&[&[(1, 50), (3, 10)], &[(1, 20), (2, 5)], &[(1, 30), (4, 1)]]);
        let mut pts = PartitionSearch::new();
        pts.init(&pt, &tsids(&[3, 1, 2, 1]), TimeRange::all());

        let mut got = Vec::new();
        while pts.next_block().unwrap() {
            let bh = pts.block_ref().header();
            got.push((bh.tsid.metric_id, bh.min_timestamp));
        }
        pts.must_close();
        assert_eq!(got, vec![(1, 20), (1, 30), (1, 50), (2, 5), (3, 10)]);
    }

    #[test]
    fn test_empty_tsids() {
        let pt = partition(&[&[(1, 1)]]);
        let mut pts = PartitionSearch::new();
        pts.init(&pt, &[], TimeRange::all());
        assert!(!pts.next_block().unwrap());
        pts.must_close();
    }

    #[test]
    fn test_time_range_outside_partition() {
        let pt = partition(&[&[(1, 1)]]);
        let mut pts = PartitionSearch::new();
        pts.init(&pt, &tsids(&[1]), TimeRange::new(20_000, 30_000));
        assert!(!pts.next_block().unwrap());
        pts.must_close();
    }

    #[test]
    fn test_snapshot_outlives_merge() {
        let pt = partition(&[&[(1, 1), (1, 2)], &[(1, 3)]]);
        let mut pts = PartitionSearch::new();
        pts.init(&pt, &tsids(&[1]), TimeRange::all());

        let parts = pt.get_parts();
        pt.merge_parts(&parts, None, None).unwrap();
        pt.put_parts(parts);
        assert_eq!(pt.parts_count(), 1);

        let mut blocks = 0;
        while pts.next_block().unwrap() {
            let mut b = crate::part::Block::new();
            pts.block_ref().read_block(&mut b).unwrap();
            b.unmarshal_data().unwrap();
            blocks += 1;
        }
        assert_eq!(blocks, 2);
        pts.must_close();
    }

    #[test]
    #[should_panic(expected = "missing must_close")]
    fn test_double_init_panics() {
        let pt = partition(&[&[(1, 1)]]);
        let mut pts = PartitionSearch::new();
        pts.init(&pt, &tsids(&[1]), TimeRange::all());
        pts.init(&pt, &tsids(&[1]), TimeRange::all());
    }

    #[test]
    #[should_panic(expected = "missing init")]
    fn test_close_without_init_panics() {
        PartitionSearch::new().must_close();
    }
}
