//! Partition: a set of parts covering one time window

use crate::merge::{merge_block_streams, MergeCounters, StopSignal};
use crate::part::{BlockStreamReader, BlockStreamWriter, Part, PartHeader};
use crate::types::TimeRange;
use crate::Result;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Parts of one time window.
///
/// Readers take snapshots of the part list with [`Partition::get_parts`];
/// parts stay alive while any snapshot references them, even after a merge
/// replaced them.
#[derive(Debug)]
pub struct Partition {
    time_range: TimeRange,
    parts: RwLock<Vec<Arc<Part>>>,
}

impl Partition {
    /// Create an empty partition
    pub fn new(time_range: TimeRange) -> Self {
        Self {
            time_range,
            parts: RwLock::new(Vec::new()),
        }
    }

    /// Time window of the partition
    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    /// Publish a new part
    pub fn add_part(&self, part: Arc<Part>) {
        let ph = part.header();
        if ph.rows_count > 0
            && !(self.time_range.contains(ph.min_timestamp)
                && self.time_range.contains(ph.max_timestamp))
        {
            warn!(
                part = %part,
                partition = %self.time_range,
                "part extends beyond the partition time range"
            );
        }
        self.parts.write().push(part);
    }

    /// Snapshot of the current parts. Pair with [`Partition::put_parts`].
    pub fn get_parts(&self) -> Vec<Arc<Part>> {
        self.parts.read().clone()
    }

    /// Release a snapshot taken with [`Partition::get_parts`]
    pub fn put_parts(&self, parts: Vec<Arc<Part>>) {
        drop(parts);
    }

    /// Number of published parts
    pub fn parts_count(&self) -> usize {
        self.parts.read().len()
    }

    /// Total rows across published parts
    pub fn rows_count(&self) -> u64 {
        self.parts.read().iter().map(|p| p.header().rows_count).sum()
    }

    /// Merge `parts` into one part and swap them for it.
    ///
    /// Rows of series in `deleted` are dropped. Returns `None` when nothing
    /// survived, in which case the source parts are just removed. On error,
    /// including a fired `stop`, the partition is left untouched.
    ///
    /// Panics if one of `parts` is not published in the partition.
    pub fn merge_parts(
        &self,
        parts: &[Arc<Part>],
        stop: Option<&StopSignal>,
        deleted: Option<&HashSet<u64>>,
    ) -> Result<Option<Arc<Part>>> {
        let start = Instant::now();
        let readers: Vec<BlockStreamReader> = parts
            .iter()
            .map(|p| BlockStreamReader::new(Arc::clone(p)))
            .collect();
        let rows_in: u64 = parts.iter().map(|p| p.header().rows_count).sum();
        debug!(parts = parts.len(), rows = rows_in, "merging parts");

        let mut bsw = BlockStreamWriter::new();
        let mut ph = PartHeader::default();
        let counters = MergeCounters::default();
        merge_block_streams(&mut ph, &mut bsw, readers, stop, deleted, &counters)?;

        let new_part = if ph.rows_count > 0 {
            Some(Arc::new(Part::from_inmemory(bsw.into_inmemory_part(ph))?))
        } else {
            None
        };

        {
            let mut current = self.parts.write();
            for p in parts {
                if !current.iter().any(|c| Arc::ptr_eq(c, p)) {
                    panic!("BUG: merged part {} is missing in the partition", p);
                }
            }
            current.retain(|c| !parts.iter().any(|p| Arc::ptr_eq(c, p)));
            if let Some(part) = &new_part {
                current.push(Arc::clone(part));
            }
        }

        info!(
            parts = parts.len(),
            rows_merged = counters.rows_merged(),
            rows_deleted = counters.rows_deleted(),
            duration_ms = start.elapsed().as_millis() as u64,
            "merged parts"
        );
        Ok(new_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::stop_channel;
    use crate::part::InmemoryPart;
    use crate::tsid::Tsid;
    use crate::types::RawRow;

    fn part(metric_id: u64, timestamps: &[i64]) -> Arc<Part> {
        let mut rows: Vec<RawRow> = timestamps
            .iter()
            .map(|&ts| RawRow::new(Tsid::with_metric_id(metric_id), ts, ts as f64))
            .collect();
        Arc::new(Part::from_inmemory(InmemoryPart::from_rows(&mut rows)).unwrap())
    }

    #[test]
    fn test_merge_parts_swaps_parts() {
        let pt = Partition::new(TimeRange::new(0, 1_000));
        pt.add_part(part(1, &[1, 5]));
        pt.add_part(part(1, &[3]));
        pt.add_part(part(2, &[7]));
        assert_eq!(pt.parts_count(), 3);

        let snapshot = pt.get_parts();
        let merged = pt.merge_parts(&snapshot[..2], None, None).unwrap().unwrap();
        assert_eq!(merged.header().rows_count, 3);
        assert_eq!(merged.header().blocks_count, 1);
        assert_eq!(pt.parts_count(), 2);
        assert_eq!(pt.rows_count(), 4);

        // The snapshot still holds the replaced parts.
        assert_eq!(snapshot[0].header().rows_count, 2);
        pt.put_parts(snapshot);
    }

    #[test]
    fn test_merge_parts_all_deleted() {
        let pt = Partition::new(TimeRange::all());
        pt.add_part(part(1, &[1]));
        pt.add_part(part(1, &[2]));
        let deleted: HashSet<u64> = [1].into_iter().collect();

        let parts = pt.get_parts();
        assert!(pt.merge_parts(&parts, None, Some(&deleted)).unwrap().is_none());
        assert_eq!(pt.parts_count(), 0);
    }

    #[test]
    fn test_merge_parts_stopped() {
        let pt = Partition::new(TimeRange::all());
        pt.add_part(part(1, &[1]));
        pt.add_part(part(2, &[2]));
        let (handle, signal) = stop_channel();
        handle.stop();

        let parts = pt.get_parts();
        let err = pt.merge_parts(&parts, Some(&signal), None).unwrap_err();
        assert!(err.is_forcibly_stopped());
        assert_eq!(pt.parts_count(), 2);
    }
}
