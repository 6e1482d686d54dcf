//! Compaction merge
//!
//! Merges ordered block streams into one output stream:
//! - blocks of deleted series are dropped without decoding
//! - overlapping blocks of a series are merged row by row
//! - merged blocks are cut at `MAX_ROWS_PER_BLOCK` rows
//!
//! Duplicate samples are kept.

mod heap;
mod stream_merger;

pub use heap::BlockHeap;
pub use stream_merger::BlockStreamMerger;

use crate::config::MAX_ROWS_PER_BLOCK;
use crate::decimal::calibrate_scale;
use crate::part::{Block, BlockSink, BlockSource, PartHeader};
use crate::{Result, StoreError};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Create a connected stop handle and signal
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (StopHandle { _tx: tx }, StopSignal { rx })
}

/// Owner side of a stop signal. Stopping or dropping it fires every
/// connected [`StopSignal`].
#[derive(Debug)]
pub struct StopHandle {
    _tx: Sender<()>,
}

impl StopHandle {
    /// Fire the signal
    pub fn stop(self) {
        drop(self);
    }
}

/// Cooperative cancellation signal checked by long-running merges
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    /// Returns true once the handle was stopped or dropped
    pub fn is_stopped(&self) -> bool {
        matches!(self.rx.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
    }
}

/// Row counters shared between a merge and its observers
#[derive(Debug, Default)]
pub struct MergeCounters {
    /// Rows written to the output
    pub rows_merged: AtomicU64,
    /// Rows dropped because their series was deleted
    pub rows_deleted: AtomicU64,
}

impl MergeCounters {
    /// Rows written so far
    pub fn rows_merged(&self) -> u64 {
        self.rows_merged.load(Ordering::Relaxed)
    }

    /// Rows dropped so far
    pub fn rows_deleted(&self) -> u64 {
        self.rows_deleted.load(Ordering::Relaxed)
    }
}

/// Merge `sources` into `bsw`, filling `ph` with the output statistics.
///
/// Blocks whose metric id is in `deleted` are skipped. The writer is closed
/// on every return path. A fired `stop` yields [`StoreError::ForciblyStopped`]
/// as is; any other error is wrapped in [`StoreError::Merge`].
pub fn merge_block_streams<S, W>(
    ph: &mut PartHeader,
    bsw: &mut W,
    sources: Vec<S>,
    stop: Option<&StopSignal>,
    deleted: Option<&HashSet<u64>>,
    counters: &MergeCounters,
) -> Result<()>
where
    S: BlockSource,
    W: BlockSink,
{
    ph.reset();
    let streams = sources.len();

    let result = BlockStreamMerger::new(sources).and_then(|mut bsm| {
        merge_block_streams_internal(ph, bsw, &mut bsm, stop, deleted, counters)
    });
    bsw.must_close();

    match result {
        Ok(()) => {
            debug!(
                streams,
                rows_merged = counters.rows_merged(),
                rows_deleted = counters.rows_deleted(),
                blocks = ph.blocks_count,
                "merged block streams"
            );
            Ok(())
        }
        Err(StoreError::ForciblyStopped) => {
            info!(streams, "merge of block streams was forcibly stopped");
            Err(StoreError::ForciblyStopped)
        }
        Err(e) => Err(StoreError::Merge {
            streams,
            source: Box::new(e),
        }),
    }
}

fn merge_block_streams_internal<S, W>(
    ph: &mut PartHeader,
    bsw: &mut W,
    bsm: &mut BlockStreamMerger<S>,
    stop: Option<&StopSignal>,
    deleted: Option<&HashSet<u64>>,
    counters: &MergeCounters,
) -> Result<()>
where
    S: BlockSource,
    W: BlockSink,
{
    let mut pending = Block::new();
    let mut pending_is_empty = true;
    let mut tmp = Block::new();

    while bsm.next_block()? {
        if stop.is_some_and(StopSignal::is_stopped) {
            return Err(StoreError::ForciblyStopped);
        }

        let b = bsm.block_mut();
        if deleted.is_some_and(|d| d.contains(&b.header.tsid.metric_id)) {
            counters
                .rows_deleted
                .fetch_add(b.rows_count() as u64, Ordering::Relaxed);
            continue;
        }
        if pending_is_empty {
            pending.copy_from(b);
            pending_is_empty = false;
            continue;
        }

        if b.header.tsid != pending.header.tsid {
            if b.header.tsid.less(&pending.header.tsid) {
                panic!(
                    "BUG: the next tsid {} is smaller than the current tsid {}",
                    b.header.tsid, pending.header.tsid
                );
            }
            bsw.write_external_block(&mut pending, ph, &counters.rows_merged);
            pending.copy_from(b);
            continue;
        }

        if pending.too_big() && pending.header.max_timestamp <= b.header.min_timestamp {
            // Full block without overlap, no need to decode anything.
            bsw.write_external_block(&mut pending, ph, &counters.rows_merged);
            pending.copy_from(b);
            continue;
        }

        b.unmarshal_data()?;
        pending.unmarshal_data()?;
        let scale = calibrate_scale(
            &mut pending.values[pending.next_idx..],
            pending.header.scale,
            &mut b.values[b.next_idx..],
            b.header.scale,
        );
        pending.header.scale = scale;
        b.header.scale = scale;

        tmp.reset();
        tmp.header.tsid = b.header.tsid;
        tmp.header.scale = scale;
        tmp.header.precision_bits = pending.header.precision_bits.min(b.header.precision_bits);
        merge_blocks(&mut tmp, b, &mut pending);

        if tmp.timestamps.len() <= MAX_ROWS_PER_BLOCK {
            tmp.fixup_timestamps();
            std::mem::swap(&mut pending, &mut tmp);
            continue;
        }

        // Flush the first MAX_ROWS_PER_BLOCK rows, keep the rest pending.
        tmp.next_idx = MAX_ROWS_PER_BLOCK;
        pending.copy_from(&tmp);
        pending.fixup_timestamps();
        tmp.next_idx = 0;
        tmp.timestamps.truncate(MAX_ROWS_PER_BLOCK);
        tmp.values.truncate(MAX_ROWS_PER_BLOCK);
        tmp.fixup_timestamps();
        bsw.write_external_block(&mut tmp, ph, &counters.rows_merged);
    }

    if !pending_is_empty {
        bsw.write_external_block(&mut pending, ph, &counters.rows_merged);
    }
    Ok(())
}

/// Merge the remaining rows of `ib1` and `ib2` into `ob` by timestamp.
///
/// Both blocks must be decoded and share tsid and scale.
fn merge_blocks(ob: &mut Block, ib1: &mut Block, ib2: &mut Block) {
    ib1.assert_mergeable(ib2);

    if ib1.header.max_timestamp < ib2.header.min_timestamp {
        append_rows(ob, ib1);
        append_rows(ob, ib2);
        return;
    }
    if ib2.header.max_timestamp < ib1.header.min_timestamp {
        append_rows(ob, ib2);
        append_rows(ob, ib1);
        return;
    }

    let (mut lo, mut hi) = (ib1, ib2);
    if hi.next_idx >= hi.timestamps.len() {
        std::mem::swap(&mut lo, &mut hi);
    }
    if lo.next_idx >= lo.timestamps.len() {
        append_rows(ob, hi);
        return;
    }
    loop {
        // Take the whole run of `lo` that precedes the next row of `hi`.
        let next_hi = hi.timestamps[hi.next_idx];
        let start = lo.next_idx;
        let end = start + lo.timestamps[start..].partition_point(|&ts| ts <= next_hi);
        ob.timestamps.extend_from_slice(&lo.timestamps[start..end]);
        ob.values.extend_from_slice(&lo.values[start..end]);
        lo.next_idx = end;

        if lo.next_idx >= lo.timestamps.len() {
            append_rows(ob, hi);
            return;
        }
        std::mem::swap(&mut lo, &mut hi);
    }
}

fn append_rows(ob: &mut Block, ib: &mut Block) {
    ob.timestamps.extend_from_slice(&ib.timestamps[ib.next_idx..]);
    ob.values.extend_from_slice(&ib.values[ib.next_idx..]);
    ib.next_idx = ib.timestamps.len();
}
