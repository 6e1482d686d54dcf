//! Query path: partition search and series reassembly

mod partition_search;

pub use partition_search::PartitionSearch;

use crate::part::Block;
use crate::tsid::Tsid;
use crate::Result;

/// Samples of one series in timestamp order
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesData {
    /// Series id
    pub tsid: Tsid,
    /// Sample timestamps, ascending
    pub timestamps: Vec<i64>,
    /// Sample values
    pub values: Vec<f64>,
}

impl SeriesData {
    fn new(tsid: Tsid) -> Self {
        Self {
            tsid,
            timestamps: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Merge sorted rows into the series. Existing rows go first on equal
    /// timestamps.
    fn merge_rows(&mut self, timestamps: &[i64], values: &[f64]) {
        if timestamps.is_empty() {
            return;
        }
        if self.timestamps.last().map_or(true, |&last| last <= timestamps[0]) {
            self.timestamps.extend_from_slice(timestamps);
            self.values.extend_from_slice(values);
            return;
        }

        let n = self.timestamps.len() + timestamps.len();
        let mut dst_ts = Vec::with_capacity(n);
        let mut dst_values = Vec::with_capacity(n);
        let (mut i, mut j) = (0, 0);
        while i < self.timestamps.len() && j < timestamps.len() {
            if self.timestamps[i] <= timestamps[j] {
                dst_ts.push(self.timestamps[i]);
                dst_values.push(self.values[i]);
                i += 1;
            } else {
                dst_ts.push(timestamps[j]);
                dst_values.push(values[j]);
                j += 1;
            }
        }
        dst_ts.extend_from_slice(&self.timestamps[i..]);
        dst_values.extend_from_slice(&self.values[i..]);
        dst_ts.extend_from_slice(&timestamps[j..]);
        dst_values.extend_from_slice(&values[j..]);
        self.timestamps = dst_ts;
        self.values = dst_values;
    }
}

/// Drain `search` and rebuild every series it returns.
///
/// Rows outside the search time range are dropped, overlapping blocks are
/// merged and duplicate timestamps are kept. Series without rows in the
/// time range are omitted.
pub fn unpack_series(search: &mut PartitionSearch) -> Result<Vec<SeriesData>> {
    let tr = search.time_range();
    let mut series: Vec<SeriesData> = Vec::new();
    let mut block = Block::new();
    let mut timestamps = Vec::new();
    let mut values = Vec::new();

    while search.next_block()? {
        let br = search.block_ref();
        br.read_block(&mut block)?;
        block.unmarshal_data()?;

        timestamps.clear();
        values.clear();
        block.append_rows_with_time_range_filter(&mut timestamps, &mut values, &tr);
        if timestamps.is_empty() {
            continue;
        }

        let tsid = br.header().tsid;
        if series.last().map_or(true, |s| s.tsid != tsid) {
            series.push(SeriesData::new(tsid));
        }
        if let Some(s) = series.last_mut() {
            s.merge_rows(&timestamps, &values);
        }
    }
    Ok(series)
}
