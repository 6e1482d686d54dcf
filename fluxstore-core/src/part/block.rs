//! In-memory block of samples for a single series

use super::block_header::BlockHeader;
use crate::compression::{decode_block, encode_block};
use crate::config::{MAX_BLOCK_SIZE, MAX_ROWS_PER_BLOCK};
use crate::decimal::append_decimal_to_float;
use crate::tsid::Tsid;
use crate::types::TimeRange;
use crate::{Result, StoreError};

/// A run of samples for one series.
///
/// A block is either encoded (`data` holds the payload described by the
/// header) or decoded (`timestamps` and `values` hold the rows, `next_idx`
/// points at the first row not consumed yet).
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub(crate) header: BlockHeader,
    pub(crate) next_idx: usize,
    pub(crate) timestamps: Vec<i64>,
    pub(crate) values: Vec<i64>,
    pub(crate) data: Vec<u8>,
}

impl Block {
    /// Create an empty block
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all fields while keeping allocations
    pub fn reset(&mut self) {
        self.header = BlockHeader::default();
        self.next_idx = 0;
        self.timestamps.clear();
        self.values.clear();
        self.data.clear();
    }

    /// Deep copy of `src`, dropping the rows `src` already consumed
    pub fn copy_from(&mut self, src: &Block) {
        self.header = src.header;
        self.next_idx = 0;
        self.timestamps.clear();
        self.timestamps
            .extend_from_slice(&src.timestamps[src.next_idx.min(src.timestamps.len())..]);
        self.values.clear();
        self.values
            .extend_from_slice(&src.values[src.next_idx.min(src.values.len())..]);
        self.data.clear();
        self.data.extend_from_slice(&src.data);
    }

    /// Initialize a decoded block from rows sorted by timestamp
    pub fn init(
        &mut self,
        tsid: Tsid,
        timestamps: &[i64],
        values: &[i64],
        scale: i16,
        precision_bits: u8,
    ) {
        self.reset();
        self.header.tsid = tsid;
        self.header.scale = scale;
        self.header.precision_bits = precision_bits;
        self.timestamps.extend_from_slice(timestamps);
        self.values.extend_from_slice(values);
        self.fixup_timestamps();
    }

    /// Load an encoded block
    pub(crate) fn init_encoded(&mut self, header: BlockHeader, data: &[u8]) {
        self.reset();
        self.header = header;
        self.data.extend_from_slice(data);
    }

    /// Block header
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Series of the block
    pub fn tsid(&self) -> &Tsid {
        &self.header.tsid
    }

    /// Decoded timestamps not consumed yet
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps[self.next_idx.min(self.timestamps.len())..]
    }

    /// Decoded mantissas not consumed yet
    pub fn values(&self) -> &[i64] {
        &self.values[self.next_idx.min(self.values.len())..]
    }

    /// Returns true if rows are available in `timestamps`/`values`
    pub fn is_decoded(&self) -> bool {
        !self.values.is_empty()
    }

    /// Number of rows left in the block
    pub fn rows_count(&self) -> usize {
        if self.is_decoded() {
            self.values.len() - self.next_idx
        } else {
            self.header.rows_count as usize
        }
    }

    /// Advance the row cursor. Returns false once every row was consumed.
    pub fn next_row(&mut self) -> bool {
        if self.next_idx >= self.values.len() {
            return false;
        }
        self.next_idx += 1;
        true
    }

    /// Recompute min/max timestamps from the rows not consumed yet
    pub fn fixup_timestamps(&mut self) {
        let min = self.timestamps.get(self.next_idx);
        if let (Some(&min), Some(&max)) = (min, self.timestamps.last()) {
            self.header.min_timestamp = min;
            self.header.max_timestamp = max;
        }
    }

    /// Panics unless `self` and `other` can be merged row by row
    pub fn assert_mergeable(&self, other: &Block) {
        if self.header.tsid != other.header.tsid {
            panic!(
                "BUG: cannot merge blocks of different series: {} vs {}",
                self.header.tsid, other.header.tsid
            );
        }
        if self.header.scale != other.header.scale {
            panic!(
                "BUG: cannot merge blocks with different scales: {} vs {}",
                self.header.scale, other.header.scale
            );
        }
    }

    /// Returns true if the block cannot grow any further
    pub fn too_big(&self) -> bool {
        self.header.rows_count as usize >= MAX_ROWS_PER_BLOCK
            || self.values().len() >= MAX_ROWS_PER_BLOCK
            || self.data.len() >= MAX_BLOCK_SIZE
    }

    /// Decode the payload into rows.
    ///
    /// Calling it on a decoded block does nothing.
    pub fn unmarshal_data(&mut self) -> Result<()> {
        if self.is_decoded() {
            assert!(
                self.data.is_empty(),
                "BUG: decoded block still holds {} payload bytes",
                self.data.len()
            );
            return Ok(());
        }
        if self.header.rows_count == 0 {
            return Err(StoreError::InvalidFormat(
                "cannot decode block with zero rows".into(),
            ));
        }
        if self.data.len() != self.header.data_size as usize {
            return Err(StoreError::Corruption(format!(
                "block payload size mismatch; got {} bytes; header says {} bytes",
                self.data.len(),
                self.header.data_size
            )));
        }
        let checksum = crc32fast::hash(&self.data);
        if checksum != self.header.data_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: self.header.data_checksum,
                actual: checksum,
            });
        }

        let rows = self.header.rows_count as usize;
        self.timestamps.clear();
        self.values.clear();
        let decoded = decode_block(&self.data, rows, &mut self.timestamps, &mut self.values);
        if let Err(err) = decoded.and_then(|()| self.check_decoded_rows()) {
            self.timestamps.clear();
            self.values.clear();
            return Err(err);
        }

        self.data.clear();
        self.next_idx = 0;
        Ok(())
    }

    fn check_decoded_rows(&self) -> Result<()> {
        let timestamps = &self.timestamps;
        if let Some(pos) = timestamps.windows(2).position(|w| w[0] > w[1]) {
            return Err(StoreError::Corruption(format!(
                "block timestamps are not sorted at row {}: {} > {}",
                pos,
                timestamps[pos],
                timestamps[pos + 1]
            )));
        }
        let (first, last) = (timestamps[0], timestamps[timestamps.len() - 1]);
        if first < self.header.min_timestamp || last > self.header.max_timestamp {
            return Err(StoreError::Corruption(format!(
                "block timestamps [{}..{}] are outside header range [{}..{}]",
                first, last, self.header.min_timestamp, self.header.max_timestamp
            )));
        }
        Ok(())
    }

    /// Encode the rows not consumed yet, placing the payload at `data_offset`.
    ///
    /// Encoded blocks only get their offset updated.
    pub fn marshal_data(&mut self, data_offset: u64) {
        if !self.is_decoded() {
            assert_eq!(self.next_idx, 0, "BUG: encoded block with non-zero cursor");
            assert_eq!(
                self.header.data_size as usize,
                self.data.len(),
                "BUG: encoded block payload does not match its header"
            );
            assert!(self.header.rows_count > 0, "BUG: encoded block without rows");
            self.header.data_offset = data_offset;
            return;
        }

        let timestamps = &self.timestamps[self.next_idx..];
        let values = &self.values[self.next_idx..];
        assert!(
            !values.is_empty(),
            "BUG: cannot marshal block without rows; next_idx={}",
            self.next_idx
        );
        assert_eq!(
            timestamps.len(),
            values.len(),
            "BUG: timestamps and values count mismatch"
        );

        self.data = encode_block(timestamps, values, self.header.precision_bits);
        self.header.min_timestamp = timestamps[0];
        self.header.max_timestamp = timestamps[timestamps.len() - 1];
        self.header.rows_count = values.len() as u32;
        self.header.data_offset = data_offset;
        self.header.data_size = self.data.len() as u32;
        self.header.data_checksum = crc32fast::hash(&self.data);

        self.timestamps.clear();
        self.values.clear();
        self.next_idx = 0;
    }

    /// Append rows within `tr` to the destination vectors as floats.
    ///
    /// The block must be decoded.
    pub fn append_rows_with_time_range_filter(
        &self,
        dst_timestamps: &mut Vec<i64>,
        dst_values: &mut Vec<f64>,
        tr: &TimeRange,
    ) {
        let timestamps = self.timestamps();
        let start = timestamps.partition_point(|&ts| ts < tr.min_timestamp);
        let end = timestamps.partition_point(|&ts| ts <= tr.max_timestamp);
        if start >= end {
            return;
        }
        dst_timestamps.extend_from_slice(&timestamps[start..end]);
        append_decimal_to_float(dst_values, &self.values()[start..end], self.header.scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded_block(metric_id: u64, timestamps: &[i64]) -> Block {
        let values: Vec<i64> = timestamps.iter().map(|ts| ts * 2).collect();
        let mut b = Block::new();
        b.init(Tsid::with_metric_id(metric_id), timestamps, &values, -1, 64);
        b
    }

    #[test]
    fn test_marshal_unmarshal() {
        let mut b = decoded_block(1, &[10, 20, 20, 35]);
        b.marshal_data(128);

        assert!(!b.is_decoded());
        assert_eq!(b.header.rows_count, 4);
        assert_eq!(b.header.min_timestamp, 10);
        assert_eq!(b.header.max_timestamp, 35);
        assert_eq!(b.header.data_offset, 128);
        assert_eq!(b.rows_count(), 4);

        b.unmarshal_data().unwrap();
        assert_eq!(b.timestamps(), &[10, 20, 20, 35]);
        assert_eq!(b.values(), &[20, 40, 40, 70]);

        // Second decode is a no-op.
        b.unmarshal_data().unwrap();
        assert_eq!(b.rows_count(), 4);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut b = decoded_block(1, &[1, 2, 3]);
        b.marshal_data(0);
        b.data[0] ^= 0xff;
        let err = b.unmarshal_data().unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_copy_from_skips_consumed_rows() {
        let mut src = decoded_block(1, &[1, 2, 3, 4]);
        assert!(src.next_row());
        assert!(src.next_row());

        let mut dst = Block::new();
        dst.copy_from(&src);
        assert_eq!(dst.next_idx, 0);
        assert_eq!(dst.timestamps(), &[3, 4]);
        assert_eq!(dst.rows_count(), 2);

        dst.fixup_timestamps();
        assert_eq!(dst.header.min_timestamp, 3);
        assert_eq!(dst.header.max_timestamp, 4);
    }

    #[test]
    fn test_next_row() {
        let mut b = decoded_block(1, &[1, 2]);
        assert!(b.next_row());
        assert!(b.next_row());
        assert!(!b.next_row());
        assert_eq!(b.rows_count(), 0);
    }

    #[test]
    fn test_time_range_filter() {
        let b = decoded_block(1, &[10, 20, 30, 40]);
        let mut ts = Vec::new();
        let mut vs = Vec::new();
        b.append_rows_with_time_range_filter(&mut ts, &mut vs, &TimeRange::new(15, 30));
        assert_eq!(ts, vec![20, 30]);
        assert_eq!(vs, vec![4.0, 6.0]);

        b.append_rows_with_time_range_filter(&mut ts, &mut vs, &TimeRange::new(41, 50));
        assert_eq!(ts.len(), 2);
    }

    #[test]
    #[should_panic(expected = "BUG")]
    fn test_assert_mergeable_different_series() {
        decoded_block(1, &[1]).assert_mergeable(&decoded_block(2, &[1]));
    }

    #[test]
    fn test_too_big() {
        let timestamps: Vec<i64> = (0..MAX_ROWS_PER_BLOCK as i64).collect();
        let b = decoded_block(1, &timestamps);
        assert!(b.too_big());
        let b = decoded_block(1, &timestamps[1..]);
        assert!(!b.too_big());
    }
}
