//! Metaindex rows
//!
//! A metaindex row points at one LZ4-compressed index block holding a run of
//! block headers. Rows are sorted by the tsid of their first block header, so
//! searches can skip index blocks without decompressing them.

use super::block_header::BlockHeader;
use crate::compression::decompress_section;
use crate::config::MAX_BLOCK_SIZE;
use crate::tsid::Tsid;
use crate::types::Timestamp;
use crate::{Result, StoreError};
use bytes::{Buf, BufMut};

/// Location and bounds of one index block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaindexRow {
    /// Tsid of the first block header in the index block
    pub tsid: Tsid,
    /// Number of block headers in the index block
    pub block_headers_count: u32,
    /// Smallest timestamp across the index block
    pub min_timestamp: Timestamp,
    /// Largest timestamp across the index block
    pub max_timestamp: Timestamp,
    /// Offset of the compressed index block in the index section
    pub index_block_offset: u64,
    /// Size of the compressed index block
    pub index_block_size: u32,
}

impl MetaindexRow {
    /// Size of the marshaled row
    pub const MARSHALED_SIZE: usize = Tsid::MARSHALED_SIZE + 4 + 8 + 8 + 8 + 4;

    /// Clear the row
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold a block header into the row.
    ///
    /// The first header sets the tsid and the time range, later headers only
    /// widen the time range.
    pub fn register_block_header(&mut self, bh: &BlockHeader) {
        self.block_headers_count += 1;
        if self.block_headers_count == 1 {
            self.tsid = bh.tsid;
            self.min_timestamp = bh.min_timestamp;
            self.max_timestamp = bh.max_timestamp;
            return;
        }
        self.min_timestamp = self.min_timestamp.min(bh.min_timestamp);
        self.max_timestamp = self.max_timestamp.max(bh.max_timestamp);
    }

    /// Append the marshaled row to `dst`
    pub fn marshal(&self, dst: &mut impl BufMut) {
        self.tsid.marshal(dst);
        dst.put_u32_le(self.block_headers_count);
        dst.put_i64_le(self.min_timestamp);
        dst.put_i64_le(self.max_timestamp);
        dst.put_u64_le(self.index_block_offset);
        dst.put_u32_le(self.index_block_size);
    }

    /// Read a marshaled row from the front of `src`
    pub fn unmarshal(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < Self::MARSHALED_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "too short buffer for metaindex row; got {} bytes; want {} bytes",
                src.remaining(),
                Self::MARSHALED_SIZE
            )));
        }
        let mr = Self {
            tsid: Tsid::unmarshal(src)?,
            block_headers_count: src.get_u32_le(),
            min_timestamp: src.get_i64_le(),
            max_timestamp: src.get_i64_le(),
            index_block_offset: src.get_u64_le(),
            index_block_size: src.get_u32_le(),
        };
        if mr.block_headers_count == 0 {
            return Err(StoreError::InvalidFormat(
                "metaindex row cannot have zero block headers".into(),
            ));
        }
        if mr.index_block_size as usize > 2 * MAX_BLOCK_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "too big index block size in metaindex row; got {}; cannot exceed {}",
                mr.index_block_size,
                2 * MAX_BLOCK_SIZE
            )));
        }
        Ok(mr)
    }
}

/// Decompress a metaindex section and unmarshal all its rows
pub fn unmarshal_metaindex_rows(compressed: &[u8]) -> Result<Vec<MetaindexRow>> {
    let data = decompress_section(compressed, usize::MAX)?;
    if data.len() % MetaindexRow::MARSHALED_SIZE != 0 {
        return Err(StoreError::InvalidFormat(format!(
            "metaindex size {} is not a multiple of the row size {}",
            data.len(),
            MetaindexRow::MARSHALED_SIZE
        )));
    }

    let mut src = &data[..];
    let mut rows = Vec::with_capacity(data.len() / MetaindexRow::MARSHALED_SIZE);
    while src.has_remaining() {
        let mr = MetaindexRow::unmarshal(&mut src).map_err(|e| {
            StoreError::InvalidFormat(format!(
                "cannot unmarshal metaindex row #{}: {}",
                rows.len(),
                e
            ))
        })?;
        rows.push(mr);
    }

    if rows.is_empty() {
        return Err(StoreError::InvalidFormat(
            "expecting non-zero metaindex rows".into(),
        ));
    }
    if let Some(pos) = rows.windows(2).position(|w| w[1].tsid.less(&w[0].tsid)) {
        return Err(StoreError::InvalidFormat(format!(
            "metaindex rows are not sorted by tsid: row #{} {} is smaller than row #{} {}",
            pos + 1,
            rows[pos + 1].tsid,
            pos,
            rows[pos].tsid
        )));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compress_section;

    fn row(metric_id: u64, block_headers_count: u32) -> MetaindexRow {
        MetaindexRow {
            tsid: Tsid::with_metric_id(metric_id),
            block_headers_count,
            min_timestamp: 10,
            max_timestamp: 20,
            index_block_offset: metric_id * 100,
            index_block_size: 100,
        }
    }

    fn section(rows: &[MetaindexRow]) -> Vec<u8> {
        let mut buf = Vec::new();
        for mr in rows {
            mr.marshal(&mut buf);
        }
        compress_section(&buf)
    }

    #[test]
    fn test_register_block_header() {
        let mut mr = MetaindexRow::default();
        let mut bh = BlockHeader {
            tsid: Tsid::with_metric_id(7),
            min_timestamp: 50,
            max_timestamp: 60,
            ..Default::default()
        };
        mr.register_block_header(&bh);

        bh.tsid = Tsid::with_metric_id(9);
        bh.min_timestamp = 40;
        bh.max_timestamp = 55;
        mr.register_block_header(&bh);

        assert_eq!(mr.tsid, Tsid::with_metric_id(7));
        assert_eq!(mr.block_headers_count, 2);
        assert_eq!(mr.min_timestamp, 40);
        assert_eq!(mr.max_timestamp, 60);
    }

    #[test]
    fn test_marshaled_size() {
        let mut buf = Vec::new();
        row(1, 1).marshal(&mut buf);
        assert_eq!(buf.len(), 52);
    }

    #[test]
    fn test_unmarshal_rows() {
        let rows = vec![row(1, 3), row(1, 1), row(5, 2)];
        assert_eq!(unmarshal_metaindex_rows(&section(&rows)).unwrap(), rows);
    }

    #[test]
    fn test_unmarshal_rows_rejects_bad_input() {
        // Zero rows.
        assert!(unmarshal_metaindex_rows(&section(&[])).is_err());
        // Unsorted.
        assert!(unmarshal_metaindex_rows(&section(&[row(2, 1), row(1, 1)])).is_err());
        // Zero block headers.
        assert!(unmarshal_metaindex_rows(&section(&[row(1, 0)])).is_err());
        // Oversized index block.
        let mut big = row(1, 1);
        big.index_block_size = 2 * MAX_BLOCK_SIZE as u32 + 1;
        assert!(unmarshal_metaindex_rows(&section(&[big])).is_err());
        // Trailing partial row.
        let mut buf = Vec::new();
        row(1, 1).marshal(&mut buf);
        buf.extend_from_slice(&[0u8; 7]);
        assert!(unmarshal_metaindex_rows(&compress_section(&buf)).is_err());
        // Not compressed at all.
        assert!(unmarshal_metaindex_rows(&[1, 2, 3]).is_err());
    }
}
