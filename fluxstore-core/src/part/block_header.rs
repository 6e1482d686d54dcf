//! Block header

use crate::config::MAX_ROWS_PER_BLOCK;
use crate::tsid::Tsid;
use crate::types::Timestamp;
use crate::{Result, StoreError};
use bytes::{Buf, BufMut};

/// Upper bound for the encoded size of one `(timestamp, value)` pair in bytes
const MAX_PAIR_SIZE: u64 = 20;

/// Header describing one block of a part.
///
/// Blocks are ordered by `(tsid, min_timestamp)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHeader {
    /// Series the block belongs to
    pub tsid: Tsid,
    /// Smallest timestamp in the block
    pub min_timestamp: Timestamp,
    /// Largest timestamp in the block
    pub max_timestamp: Timestamp,
    /// Offset of the payload in the part data section
    pub data_offset: u64,
    /// Size of the payload in bytes
    pub data_size: u32,
    /// CRC32 of the payload
    pub data_checksum: u32,
    /// Number of rows in the block
    pub rows_count: u32,
    /// Decimal exponent shared by all values in the block
    pub scale: i16,
    /// Significant bits kept per value, 64 means lossless
    pub precision_bits: u8,
}

impl BlockHeader {
    /// Size of the marshaled header
    pub const MARSHALED_SIZE: usize = Tsid::MARSHALED_SIZE + 8 + 8 + 8 + 4 + 4 + 4 + 2 + 1;

    /// Returns true if `self` sorts before `other` by `(tsid, min_timestamp)`
    #[inline]
    pub fn less(&self, other: &BlockHeader) -> bool {
        // Blocks of one series share the metric id, so avoid the full
        // tsid comparison for them.
        if self.tsid.metric_id == other.tsid.metric_id {
            return self.min_timestamp < other.min_timestamp;
        }
        self.tsid.less(&other.tsid)
    }

    /// Append the marshaled header to `dst`
    pub fn marshal(&self, dst: &mut impl BufMut) {
        self.tsid.marshal(dst);
        dst.put_i64_le(self.min_timestamp);
        dst.put_i64_le(self.max_timestamp);
        dst.put_u64_le(self.data_offset);
        dst.put_u32_le(self.data_size);
        dst.put_u32_le(self.data_checksum);
        dst.put_u32_le(self.rows_count);
        dst.put_i16_le(self.scale);
        dst.put_u8(self.precision_bits);
    }

    /// Read a marshaled header from the front of `src` and validate it
    pub fn unmarshal(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < Self::MARSHALED_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "too short buffer for block header; got {} bytes; want {} bytes",
                src.remaining(),
                Self::MARSHALED_SIZE
            )));
        }
        let bh = Self {
            tsid: Tsid::unmarshal(src)?,
            min_timestamp: src.get_i64_le(),
            max_timestamp: src.get_i64_le(),
            data_offset: src.get_u64_le(),
            data_size: src.get_u32_le(),
            data_checksum: src.get_u32_le(),
            rows_count: src.get_u32_le(),
            scale: src.get_i16_le(),
            precision_bits: src.get_u8(),
        };
        bh.validate()?;
        Ok(bh)
    }

    /// Check the header for values no writer produces
    pub fn validate(&self) -> Result<()> {
        if self.rows_count == 0 {
            return Err(StoreError::InvalidFormat(
                "block header cannot have zero rows".into(),
            ));
        }
        if self.rows_count as usize > MAX_ROWS_PER_BLOCK {
            return Err(StoreError::InvalidFormat(format!(
                "too many rows in block header; got {}; cannot exceed {}",
                self.rows_count, MAX_ROWS_PER_BLOCK
            )));
        }
        if !(1..=64).contains(&self.precision_bits) {
            return Err(StoreError::InvalidFormat(format!(
                "precision bits must be in 1..=64; got {}",
                self.precision_bits
            )));
        }
        if self.min_timestamp > self.max_timestamp {
            return Err(StoreError::InvalidFormat(format!(
                "min timestamp {} exceeds max timestamp {}",
                self.min_timestamp, self.max_timestamp
            )));
        }
        let max_data_size = 16 + self.rows_count as u64 * MAX_PAIR_SIZE;
        if self.data_size as u64 > max_data_size {
            return Err(StoreError::InvalidFormat(format!(
                "too big payload for {} rows; got {} bytes; cannot exceed {} bytes",
                self.rows_count, self.data_size, max_data_size
            )));
        }
        Ok(())
    }
}
