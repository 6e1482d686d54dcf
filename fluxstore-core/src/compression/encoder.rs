//! Block payload encoder
//!
//! Timestamps are delta-of-delta coded, mantissas are XOR coded against the
//! previous mantissa with a leading/trailing zero window.

use super::bitstream::BitWriter;
use crate::decimal::is_special_value;

/// Marks the value window as unset so the first non-zero XOR opens a new one
pub(super) const NO_WINDOW: u32 = u32::MAX;

/// Encoder for one block of `(timestamp, mantissa)` pairs
pub struct BlockEncoder {
    writer: BitWriter,
    count: usize,
    precision_bits: u8,

    prev_timestamp: i64,
    prev_timestamp_delta: i64,

    prev_value_bits: u64,
    prev_leading_zeros: u32,
    prev_trailing_zeros: u32,
}

impl BlockEncoder {
    /// Create an encoder keeping `precision_bits` significant mantissa bits
    pub fn new(precision_bits: u8) -> Self {
        Self {
            writer: BitWriter::with_capacity(1024),
            count: 0,
            precision_bits,
            prev_timestamp: 0,
            prev_timestamp_delta: 0,
            prev_value_bits: 0,
            prev_leading_zeros: NO_WINDOW,
            prev_trailing_zeros: 0,
        }
    }

    /// Encode a timestamp and mantissa pair
    pub fn encode(&mut self, timestamp: i64, value: i64) {
        let value_bits = round_mantissa(value, self.precision_bits) as u64;
        if self.count == 0 {
            self.writer.write_bits(timestamp as u64, 64);
            self.writer.write_bits(value_bits, 64);
            self.prev_timestamp = timestamp;
            self.prev_value_bits = value_bits;
        } else {
            self.encode_timestamp(timestamp);
            self.encode_value(value_bits);
        }
        self.count += 1;
    }

    /// Finish encoding and return the payload
    pub fn finish(self) -> Vec<u8> {
        self.writer.finish()
    }

    fn encode_timestamp(&mut self, timestamp: i64) {
        let delta = timestamp.wrapping_sub(self.prev_timestamp);
        let dod = delta.wrapping_sub(self.prev_timestamp_delta);

        match dod {
            0 => self.writer.write_bit(false),
            -63..=64 => {
                self.writer.write_bits(0b10, 2);
                self.writer.write_bits((dod + 63) as u64, 7);
            }
            -255..=256 => {
                self.writer.write_bits(0b110, 3);
                self.writer.write_bits((dod + 255) as u64, 9);
            }
            -2047..=2048 => {
                self.writer.write_bits(0b1110, 4);
                self.writer.write_bits((dod + 2047) as u64, 12);
            }
            _ => {
                self.writer.write_bits(0b1111, 4);
                self.writer.write_bits(dod as u64, 64);
            }
        }

        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;
    }

    fn encode_value(&mut self, value_bits: u64) {
        let xor = value_bits ^ self.prev_value_bits;
        self.prev_value_bits = value_bits;

        if xor == 0 {
            self.writer.write_bit(false);
            return;
        }
        self.writer.write_bit(true);

        // 5 bits are reserved for the leading zero count.
        let leading_zeros = xor.leading_zeros().min(31);
        let trailing_zeros = xor.trailing_zeros();

        if self.prev_leading_zeros != NO_WINDOW
            && leading_zeros >= self.prev_leading_zeros
            && trailing_zeros >= self.prev_trailing_zeros
        {
            self.writer.write_bit(false);
            let meaningful_bits = 64 - self.prev_leading_zeros - self.prev_trailing_zeros;
            self.writer
                .write_bits(xor >> self.prev_trailing_zeros, meaningful_bits);
            return;
        }

        self.writer.write_bit(true);
        let meaningful_bits = 64 - leading_zeros - trailing_zeros;
        self.writer.write_bits(leading_zeros as u64, 5);
        // 64 meaningful bits do not fit in 6 bits and are written as 0.
        self.writer.write_bits((meaningful_bits & 63) as u64, 6);
        self.writer.write_bits(xor >> trailing_zeros, meaningful_bits);

        self.prev_leading_zeros = leading_zeros;
        self.prev_trailing_zeros = trailing_zeros;
    }
}

/// Encode a whole block. `timestamps` and `values` must have equal length.
pub fn encode_block(timestamps: &[i64], values: &[i64], precision_bits: u8) -> Vec<u8> {
    debug_assert_eq!(timestamps.len(), values.len());
    let mut encoder = BlockEncoder::new(precision_bits);
    for (&ts, &v) in timestamps.iter().zip(values) {
        encoder.encode(ts, v);
    }
    encoder.finish()
}

/// Zeroes the low bits of `v` so at most `precision_bits` significant bits remain.
///
/// Special values and `precision_bits >= 64` are returned unchanged.
pub fn round_mantissa(v: i64, precision_bits: u8) -> i64 {
    if precision_bits >= 64 || is_special_value(v) {
        return v;
    }
    let u = v.unsigned_abs();
    let bits = 64 - u.leading_zeros();
    let precision_bits = precision_bits.max(1) as u32;
    if bits <= precision_bits {
        return v;
    }
    let shift = bits - precision_bits;
    let truncated = ((u >> shift) << shift) as i64;
    if v < 0 {
        -truncated
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_mantissa() {
        assert_eq!(round_mantissa(0b1011_0111, 64), 0b1011_0111);
        assert_eq!(round_mantissa(0b1011_0111, 4), 0b1011_0000);
        assert_eq!(round_mantissa(-0b1011_0111, 4), -0b1011_0000);
        assert_eq!(round_mantissa(0b101, 8), 0b101);
        assert_eq!(round_mantissa(i64::MAX, 1), i64::MAX);
        assert_eq!(round_mantissa(i64::MIN, 1), i64::MIN);
    }

    #[test]
    fn test_constant_series_is_small() {
        let timestamps: Vec<i64> = (0..1000).map(|i| 1_000_000 + i * 10_000).collect();
        let values = vec![42i64; 1000];
        let data = encode_block(&timestamps, &values, 64);

        // The first pair is raw and the second carries the initial delta,
        // every following pair costs 2 bits.
        assert!(data.len() < 300, "payload too big: {}", data.len());
    }
}
