//! Block payload decoder

use super::bitstream::BitReader;
use super::encoder::NO_WINDOW;
use crate::{Result, StoreError};

/// Decoder for payloads produced by [`super::BlockEncoder`]
pub struct BlockDecoder<'a> {
    reader: BitReader<'a>,
    count: usize,
    decoded: usize,

    prev_timestamp: i64,
    prev_timestamp_delta: i64,

    prev_value_bits: u64,
    prev_leading_zeros: u32,
    prev_trailing_zeros: u32,
}

impl<'a> BlockDecoder<'a> {
    /// Create a decoder expecting `count` pairs in `data`
    pub fn new(data: &'a [u8], count: usize) -> Self {
        Self {
            reader: BitReader::new(data),
            count,
            decoded: 0,
            prev_timestamp: 0,
            prev_timestamp_delta: 0,
            prev_value_bits: 0,
            prev_leading_zeros: NO_WINDOW,
            prev_trailing_zeros: 0,
        }
    }

    /// Decode the next pair, `None` once `count` pairs were returned
    pub fn decode_next(&mut self) -> Result<Option<(i64, i64)>> {
        if self.decoded >= self.count {
            return Ok(None);
        }

        let pair = if self.decoded == 0 {
            let timestamp = self.reader.read_bits(64)? as i64;
            let value_bits = self.reader.read_bits(64)?;
            self.prev_timestamp = timestamp;
            self.prev_value_bits = value_bits;
            (timestamp, value_bits as i64)
        } else {
            let timestamp = self.decode_timestamp()?;
            let value = self.decode_value()?;
            (timestamp, value)
        };
        self.decoded += 1;
        Ok(Some(pair))
    }

    fn decode_timestamp(&mut self) -> Result<i64> {
        let dod = if !self.reader.read_bit()? {
            0
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(7)? as i64 - 63
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(9)? as i64 - 255
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(12)? as i64 - 2047
        } else {
            self.reader.read_bits(64)? as i64
        };

        let delta = self.prev_timestamp_delta.wrapping_add(dod);
        let timestamp = self.prev_timestamp.wrapping_add(delta);
        self.prev_timestamp_delta = delta;
        self.prev_timestamp = timestamp;
        Ok(timestamp)
    }

    fn decode_value(&mut self) -> Result<i64> {
        if !self.reader.read_bit()? {
            return Ok(self.prev_value_bits as i64);
        }

        if self.reader.read_bit()? {
            let leading_zeros = self.reader.read_bits(5)? as u32;
            let meaningful_bits = match self.reader.read_bits(6)? as u32 {
                0 => 64,
                n => n,
            };
            if leading_zeros + meaningful_bits > 64 {
                return Err(StoreError::Compression(format!(
                    "invalid value window: {} leading zeros and {} meaningful bits",
                    leading_zeros, meaningful_bits
                )));
            }
            self.prev_leading_zeros = leading_zeros;
            self.prev_trailing_zeros = 64 - leading_zeros - meaningful_bits;
        } else if self.prev_leading_zeros == NO_WINDOW {
            return Err(StoreError::Compression(
                "value window reused before it was set".into(),
            ));
        }

        let meaningful_bits = 64 - self.prev_leading_zeros - self.prev_trailing_zeros;
        let bits = self.reader.read_bits(meaningful_bits)?;
        self.prev_value_bits ^= bits << self.prev_trailing_zeros;
        Ok(self.prev_value_bits as i64)
    }
}

/// Decode `count` pairs from `data`, appending them to `timestamps` and `values`
pub fn decode_block(
    data: &[u8],
    count: usize,
    timestamps: &mut Vec<i64>,
    values: &mut Vec<i64>,
) -> Result<()> {
    timestamps.reserve(count);
    values.reserve(count);
    let mut decoder = BlockDecoder::new(data, count);
    while let Some((ts, v)) = decoder.decode_next()? {
        timestamps.push(ts);
        values.push(v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{encode_block, round_mantissa};
    use rand::{Rng, SeedableRng};

    fn decode(data: &[u8], count: usize) -> (Vec<i64>, Vec<i64>) {
        let mut timestamps = Vec::new();
        let mut values = Vec::new();
        decode_block(data, count, &mut timestamps, &mut values).unwrap();
        (timestamps, values)
    }

    #[test]
    fn test_irregular_samples() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut ts = -5_000i64;
        let mut timestamps = Vec::new();
        let mut values = Vec::new();
        for _ in 0..2000 {
            ts += match rng.gen_range(0..4) {
                0 => 0,
                1 => rng.gen_range(1..100),
                2 => rng.gen_range(1..5_000),
                _ => rng.gen_range(1..1_000_000_000),
            };
            timestamps.push(ts);
            values.push(match rng.gen_range(0..5) {
                0 => 0,
                1 => i64::MAX,
                2 => i64::MIN,
                3 => rng.gen::<i64>(),
                _ => rng.gen_range(-1_000..1_000),
            });
        }

        let data = encode_block(&timestamps, &values, 64);
        let (got_ts, got_values) = decode(&data, timestamps.len());
        assert_eq!(got_ts, timestamps);
        assert_eq!(got_values, values);
    }

    #[test]
    fn test_extreme_timestamps() {
        let timestamps = vec![i64::MIN, i64::MAX, 0, i64::MIN + 1, i64::MAX];
        let values = vec![1, 2, 3, 4, 5];
        let data = encode_block(&timestamps, &values, 64);
        assert_eq!(decode(&data, 5), (timestamps, values));
    }

    #[test]
    fn test_precision_bits_truncate_values_only() {
        let timestamps = vec![10, 20, 31, 45];
        let values = vec![123_456_789, -987_654_321, 5, 1 << 40];
        let data = encode_block(&timestamps, &values, 8);
        let (got_ts, got_values) = decode(&data, 4);
        assert_eq!(got_ts, timestamps);
        let want: Vec<i64> = values.iter().map(|&v| round_mantissa(v, 8)).collect();
        assert_eq!(got_values, want);
        assert_eq!(got_values[2], 5);
    }

    #[test]
    fn test_truncated_payload() {
        let timestamps: Vec<i64> = (0..100).map(|i| i * 1000 + (i * i) % 77).collect();
        let values: Vec<i64> = (0..100).map(|i| i * 31 - 1000).collect();
        let data = encode_block(&timestamps, &values, 64);

        let mut ts = Vec::new();
        let mut vs = Vec::new();
        let err = decode_block(&data[..data.len() / 2], 100, &mut ts, &mut vs).unwrap_err();
        assert!(matches!(err, StoreError::Compression(_)));
    }
}
