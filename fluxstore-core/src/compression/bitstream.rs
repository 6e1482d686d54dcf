//! Bit-level I/O for block payloads

use crate::{Result, StoreError};

/// Big-endian bit writer
#[derive(Debug, Default)]
pub struct BitWriter {
    buffer: Vec<u8>,
    /// Pending bits, left-aligned in the low `pending_bits` bits
    pending: u64,
    pending_bits: u32,
}

impl BitWriter {
    /// Create with capacity hint in bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            pending: 0,
            pending_bits: 0,
        }
    }

    /// Write a single bit
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(bit as u64, 1);
    }

    /// Write the low `num_bits` bits of `value`, most significant first
    #[inline]
    pub fn write_bits(&mut self, value: u64, num_bits: u32) {
        debug_assert!(num_bits <= 64);
        if num_bits == 0 {
            return;
        }
        if num_bits > 32 {
            self.write_bits(value >> 32, num_bits - 32);
            self.write_bits(value & 0xffff_ffff, 32);
            return;
        }
        let value = value & ((1u64 << num_bits) - 1);
        self.pending = (self.pending << num_bits) | value;
        self.pending_bits += num_bits;
        while self.pending_bits >= 8 {
            self.pending_bits -= 8;
            self.buffer.push((self.pending >> self.pending_bits) as u8);
        }
        self.pending &= (1u64 << self.pending_bits) - 1;
    }

    /// Finish writing and return the buffer, zero-padding the last byte
    pub fn finish(mut self) -> Vec<u8> {
        if self.pending_bits > 0 {
            self.buffer
                .push((self.pending << (8 - self.pending_bits)) as u8);
        }
        self.buffer
    }
}

/// Bit reader over a buffer produced by [`BitWriter`]
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    /// Create a new BitReader
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read a single bit
    #[inline]
    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Read `num_bits` bits as a u64
    #[inline]
    pub fn read_bits(&mut self, num_bits: u32) -> Result<u64> {
        debug_assert!(num_bits <= 64);
        if self.position + num_bits as usize > self.data.len() * 8 {
            return Err(StoreError::Compression(format!(
                "unexpected end of bit stream; need {} bits at bit offset {}; have {} bits",
                num_bits,
                self.position,
                self.data.len() * 8
            )));
        }
        let mut value = 0u64;
        let mut left = num_bits;
        while left > 0 {
            let byte = self.data[self.position / 8];
            let bit_offset = (self.position % 8) as u32;
            let available = 8 - bit_offset;
            let take = available.min(left);
            let bits = (byte >> (available - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | bits as u64;
            self.position += take as usize;
            left -= take;
        }
        Ok(value)
    }

    /// Get the current position in bits
    pub fn position(&self) -> usize {
        self.position
    }
}
