//! Compression for block payloads and index sections
//!
//! Block payloads use a Gorilla-style bit stream over decimal mantissas
//! (see "Gorilla: A Fast, Scalable, In-Memory Time Series Database").
//! Index blocks and the metaindex are compressed with LZ4.

mod bitstream;
mod decoder;
mod encoder;

pub use bitstream::{BitReader, BitWriter};
pub use decoder::{decode_block, BlockDecoder};
pub use encoder::{encode_block, round_mantissa, BlockEncoder};

use crate::{Result, StoreError};

/// LZ4-compress a section, prefixing the uncompressed size
pub fn compress_section(src: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(src)
}

/// Largest expansion of an LZ4 block
const LZ4_MAX_RATIO: usize = 255;

/// Decompress a section produced by [`compress_section`].
///
/// The size prefix is checked against `max_size` and against what the
/// compressed bytes could possibly expand to before anything is allocated.
pub fn decompress_section(src: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let Some(prefix) = src.get(..4) else {
        return Err(StoreError::Compression(format!(
            "LZ4 section of {} bytes is too short for its size prefix",
            src.len()
        )));
    };
    let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    let limit = max_size.min((src.len() - 4).saturating_mul(LZ4_MAX_RATIO));
    if declared > limit {
        return Err(StoreError::Compression(format!(
            "LZ4 section declares {} uncompressed bytes; at most {} are possible",
            declared, limit
        )));
    }
    lz4_flex::decompress_size_prepended(src)
        .map_err(|e| StoreError::Compression(format!("LZ4 decompression failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_garbage() {
        let compressed = compress_section(&[7u8; 4096]);
        assert!(compressed.len() < 4096);
        assert_eq!(
            decompress_section(&compressed, usize::MAX).unwrap(),
            vec![7u8; 4096]
        );

        assert!(matches!(
            decompress_section(&[0xff, 1, 0, 0, 1, 2, 3], usize::MAX),
            Err(StoreError::Compression(_))
        ));
        assert!(matches!(
            decompress_section(&[1, 2], usize::MAX),
            Err(StoreError::Compression(_))
        ));
    }

    #[test]
    fn test_section_size_prefix_is_bounded() {
        let compressed = compress_section(&[7u8; 4096]);
        assert!(decompress_section(&compressed, 4096).is_ok());
        assert!(matches!(
            decompress_section(&compressed, 4095),
            Err(StoreError::Compression(_))
        ));

        // A corrupt prefix claiming ~2 GiB is rejected without allocating.
        let mut corrupt = compressed.clone();
        corrupt[..4].copy_from_slice(&0x7fff_ffffu32.to_le_bytes());
        let err = decompress_section(&corrupt, usize::MAX).unwrap_err();
        assert!(err.to_string().contains("at most"));
    }
}
