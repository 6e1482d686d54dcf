//! In-memory part

use super::block::Block;
use super::writer::BlockStreamWriter;
use super::{
    BlockSink, PartHeader, DATA_FILENAME, INDEX_FILENAME, METAINDEX_FILENAME,
};
use crate::config::MAX_ROWS_PER_BLOCK;
use crate::decimal::append_float_to_decimal;
use crate::types::RawRow;
use crate::Result;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use tracing::debug;

/// Sections of a part held in memory
#[derive(Debug, Clone, Default)]
pub struct InmemoryPart {
    /// Part header
    pub ph: PartHeader,
    /// Block payloads
    pub data: Vec<u8>,
    /// Compressed index blocks
    pub index: Vec<u8>,
    /// Compressed metaindex
    pub metaindex: Vec<u8>,
}

impl InmemoryPart {
    /// Build a part from raw rows.
    ///
    /// Rows are sorted by `(tsid, timestamp)` in place. Each series is cut
    /// into blocks of at most `MAX_ROWS_PER_BLOCK` rows; a block keeps the
    /// precision of its first row.
    pub fn from_rows(rows: &mut [RawRow]) -> Self {
        rows.sort_by(|a, b| a.tsid.cmp(&b.tsid).then(a.timestamp.cmp(&b.timestamp)));

        let mut bsw = BlockStreamWriter::new();
        let mut ph = PartHeader::default();
        let rows_merged = AtomicU64::new(0);

        let mut block = Block::new();
        let mut timestamps = Vec::new();
        let mut floats = Vec::new();
        let mut mantissas = Vec::new();

        for series in rows.chunk_by(|a, b| a.tsid == b.tsid) {
            for chunk in series.chunks(MAX_ROWS_PER_BLOCK) {
                timestamps.clear();
                floats.clear();
                mantissas.clear();
                timestamps.extend(chunk.iter().map(|r| r.timestamp));
                floats.extend(chunk.iter().map(|r| r.value));
                let scale = append_float_to_decimal(&mut mantissas, &floats);

                let precision_bits = chunk[0].precision_bits.clamp(1, 64);
                block.init(chunk[0].tsid, &timestamps, &mantissas, scale, precision_bits);
                bsw.write_external_block(&mut block, &mut ph, &rows_merged);
            }
        }

        debug!(
            rows = ph.rows_count,
            blocks = ph.blocks_count,
            "built in-memory part"
        );
        bsw.into_inmemory_part(ph)
    }

    /// Write the part sections into `dir`, creating it if needed
    pub fn store_to_disk(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(DATA_FILENAME), &self.data)?;
        std::fs::write(dir.join(INDEX_FILENAME), &self.index)?;
        std::fs::write(dir.join(METAINDEX_FILENAME), &self.metaindex)?;
        // Metadata goes last, a directory without it is not a part.
        self.ph.write_metadata(dir)?;
        debug!(path = %dir.display(), "stored part");
        Ok(())
    }

    /// Size of all sections in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len() + self.index.len() + self.metaindex.len()
    }
}
