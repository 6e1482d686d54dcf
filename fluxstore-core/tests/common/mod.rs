#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use fluxstore_core::decimal::append_decimal_to_float;
use fluxstore_core::{
    merge_block_streams, BlockHeader, BlockSource, BlockStreamReader, BlockStreamWriter,
    InmemoryPart, MergeCounters, Part, PartHeader, RawRow, Tsid,
};

/// Decoded block as found in a part
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    pub header: BlockHeader,
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
}

pub fn tsid(metric_id: u64) -> Tsid {
    Tsid::with_metric_id(metric_id)
}

/// Rows of one series whose values equal their timestamps
pub fn series_rows(metric_id: u64, timestamps: impl IntoIterator<Item = i64>) -> Vec<RawRow> {
    timestamps
        .into_iter()
        .map(|ts| RawRow::new(tsid(metric_id), ts, ts as f64))
        .collect()
}

pub fn part(mut rows: Vec<RawRow>) -> Arc<Part> {
    Arc::new(Part::from_inmemory(InmemoryPart::from_rows(&mut rows)).unwrap())
}

pub fn reader(rows: Vec<RawRow>) -> BlockStreamReader {
    BlockStreamReader::new(part(rows))
}

pub struct MergeOutput {
    pub ph: PartHeader,
    pub counters: MergeCounters,
    pub part: Option<Arc<Part>>,
}

pub fn merge(sources: Vec<BlockStreamReader>, deleted: Option<&HashSet<u64>>) -> MergeOutput {
    let mut bsw = BlockStreamWriter::new();
    let mut ph = PartHeader::default();
    let counters = MergeCounters::default();
    merge_block_streams(&mut ph, &mut bsw, sources, None, deleted, &counters).unwrap();
    let part = (ph.rows_count > 0)
        .then(|| Arc::new(Part::from_inmemory(bsw.into_inmemory_part(ph)).unwrap()));
    MergeOutput { ph, counters, part }
}

/// Read and decode every block of `part` in stored order
pub fn read_blocks(part: &Arc<Part>) -> Vec<DecodedBlock> {
    let mut bsr = BlockStreamReader::new(Arc::clone(part));
    let mut blocks = Vec::new();
    while bsr.next_block().unwrap() {
        let b = bsr.block_mut();
        let header = *b.header();
        b.unmarshal_data().unwrap();
        let mut values = Vec::new();
        append_decimal_to_float(&mut values, b.values(), b.header().scale);
        blocks.push(DecodedBlock {
            header,
            timestamps: b.timestamps().to_vec(),
            values,
        });
    }
    blocks
}

/// Every row of `part` as `(metric_id, timestamp, value)` in stored order
pub fn read_rows(part: &Arc<Part>) -> Vec<(u64, i64, f64)> {
    read_blocks(part)
        .into_iter()
        .flat_map(|b| {
            let id = b.header.tsid.metric_id;
            b.timestamps
                .into_iter()
                .zip(b.values)
                .map(move |(ts, v)| (id, ts, v))
        })
        .collect()
}
