//! FluxStore CLI - generate, inspect, compact and search parts
//!
//! # Commands
//!
//! - `generate` - Write a part filled with synthetic series
//! - `inspect` - Print the part header and metaindex rows of a part
//! - `compact` - Merge several parts into one, optionally dropping series
//! - `search` - Print the samples of the given series found in a set of parts
//!
//! # Examples
//!
//! ```bash
//! fluxstore generate -o ./p1 --series 100 --rows 1000
//! fluxstore generate -o ./p2 --series 100 --rows 1000 --seed 7
//! fluxstore compact -o ./merged ./p1 ./p2 --delete 3
//! fluxstore search -m 1 -m 2 ./merged
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use fluxstore_core::{
    format_timestamp, merge_block_streams, unpack_series, BlockSource, BlockStreamReader,
    BlockStreamWriter, InmemoryPart, MergeCounters, Part, PartHeader, Partition, PartitionSearch,
    RawRow, TimeRange, Tsid,
};

#[derive(Parser)]
#[command(name = "fluxstore")]
#[command(version, about = "Generate, inspect, compact and search FluxStore parts")]
#[command(after_help = "Use 'fluxstore <command> --help' for more information.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a part filled with synthetic series
    Generate {
        /// Output part directory
        #[arg(short, long)]
        out: PathBuf,

        /// Number of series
        #[arg(long, default_value = "10")]
        series: u64,

        /// Rows per series
        #[arg(long, default_value = "1000")]
        rows: usize,

        /// Significant bits kept per value (1..=64)
        #[arg(long, default_value = "64", value_parser = clap::value_parser!(u8).range(1..=64))]
        precision_bits: u8,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Timestamp of the first sample in milliseconds
        #[arg(long, default_value = "1700000000000")]
        start: i64,

        /// Scrape interval in milliseconds
        #[arg(long, default_value = "15000")]
        interval: i64,
    },

    /// Print the part header and metaindex rows of a part
    Inspect {
        /// Part directory
        part: PathBuf,
    },

    /// Merge parts into a single part
    Compact {
        /// Output part directory
        #[arg(short, long)]
        out: PathBuf,

        /// Metric ids whose rows are dropped
        #[arg(short, long)]
        delete: Vec<u64>,

        /// Source part directories
        #[arg(required = true)]
        parts: Vec<PathBuf>,
    },

    /// Print the samples of the given series
    Search {
        /// Metric ids to look up
        #[arg(short, long, required = true)]
        metric_id: Vec<u64>,

        /// Smallest timestamp in milliseconds, inclusive
        #[arg(long, default_value_t = i64::MIN, allow_negative_numbers = true)]
        start: i64,

        /// Largest timestamp in milliseconds, inclusive
        #[arg(long, default_value_t = i64::MAX, allow_negative_numbers = true)]
        end: i64,

        /// Part directories
        #[arg(required = true)]
        parts: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            out,
            series,
            rows,
            precision_bits,
            seed,
            start,
            interval,
        } => generate(&out, series, rows, precision_bits, seed, start, interval),
        Commands::Inspect { part } => inspect(&part),
        Commands::Compact { out, delete, parts } => compact(&out, &delete, &parts),
        Commands::Search {
            metric_id,
            start,
            end,
            parts,
        } => search(&metric_id, TimeRange::new(start, end), &parts),
    }
}

fn generate(
    out: &Path,
    series: u64,
    rows: usize,
    precision_bits: u8,
    seed: u64,
    start: i64,
    interval: i64,
) -> Result<()> {
    if series == 0 || rows == 0 {
        bail!("--series and --rows must be positive");
    }
    if interval <= 0 {
        bail!("--interval must be positive");
    }
    let mut rng = StdRng::seed_from_u64(seed);

    let mut raw = Vec::with_capacity(series as usize * rows);
    for metric_id in 1..=series {
        let tsid = Tsid {
            metric_group_id: metric_id % 4,
            job_id: 1,
            instance_id: (metric_id % 8) as u32,
            metric_id,
        };
        let mut value: f64 = rng.gen_range(0.0..1000.0);
        let mut ts = start;
        for _ in 0..rows {
            let mut row = RawRow::new(tsid, ts, (value * 100.0).round() / 100.0);
            row.precision_bits = precision_bits;
            raw.push(row);
            value += rng.gen_range(-1.0..1.0);
            ts += interval + rng.gen_range(-(interval / 10)..=interval / 10);
        }
    }

    let mp = InmemoryPart::from_rows(&mut raw);
    mp.store_to_disk(out)
        .with_context(|| format!("cannot store part to {}", out.display()))?;

    info!(
        path = %out.display(),
        rows = mp.ph.rows_count,
        blocks = mp.ph.blocks_count,
        size_bytes = mp.size_bytes(),
        "generated part"
    );
    Ok(())
}

fn open_part(dir: &Path) -> Result<Arc<Part>> {
    let part = Part::open(dir).with_context(|| format!("cannot open part {}", dir.display()))?;
    Ok(Arc::new(part))
}

fn inspect(dir: &Path) -> Result<()> {
    let part = open_part(dir)?;
    println!("part: {}", dir.display());
    println!("  {}", part.header());
    println!("  size: {} bytes", part.size_bytes());
    println!("  index blocks: {}", part.metaindex().len());
    for (i, mr) in part.metaindex().iter().enumerate() {
        println!(
            "  [{}] first_tsid={} headers={} time=[{}, {}] offset={} size={}",
            i,
            mr.tsid,
            mr.block_headers_count,
            format_timestamp(mr.min_timestamp),
            format_timestamp(mr.max_timestamp),
            mr.index_block_offset,
            mr.index_block_size
        );
    }
    Ok(())
}

fn compact(out: &Path, delete: &[u64], dirs: &[PathBuf]) -> Result<()> {
    let readers = dirs
        .iter()
        .map(|dir| open_part(dir).map(BlockStreamReader::new))
        .collect::<Result<Vec<_>>>()?;
    let deleted: HashSet<u64> = delete.iter().copied().collect();

    let mut bsw = BlockStreamWriter::new();
    let mut ph = PartHeader::default();
    let counters = MergeCounters::default();
    merge_block_streams(
        &mut ph,
        &mut bsw,
        readers,
        None,
        (!deleted.is_empty()).then_some(&deleted),
        &counters,
    )
    .context("cannot merge parts")?;

    info!(
        parts = dirs.len(),
        rows_merged = counters.rows_merged(),
        rows_deleted = counters.rows_deleted(),
        blocks = ph.blocks_count,
        "compacted parts"
    );
    if ph.rows_count == 0 {
        bail!("no rows left after deleting {} series", deleted.len());
    }

    let mp = bsw.into_inmemory_part(ph);
    mp.store_to_disk(out)
        .with_context(|| format!("cannot store part to {}", out.display()))?;
    Ok(())
}

fn search(metric_ids: &[u64], tr: TimeRange, dirs: &[PathBuf]) -> Result<()> {
    if tr.min_timestamp > tr.max_timestamp {
        bail!("--start must not exceed --end");
    }

    let parts = dirs
        .iter()
        .map(|dir| open_part(dir))
        .collect::<Result<Vec<_>>>()?;
    let pt = Arc::new(Partition::new(TimeRange::all()));
    for part in parts {
        pt.add_part(part);
    }

    // Parts address series by full tsid; resolve the metric ids first.
    let wanted: HashSet<u64> = metric_ids.iter().copied().collect();
    let tsids = resolve_tsids(&pt, &wanted)?;

    let mut pts = PartitionSearch::new();
    pts.init(&pt, &tsids, tr);
    let result = unpack_series(&mut pts);
    pts.must_close();

    for s in result.context("search failed")? {
        println!("{} ({} samples)", s.tsid, s.timestamps.len());
        for (ts, v) in s.timestamps.iter().zip(&s.values) {
            println!("  {} {}", format_timestamp(*ts), v);
        }
    }
    Ok(())
}

fn resolve_tsids(pt: &Partition, wanted: &HashSet<u64>) -> Result<Vec<Tsid>> {
    let mut tsids = Vec::new();
    let parts = pt.get_parts();
    for part in &parts {
        let mut bsr = BlockStreamReader::new(Arc::clone(part));
        while bsr
            .next_block()
            .with_context(|| format!("cannot read part {}", part))?
        {
            let tsid = *bsr.block().tsid();
            if wanted.contains(&tsid.metric_id) && tsids.last() != Some(&tsid) {
                tsids.push(tsid);
            }
        }
    }
    pt.put_parts(parts);
    Ok(tsids)
}
