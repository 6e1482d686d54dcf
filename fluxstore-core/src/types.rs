//! Core types for FluxStore

use crate::tsid::Tsid;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Time range for searches and part bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub min_timestamp: Timestamp,
    /// End timestamp (inclusive)
    pub max_timestamp: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(min_timestamp: Timestamp, max_timestamp: Timestamp) -> Self {
        Self {
            min_timestamp,
            max_timestamp,
        }
    }

    /// Range covering every representable timestamp
    pub fn all() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.min_timestamp && ts <= self.max_timestamp
    }

    /// Check if the range intersects `[min_timestamp, max_timestamp]`
    pub fn overlaps(&self, min_timestamp: Timestamp, max_timestamp: Timestamp) -> bool {
        self.min_timestamp <= max_timestamp && self.max_timestamp >= min_timestamp
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}]",
            format_timestamp(self.min_timestamp),
            format_timestamp(self.max_timestamp)
        )
    }
}

/// Formats a millisecond timestamp as RFC 3339, falling back to the raw number
/// for values chrono cannot represent.
pub fn format_timestamp(ts: Timestamp) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ts) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ts.to_string(),
    }
}

/// A single sample ready to be packed into a part
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRow {
    /// Series the sample belongs to
    pub tsid: Tsid,
    /// Sample timestamp
    pub timestamp: Timestamp,
    /// Sample value
    pub value: f64,
    /// Significant bits kept for the value, 1..=64
    pub precision_bits: u8,
}

impl RawRow {
    /// Create a lossless row
    pub fn new(tsid: Tsid, timestamp: Timestamp, value: f64) -> Self {
        Self {
            tsid,
            timestamp,
            value,
            precision_bits: crate::config::DEFAULT_PRECISION_BITS,
        }
    }
}
