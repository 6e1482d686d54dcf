//! Time series identifier

use crate::{Result, StoreError};
use bytes::{Buf, BufMut};
use std::cmp::Ordering;
use std::fmt;

/// Unique identifier of a time series.
///
/// Series are laid out on disk in `Tsid` order. Fields are compared in
/// declaration order, so series of the same metric group, job and instance end
/// up next to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Tsid {
    /// Identifier of the metric name without labels
    pub metric_group_id: u64,
    /// Identifier of the `job` label
    pub job_id: u32,
    /// Identifier of the `instance` label
    pub instance_id: u32,
    /// Unique identifier of the series
    pub metric_id: u64,
}

impl Tsid {
    /// Size of the marshaled representation. Part of the on-disk format.
    pub const MARSHALED_SIZE: usize = 24;

    /// Create a tsid with only `metric_id` set
    pub fn with_metric_id(metric_id: u64) -> Self {
        Self {
            metric_id,
            ..Default::default()
        }
    }

    /// Returns true if `self` sorts before `other`
    #[inline]
    pub fn less(&self, other: &Tsid) -> bool {
        self.cmp(other) == Ordering::Less
    }

    /// Append the marshaled tsid to `dst`
    pub fn marshal(&self, dst: &mut impl BufMut) {
        dst.put_u64_le(self.metric_group_id);
        dst.put_u32_le(self.job_id);
        dst.put_u32_le(self.instance_id);
        dst.put_u64_le(self.metric_id);
    }

    /// Read a marshaled tsid from the front of `src`
    pub fn unmarshal(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < Self::MARSHALED_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "too short buffer for tsid; got {} bytes; want {} bytes",
                src.remaining(),
                Self::MARSHALED_SIZE
            )));
        }
        Ok(Self {
            metric_group_id: src.get_u64_le(),
            job_id: src.get_u32_le(),
            instance_id: src.get_u32_le(),
            metric_id: src.get_u64_le(),
        })
    }
}

impl Ord for Tsid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.metric_group_id
            .cmp(&other.metric_group_id)
            .then(self.job_id.cmp(&other.job_id))
            .then(self.instance_id.cmp(&other.instance_id))
            .then(self.metric_id.cmp(&other.metric_id))
    }
}

impl PartialOrd for Tsid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Tsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{metric_group_id={}, job_id={}, instance_id={}, metric_id={}}}",
            self.metric_group_id, self.job_id, self.instance_id, self.metric_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_priority() {
        let a = Tsid {
            metric_group_id: 1,
            job_id: 9,
            instance_id: 9,
            metric_id: 9,
        };
        let b = Tsid {
            metric_group_id: 2,
            job_id: 0,
            instance_id: 0,
            metric_id: 0,
        };
        assert!(a.less(&b));

        let c = Tsid {
            job_id: 10,
            metric_id: 1,
            ..a
        };
        assert!(a.less(&c));
        assert!(!c.less(&a));
        assert!(!a.less(&a));

        let d = Tsid {
            instance_id: 10,
            metric_id: 0,
            ..a
        };
        assert!(a.less(&d));
    }

    #[test]
    fn test_marshaled_size() {
        let tsid = Tsid {
            metric_group_id: 0x0102030405060708,
            job_id: 42,
            instance_id: 7,
            metric_id: u64::MAX,
        };
        let mut buf = Vec::new();
        tsid.marshal(&mut buf);
        assert_eq!(buf.len(), Tsid::MARSHALED_SIZE);

        let mut src = &buf[..];
        assert_eq!(Tsid::unmarshal(&mut src).unwrap(), tsid);
        assert!(src.is_empty());
    }

    #[test]
    fn test_unmarshal_short_buffer() {
        let buf = [0u8; 10];
        assert!(Tsid::unmarshal(&mut &buf[..]).is_err());
    }
}
