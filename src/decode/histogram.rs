//! Cumulative histogram aggregation over decoded bucket series.
//!
//! Prometheus histograms are cumulative: each bucket boundary reports the
//! count of all observations at or below it. The kernel stores per-bucket
//! occupancy instead, so this walk accumulates a running total in strictly
//! ascending bucket order. The sample sum is approximated as
//! `Σ 2^index * count` since log2 bucketing already discarded the exact
//! values; count and sum together still allow averaging over a histogram.

use super::table::DeviceOpGroups;

/// Block I/O request operations recognized for emission.
///
/// Codes are the Linux `req_opf` enum values (linux/blk_types.h). The
/// catalog deliberately covers only the commonly observed operations:
/// anything else is filtered out to bound metric cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqOp {
    Read,
    Write,
    Flush,
    Discard,
    WriteSame,
    WriteZeroes,
}

impl ReqOp {
    /// Maps a raw operation code to a catalog entry, `None` if unrecognized.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::Flush),
            3 => Some(Self::Discard),
            7 => Some(Self::WriteSame),
            9 => Some(Self::WriteZeroes),
            _ => None,
        }
    }

    /// Human-readable label for the `operation` metric dimension.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Flush => "flush",
            Self::Discard => "discard",
            Self::WriteSame => "write_same",
            Self::WriteZeroes => "write_zeroes",
        }
    }
}

/// A ready-to-emit cumulative histogram for one (device, operation) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeHistogram {
    pub device: String,
    pub operation: ReqOp,
    /// `(upper_bound, cumulative_count)` per bucket, ascending; the upper
    /// bound of bucket `i` is `2^i` in the table's unit (µs or KiB).
    pub buckets: Vec<(f64, u64)>,
    pub total_count: u64,
    /// Bucket-value sum approximation, exact reconstruction is not possible
    /// from log2-bucketed counts.
    pub approx_sum: f64,
}

/// Lazily emit one [`CumulativeHistogram`] per group whose operation code
/// is in the [`ReqOp`] catalog.
///
/// Bounds are produced for every index in `0..bucket_count`, including
/// indices with no occupancy, so consumers see a complete bucket ladder.
pub fn emit(
    groups: DeviceOpGroups,
    bucket_count: usize,
) -> impl Iterator<Item = CumulativeHistogram> {
    groups.into_iter().filter_map(move |(group, series)| {
        let operation = ReqOp::from_code(group.operation)?;

        let mut buckets = Vec::with_capacity(bucket_count);
        let mut running = 0u64;
        let mut sum = 0.0f64;

        for index in 0..bucket_count {
            let count = series.get(index as u64);
            let bound = (index as f64).exp2();

            running += count;
            sum += bound * count as f64;
            buckets.push((bound, running));
        }

        Some(CumulativeHistogram {
            device: group.device,
            operation,
            buckets,
            total_count: running,
            approx_sum: sum,
        })
    })
}
