//! Full-table decoding: raw entries to per-(device, operation) bucket series.
//!
//! BPF hash map iteration yields entries in arbitrary order and may race
//! with in-kernel writers. Decoding is therefore order-independent and
//! treats every malformed entry as skippable, never fatal. Each scrape
//! decodes from scratch; nothing here survives across passes.

use std::collections::BTreeMap;

use super::key::{decode_key, decode_value, KeyLayout};

/// One raw entry from a table source, as handed over by the map iterator.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RawEntry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Identifies one histogram group within a table.
///
/// `Ord` so the group map iterates deterministically: two decode passes over
/// the same raw entries produce identical emission order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub device: String,
    pub operation: u8,
}

/// Sparse log2 bucket occupancy counts for one group.
///
/// Only occupied buckets are stored; devices with a handful of active
/// buckets don't allocate full-length arrays. Iteration is index-ordered,
/// which the cumulative-sum step relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketSeries {
    counts: BTreeMap<u64, u64>,
}

impl BucketSeries {
    /// Store `count` at `bucket`, replacing any previous value
    /// (last-write-wins; a correct tracer writes each slot once per pass).
    pub fn set(&mut self, bucket: u64, count: u64) {
        self.counts.insert(bucket, count);
    }

    /// Occupancy at `bucket`, zero if unoccupied.
    pub fn get(&self, bucket: u64) -> u64 {
        self.counts.get(&bucket).copied().unwrap_or(0)
    }

    /// Occupied buckets in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.counts.iter().map(|(&b, &c)| (b, c))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// All bucket series decoded from one table, keyed by (device, operation).
pub type DeviceOpGroups = BTreeMap<GroupKey, BucketSeries>;

/// Result of one full decode pass over a table.
#[derive(Debug, Default)]
pub struct TableDecode {
    /// Entries that decoded cleanly and landed in a bucket series.
    pub entries_processed: u64,
    /// Entries dropped for parse errors or bucket-index bound violations.
    pub entries_skipped: u64,
    pub groups: DeviceOpGroups,
}

/// Decode every raw entry of one table snapshot.
///
/// Entries whose key or value fail to decode are skipped. Entries whose
/// bucket index is at or beyond `bucket_count` are dropped too: that means
/// the kernel program and this decoder disagree about the table schema,
/// which is a configuration problem, not a reason to fail the scrape.
pub fn decode_table<I>(entries: I, layout: &KeyLayout, bucket_count: usize) -> TableDecode
where
    I: IntoIterator<Item = RawEntry>,
{
    let mut decode = TableDecode::default();

    for entry in entries {
        let key = match decode_key(&entry.key, layout) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable table key");
                decode.entries_skipped += 1;
                continue;
            }
        };

        let value = match decode_value(&entry.value, layout.encoding) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(
                    device = %key.device,
                    bucket = key.bucket,
                    error = %e,
                    "skipping undecodable table value",
                );
                decode.entries_skipped += 1;
                continue;
            }
        };

        if key.bucket >= bucket_count as u64 {
            tracing::debug!(
                device = %key.device,
                operation = key.operation,
                bucket = key.bucket,
                bucket_count,
                "bucket index out of range, kernel and decoder schemas disagree",
            );
            decode.entries_skipped += 1;
            continue;
        }

        decode
            .groups
            .entry(GroupKey {
                device: key.device,
                operation: key.operation,
            })
            .or_default()
            .set(key.bucket, value);

        decode.entries_processed += 1;
    }

    decode
}
