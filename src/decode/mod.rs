//! The histogram decode-and-aggregate engine.
//!
//! Takes sparse, unordered, log2-bucketed counters from a raw table source
//! and turns them into well-formed cumulative histograms per device and
//! I/O operation. Pure and stateless: one decode pass per scrape, no state
//! retained between passes.

pub mod histogram;
pub mod key;
pub mod table;

pub use histogram::{emit, CumulativeHistogram, ReqOp};
pub use key::{decode_key, decode_value, BucketKey, KeyEncoding, KeyError, KeyLayout, DISK_NAME_LEN};
pub use table::{decode_table, BucketSeries, DeviceOpGroups, GroupKey, RawEntry, TableDecode};
