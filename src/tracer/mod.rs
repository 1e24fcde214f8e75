//! Table sources: where raw histogram entries come from.
//!
//! The decode engine only needs an iterable snapshot of `(key, value)` byte
//! pairs plus the schema agreed with the kernel program. [`TableSource`]
//! captures that boundary; the BPF-backed implementation lives in
//! [`bpf`] behind the `bpf` feature, and tests substitute in-memory sources.

#[cfg(feature = "bpf")]
pub mod bpf;

use anyhow::Result;

use crate::decode::{KeyLayout, RawEntry};

/// Which exported histogram a table feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Request latency in microseconds.
    Latency,
    /// Request size in KiB.
    RequestSize,
}

/// Static description of one kernel-side histogram table.
///
/// `bucket_count` must match the slot bound compiled into the BPF program;
/// the decoder drops out-of-range slots rather than trusting it blindly.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub kind: MetricKind,
    pub bucket_count: usize,
    pub layout: KeyLayout,
}

/// Table layout variants the kernel program has shipped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVariant {
    /// One latency and one size table, operation code embedded in each key.
    Combined,
    /// Separate read/write tables, operation implied by the table.
    PerOperation,
}

impl SchemaVariant {
    /// The table set for this schema variant.
    pub fn tables(self) -> Vec<TableSpec> {
        match self {
            Self::Combined => vec![
                TableSpec {
                    name: "io_lat",
                    kind: MetricKind::Latency,
                    bucket_count: 28,
                    layout: KeyLayout::text(),
                },
                TableSpec {
                    name: "io_req_sz",
                    kind: MetricKind::RequestSize,
                    bucket_count: 16,
                    layout: KeyLayout::text(),
                },
            ],
            Self::PerOperation => vec![
                TableSpec {
                    name: "read_lat",
                    kind: MetricKind::Latency,
                    bucket_count: 32,
                    layout: KeyLayout::binary_fixed(0),
                },
                TableSpec {
                    name: "write_lat",
                    kind: MetricKind::Latency,
                    bucket_count: 32,
                    layout: KeyLayout::binary_fixed(1),
                },
                TableSpec {
                    name: "read_req_sz",
                    kind: MetricKind::RequestSize,
                    bucket_count: 16,
                    layout: KeyLayout::binary_fixed(0),
                },
                TableSpec {
                    name: "write_req_sz",
                    kind: MetricKind::RequestSize,
                    bucket_count: 16,
                    layout: KeyLayout::binary_fixed(1),
                },
            ],
        }
    }
}

/// A snapshot-iterable histogram table populated by the kernel tracer.
///
/// `snapshot` reads the full entry set in unspecified order. The kernel
/// side keeps incrementing counters while we read; individual u64 reads
/// are atomic at the map layer, so a racy snapshot is stale at worst,
/// never corrupt. No locking is available or attempted.
pub trait TableSource: Send + Sync {
    /// Table name, also the `table` label on the entry-count gauge.
    fn name(&self) -> &str;

    /// Which metric family this table feeds.
    fn kind(&self) -> MetricKind;

    /// Bucket count agreed with the kernel-side schema.
    fn bucket_count(&self) -> usize;

    /// Key/value encoding for this table.
    fn layout(&self) -> KeyLayout;

    /// Read the current full entry set.
    fn snapshot(&self) -> Result<Vec<RawEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::KeyEncoding;

    #[test]
    fn test_combined_schema_tables() {
        let tables = SchemaVariant::Combined.tables();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "io_lat");
        assert_eq!(tables[0].bucket_count, 28);
        assert_eq!(tables[0].layout.encoding, KeyEncoding::Text);
        assert!(tables[0].layout.fixed_operation.is_none());
        assert_eq!(tables[1].name, "io_req_sz");
        assert_eq!(tables[1].bucket_count, 16);
    }

    #[test]
    fn test_per_operation_schema_tables() {
        let tables = SchemaVariant::PerOperation.tables();
        assert_eq!(tables.len(), 4);

        for table in &tables {
            assert_eq!(table.layout.encoding, KeyEncoding::Binary);
            assert!(table.layout.fixed_operation.is_some());
        }

        let write_lat = tables.iter().find(|t| t.name == "write_lat").unwrap();
        assert_eq!(write_lat.kind, MetricKind::Latency);
        assert_eq!(write_lat.bucket_count, 32);
        assert_eq!(write_lat.layout.fixed_operation, Some(1));
    }
}
