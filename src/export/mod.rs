//! Prometheus collection: decode passes wired into a custom collector.
//!
//! [`BioCollector`] owns the table sources and runs one full
//! decode-and-emit pass per scrape, building const histograms by hand.
//! The collector holds no decoded state between scrapes; every gather
//! recomputes cumulative histograms from the live counters.

pub mod http;

use anyhow::Result;
use prometheus::core::{Collector, Desc};
use prometheus::proto;
use prometheus::{IntGaugeVec, Opts};

use crate::decode::{decode_table, emit, CumulativeHistogram};
use crate::tracer::{MetricKind, TableSource};

const LATENCY_HELP: &str = "A histogram of bio request latencies in microseconds.";
const SIZE_HELP: &str = "A histogram of bio request sizes in KiB.";

/// Collector for the block I/O histogram tables.
pub struct BioCollector {
    tables: Vec<Box<dyn TableSource>>,
    latency_name: String,
    latency_desc: Desc,
    size_name: String,
    size_desc: Desc,
    /// Decoded entry count per table, for tracking map occupancy.
    table_entries: IntGaugeVec,
}

impl BioCollector {
    /// Creates a collector over the given table sources.
    pub fn new(namespace: &str, tables: Vec<Box<dyn TableSource>>) -> Result<Self> {
        let latency_name = format!("{namespace}_bio_req_latency");
        let size_name = format!("{namespace}_bio_req_size");

        let labels = vec!["device".to_string(), "operation".to_string()];
        let latency_desc = Desc::new(
            latency_name.clone(),
            LATENCY_HELP.to_string(),
            labels.clone(),
            Default::default(),
        )?;
        let size_desc = Desc::new(
            size_name.clone(),
            SIZE_HELP.to_string(),
            labels,
            Default::default(),
        )?;

        let table_entries = IntGaugeVec::new(
            Opts::new(
                "bpf_table_entries",
                "The number of BPF table entries decoded.",
            )
            .namespace(namespace.to_string())
            .subsystem("bio"),
            &["table"],
        )?;

        Ok(Self {
            tables,
            latency_name,
            latency_desc,
            size_name,
            size_desc,
            table_entries,
        })
    }
}

impl Collector for BioCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = vec![&self.latency_desc, &self.size_desc];
        descs.extend(self.table_entries.desc());
        descs
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let mut latency_metrics = Vec::new();
        let mut size_metrics = Vec::new();

        for table in &self.tables {
            let entries = match table.snapshot() {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(table = table.name(), error = %e, "table snapshot failed");
                    continue;
                }
            };

            let decode = decode_table(entries, &table.layout(), table.bucket_count());
            if decode.entries_skipped > 0 {
                tracing::debug!(
                    table = table.name(),
                    skipped = decode.entries_skipped,
                    "dropped undecodable table entries",
                );
            }

            self.table_entries
                .with_label_values(&[table.name()])
                .set(decode.entries_processed as i64);

            let out = match table.kind() {
                MetricKind::Latency => &mut latency_metrics,
                MetricKind::RequestSize => &mut size_metrics,
            };
            out.extend(emit(decode.groups, table.bucket_count()).map(|h| histogram_metric(&h)));
        }

        let mut families = Vec::new();
        if !latency_metrics.is_empty() {
            families.push(histogram_family(
                &self.latency_name,
                LATENCY_HELP,
                latency_metrics,
            ));
        }
        if !size_metrics.is_empty() {
            families.push(histogram_family(&self.size_name, SIZE_HELP, size_metrics));
        }
        families.extend(self.table_entries.collect());
        families
    }
}

/// Build one const-histogram metric with device/operation labels.
fn histogram_metric(hist: &CumulativeHistogram) -> proto::Metric {
    let mut histogram = proto::Histogram::new();
    histogram.set_sample_count(hist.total_count);
    histogram.set_sample_sum(hist.approx_sum);

    for &(upper_bound, cumulative) in &hist.buckets {
        let mut bucket = proto::Bucket::new();
        bucket.set_upper_bound(upper_bound);
        bucket.set_cumulative_count(cumulative);
        histogram.mut_bucket().push(bucket);
    }

    let mut metric = proto::Metric::new();
    metric.mut_label().push(label_pair("device", &hist.device));
    metric
        .mut_label()
        .push(label_pair("operation", hist.operation.as_str()));
    metric.set_histogram(histogram);
    metric
}

fn histogram_family(
    name: &str,
    help: &str,
    metrics: Vec<proto::Metric>,
) -> proto::MetricFamily {
    let mut family = proto::MetricFamily::new();
    family.set_name(name.to_string());
    family.set_help(help.to_string());
    family.set_field_type(proto::MetricType::HISTOGRAM);
    for metric in metrics {
        family.mut_metric().push(metric);
    }
    family
}

fn label_pair(name: &str, value: &str) -> proto::LabelPair {
    let mut pair = proto::LabelPair::new();
    pair.set_name(name.to_string());
    pair.set_value(value.to_string());
    pair
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{KeyLayout, RawEntry};
    use crate::tracer::MetricKind;
    use prometheus::Registry;

    /// In-memory table source with canned raw entries.
    struct FakeTable {
        name: &'static str,
        kind: MetricKind,
        bucket_count: usize,
        entries: Vec<RawEntry>,
        fail: bool,
    }

    impl TableSource for FakeTable {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> MetricKind {
            self.kind
        }

        fn bucket_count(&self) -> usize {
            self.bucket_count
        }

        fn layout(&self) -> KeyLayout {
            KeyLayout::text()
        }

        fn snapshot(&self) -> Result<Vec<RawEntry>> {
            if self.fail {
                anyhow::bail!("map gone");
            }
            Ok(self.entries.clone())
        }
    }

    fn text_entry(device: &str, op: u8, bucket: u64, count: u64) -> RawEntry {
        RawEntry::new(
            format!("{{ \"{device}\" {op:#x} {bucket:#x} }}").into_bytes(),
            format!("{count:#x}").into_bytes(),
        )
    }

    fn latency_table(entries: Vec<RawEntry>) -> Box<dyn TableSource> {
        Box::new(FakeTable {
            name: "io_lat",
            kind: MetricKind::Latency,
            bucket_count: 28,
            entries,
            fail: false,
        })
    }

    #[test]
    fn test_collect_builds_const_histograms() {
        let collector = BioCollector::new(
            "ebpf",
            vec![latency_table(vec![
                text_entry("sda", 1, 3, 5),
                text_entry("sda", 1, 5, 2),
            ])],
        )
        .unwrap();

        let families = collector.collect();
        let hist_family = families
            .iter()
            .find(|f| f.get_name() == "ebpf_bio_req_latency")
            .unwrap();
        assert_eq!(
            hist_family.get_field_type(),
            proto::MetricType::HISTOGRAM
        );
        assert_eq!(hist_family.get_metric().len(), 1);

        let metric = &hist_family.get_metric()[0];
        let labels = metric.get_label();
        assert_eq!(labels[0].get_name(), "device");
        assert_eq!(labels[0].get_value(), "sda");
        assert_eq!(labels[1].get_name(), "operation");
        assert_eq!(labels[1].get_value(), "write");

        let histogram = metric.get_histogram();
        assert_eq!(histogram.get_sample_count(), 7);
        assert_eq!(histogram.get_sample_sum(), 8.0 * 5.0 + 32.0 * 2.0);
        assert_eq!(histogram.get_bucket().len(), 28);

        let bucket3 = &histogram.get_bucket()[3];
        assert_eq!(bucket3.get_upper_bound(), 8.0);
        assert_eq!(bucket3.get_cumulative_count(), 5);
        let bucket5 = &histogram.get_bucket()[5];
        assert_eq!(bucket5.get_cumulative_count(), 7);
    }

    #[test]
    fn test_collect_sets_table_entry_gauge() {
        let collector = BioCollector::new(
            "ebpf",
            vec![latency_table(vec![
                text_entry("sda", 1, 3, 5),
                text_entry("sda", 0, 2, 1),
                RawEntry::new(&b"junk"[..], &b"0x1"[..]),
            ])],
        )
        .unwrap();

        let families = collector.collect();
        let gauge_family = families
            .iter()
            .find(|f| f.get_name() == "ebpf_bio_bpf_table_entries")
            .unwrap();

        let metric = &gauge_family.get_metric()[0];
        assert_eq!(metric.get_label()[0].get_value(), "io_lat");
        // The junk entry is skipped and not counted.
        assert_eq!(metric.get_gauge().get_value(), 2.0);
    }

    #[test]
    fn test_collect_filters_unknown_operations() {
        let collector = BioCollector::new(
            "ebpf",
            vec![latency_table(vec![text_entry("sdb", 99, 1, 100)])],
        )
        .unwrap();

        let families = collector.collect();
        assert!(families
            .iter()
            .all(|f| f.get_name() != "ebpf_bio_req_latency"));

        // The entry still counted toward the decoded-entry gauge.
        let gauge_family = families
            .iter()
            .find(|f| f.get_name() == "ebpf_bio_bpf_table_entries")
            .unwrap();
        assert_eq!(gauge_family.get_metric()[0].get_gauge().get_value(), 1.0);
    }

    #[test]
    fn test_collect_survives_failed_snapshot() {
        let collector = BioCollector::new(
            "ebpf",
            vec![
                Box::new(FakeTable {
                    name: "io_lat",
                    kind: MetricKind::Latency,
                    bucket_count: 28,
                    entries: Vec::new(),
                    fail: true,
                }),
                Box::new(FakeTable {
                    name: "io_req_sz",
                    kind: MetricKind::RequestSize,
                    bucket_count: 16,
                    entries: vec![text_entry("sda", 0, 4, 3)],
                    fail: false,
                }),
            ],
        )
        .unwrap();

        let families = collector.collect();
        let size_family = families
            .iter()
            .find(|f| f.get_name() == "ebpf_bio_req_size")
            .unwrap();
        assert_eq!(size_family.get_metric().len(), 1);
    }

    #[test]
    fn test_collect_empty_tables_emit_no_histograms() {
        let collector = BioCollector::new("ebpf", vec![latency_table(Vec::new())]).unwrap();

        let families = collector.collect();
        assert!(families.iter().all(|f| {
            f.get_name() != "ebpf_bio_req_latency" && f.get_name() != "ebpf_bio_req_size"
        }));
    }

    #[test]
    fn test_registry_gather_round_trip() {
        let registry = Registry::new();
        let collector = BioCollector::new(
            "ebpf",
            vec![latency_table(vec![text_entry("sda", 1, 3, 5)])],
        )
        .unwrap();
        registry.register(Box::new(collector)).unwrap();

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "ebpf_bio_req_latency"));
    }
}
