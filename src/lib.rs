//! bioscope - a Prometheus exporter for Linux block I/O statistics.
//!
//! Kernel-side eBPF programs record request latencies and sizes into
//! log2-bucketed BPF hash maps; this crate decodes those maps on every
//! scrape and serves cumulative histograms per device and I/O operation.

pub mod config;
pub mod decode;
pub mod export;
pub mod tracer;
