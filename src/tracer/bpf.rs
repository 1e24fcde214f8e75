//! BPF program loading, kprobe attachment, and map-backed table sources.
//!
//! Uses aya to load the embedded BPF object and attach the block-layer
//! accounting kprobes. All code is gated behind the `bpf` feature.

use std::sync::Arc;

use anyhow::{Context, Result};
use aya::maps::HashMap as BpfHashMap;
use aya::programs::KProbe;
use aya::Ebpf;
use parking_lot::Mutex;

use crate::decode::{KeyLayout, RawEntry};

use super::{MetricKind, SchemaVariant, TableSource, TableSpec};

/// Compiled BPF object, embedded at build time.
///
/// `include_bytes_aligned!` guarantees the alignment aya's ELF parser
/// requires; plain `include_bytes!` only gives 1-byte alignment.
const BPF_OBJ: &[u8] = aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/bioscope.bpf.o"));

/// Kernel symbols for request completion accounting. The symbol was renamed
/// in Linux 5.9; try the current name first, then the legacy one.
const COMPLETION_SYMBOLS: [&str; 2] = ["blk_account_io_done", "blk_account_io_completion"];

/// BPF map key for the per-operation histogram tables
/// (matches `struct disk_key` in bpf/bioscope.bpf.c).
#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct DiskKey {
    disk: [u8; 32],
    slot: u64,
}

// SAFETY: DiskKey is a plain C struct; any bit pattern is a valid value.
unsafe impl aya::Pod for DiskKey {}

/// Loads the BPF object and owns the attached programs and maps.
///
/// Dropping the inner [`Ebpf`] detaches all programs and closes all maps.
pub struct BpfTracer {
    schema: SchemaVariant,
    ebpf: Option<Arc<Mutex<Ebpf>>>,
}

impl BpfTracer {
    /// Creates a tracer for the given schema variant.
    ///
    /// The embedded BPF program only populates the per-operation tables;
    /// the combined text-keyed schema belongs to the bcc-era deployment.
    pub fn new(schema: SchemaVariant) -> Result<Self> {
        if schema != SchemaVariant::PerOperation {
            anyhow::bail!(
                "the embedded BPF program exposes per-operation tables; \
                 schema variant {schema:?} is not loadable"
            );
        }

        Ok(Self { schema, ebpf: None })
    }

    /// Load the BPF object and attach both accounting kprobes.
    pub fn start(&mut self) -> Result<()> {
        let mut ebpf = Ebpf::load(BPF_OBJ).context("loading BPF object")?;

        attach_kprobe(&mut ebpf, "trace_req_start", &["blk_account_io_start"])?;
        attach_kprobe(&mut ebpf, "trace_req_completion", &COMPLETION_SYMBOLS)?;

        self.ebpf = Some(Arc::new(Mutex::new(ebpf)));

        tracing::info!("BPF tracer started");
        Ok(())
    }

    /// One [`TableSource`] per table in the schema.
    pub fn tables(&self) -> Result<Vec<BpfTable>> {
        let ebpf = self
            .ebpf
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("BPF objects not loaded"))?;

        // Fail now rather than at first scrape if a map is missing.
        {
            let guard = ebpf.lock();
            for spec in self.schema.tables() {
                guard
                    .map(spec.name)
                    .ok_or_else(|| anyhow::anyhow!("{} map not found", spec.name))?;
            }
        }

        Ok(self
            .schema
            .tables()
            .into_iter()
            .map(|spec| BpfTable {
                ebpf: Arc::clone(ebpf),
                spec,
            })
            .collect())
    }

    /// Detach all programs and close all maps.
    pub fn stop(&mut self) {
        self.ebpf = None;
        tracing::info!("BPF tracer stopped");
    }
}

/// Load a kprobe program and attach it to the first resolvable symbol.
fn attach_kprobe(ebpf: &mut Ebpf, program: &str, symbols: &[&str]) -> Result<()> {
    let probe: &mut KProbe = ebpf
        .program_mut(program)
        .ok_or_else(|| anyhow::anyhow!("{program} program not found"))?
        .try_into()
        .with_context(|| format!("{program} is not a kprobe"))?;

    probe
        .load()
        .with_context(|| format!("loading {program}"))?;

    let mut last_err = None;
    for &symbol in symbols {
        match probe.attach(symbol, 0) {
            Ok(_) => {
                tracing::info!(program, symbol, "attached kprobe");
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(program, symbol, error = %e, "kprobe attach failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err
        .map(anyhow::Error::from)
        .unwrap_or_else(|| anyhow::anyhow!("no attach symbols given")))
        .with_context(|| format!("attaching {program} to any of {symbols:?}"))
}

/// A [`TableSource`] over one BPF hash map.
pub struct BpfTable {
    ebpf: Arc<Mutex<Ebpf>>,
    spec: TableSpec,
}

impl TableSource for BpfTable {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn kind(&self) -> MetricKind {
        self.spec.kind
    }

    fn bucket_count(&self) -> usize {
        self.spec.bucket_count
    }

    fn layout(&self) -> KeyLayout {
        self.spec.layout
    }

    /// Snapshot the map by iterating all entries.
    ///
    /// The kernel keeps incrementing counters during iteration; per-entry
    /// lookup races (e.g. against map updates) skip that entry only.
    fn snapshot(&self) -> Result<Vec<RawEntry>> {
        let guard = self.ebpf.lock();

        let map = guard
            .map(self.spec.name)
            .ok_or_else(|| anyhow::anyhow!("{} map not found", self.spec.name))?;
        let table: BpfHashMap<_, DiskKey, u64> = BpfHashMap::try_from(map)
            .with_context(|| format!("opening {} map", self.spec.name))?;

        let mut entries = Vec::new();
        for item in table.iter() {
            let (key, value) = match item {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::debug!(table = self.spec.name, error = %e, "skipping racy map entry");
                    continue;
                }
            };

            let mut raw_key = Vec::with_capacity(40);
            raw_key.extend_from_slice(&key.disk);
            raw_key.extend_from_slice(&key.slot.to_le_bytes());

            entries.push(RawEntry::new(raw_key, value.to_le_bytes().to_vec()));
        }

        Ok(entries)
    }
}
