use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prometheus::Registry;
use tracing_subscriber::{fmt, EnvFilter};

use bioscope::config::Config;
use bioscope::export::http::MetricsServer;
use bioscope::export::BioCollector;

/// eBPF-based Prometheus exporter for block I/O latency and request size.
#[derive(Parser)]
#[command(name = "bioscope", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("bioscope {}", version::full());
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Config file is optional; defaults match the historical exporter.
    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting bioscope",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

#[cfg(feature = "bpf")]
async fn run(cfg: Config) -> Result<()> {
    use bioscope::tracer::bpf::BpfTracer;

    let mut tracer = BpfTracer::new(cfg.schema)?;
    tracer.start().context("starting BPF tracer")?;

    let tables: Vec<Box<dyn bioscope::tracer::TableSource>> = tracer
        .tables()?
        .into_iter()
        .map(|t| Box::new(t) as Box<dyn bioscope::tracer::TableSource>)
        .collect();

    let registry = Registry::new();
    let collector = BioCollector::new(&cfg.metrics_namespace, tables)
        .context("creating bio collector")?;
    registry
        .register(Box::new(collector))
        .context("registering bio collector")?;

    let server = MetricsServer::new(registry, &cfg.listen.addr);
    server.start().await.context("starting metrics server")?;

    wait_for_shutdown().await;

    server.stop();
    tracer.stop();

    tracing::info!("bioscope stopped");
    Ok(())
}

#[cfg(not(feature = "bpf"))]
async fn run(cfg: Config) -> Result<()> {
    // Without the bpf feature there is no table source to scrape; serve an
    // empty collector so packaging and endpoint smoke tests still work.
    tracing::warn!("built without the bpf feature, serving empty histograms");

    let registry = Registry::new();
    let collector = BioCollector::new(&cfg.metrics_namespace, Vec::new())
        .context("creating bio collector")?;
    registry
        .register(Box::new(collector))
        .context("registering bio collector")?;

    let server = MetricsServer::new(registry, &cfg.listen.addr);
    server.start().await.context("starting metrics server")?;

    wait_for_shutdown().await;

    server.stop();

    tracing::info!("bioscope stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
