use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::tracer::SchemaVariant;

/// Top-level configuration for the bioscope exporter.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HTTP listen configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Kernel-side table layout variant. Default: per_operation.
    #[serde(default = "default_schema")]
    pub schema: SchemaVariant,

    /// Metric name namespace. Default: "ebpf".
    #[serde(default = "default_namespace")]
    pub metrics_namespace: String,
}

/// HTTP listen configuration.
#[derive(Debug, Deserialize)]
pub struct ListenConfig {
    /// Listen address, ":port" shorthand accepted. Default: ":9123".
    #[serde(default = "default_listen_addr")]
    pub addr: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: default_listen_addr(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listen: ListenConfig::default(),
            schema: default_schema(),
            metrics_namespace: default_namespace(),
        }
    }
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_addr() -> String {
    ":9123".to_string()
}

fn default_schema() -> SchemaVariant {
    SchemaVariant::PerOperation
}

fn default_namespace() -> String {
    "ebpf".to_string()
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.listen.addr.is_empty() {
            bail!("listen.addr is required");
        }

        if self.metrics_namespace.is_empty() {
            bail!("metrics_namespace is required");
        }

        let mut chars = self.metrics_namespace.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            bail!(
                "metrics_namespace {:?} is not a valid metric name prefix",
                self.metrics_namespace
            );
        }

        Ok(())
    }
}
