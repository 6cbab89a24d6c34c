//! Command-line configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::error::{ExporterError, Result};

/// Prometheus exporter for NVIDIA GPU and per-process GPU telemetry
#[derive(Parser, Debug, Clone)]
#[command(name = "nvml-exporter", version, about, long_about = None)]
pub struct Args {
    /// Address to serve /metrics, /health and /debug on
    #[arg(long, env = "NVML_EXPORTER_LISTEN", default_value = "0.0.0.0:9445")]
    pub listen_address: SocketAddr,

    /// YAML file with a `metricName` list restricting the exported metrics
    #[arg(long, env = "NVML_EXPORTER_METRIC_CONFIG_FILE")]
    pub metric_config_file: Option<PathBuf>,

    /// Seconds between samples
    #[arg(long, env = "NVML_EXPORTER_COLLECT_INTERVAL", default_value_t = 5)]
    pub collect_interval: u64,

    /// Label process metrics with Slurm job metadata read from the process environment
    #[arg(long, env = "NVML_EXPORTER_USE_SLURM")]
    pub use_slurm: bool,

    /// Enable debug logging
    #[arg(long, env = "NVML_EXPORTER_DEBUG")]
    pub debug: bool,

    /// Window the per-process utilization is averaged over. `since-start`
    /// averages everything the driver still buffers; `since-last-poll` only
    /// covers the last collect interval
    #[arg(
        long,
        env = "NVML_EXPORTER_PROCESS_UTIL_WINDOW",
        value_enum,
        default_value_t = UtilizationWindow::SinceStart
    )]
    pub process_util_window: UtilizationWindow,

    /// Value of the Hostname label (defaults to the OS host name)
    #[arg(long, env = "NVML_EXPORTER_HOSTNAME")]
    pub hostname: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UtilizationWindow {
    #[default]
    SinceStart,
    SinceLastPoll,
}

/// Validated runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listen_address: SocketAddr,
    pub collect_interval: Duration,
    pub use_slurm: bool,
    pub debug: bool,
    pub process_util_window: UtilizationWindow,
    pub hostname: String,
    /// Empty means every supported metric.
    pub metric_names: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 9445)),
            collect_interval: Duration::from_secs(5),
            use_slurm: false,
            debug: false,
            process_util_window: UtilizationWindow::SinceStart,
            hostname: String::new(),
            metric_names: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricConfigFile {
    #[serde(default)]
    metric_name: Vec<String>,
}

/// Read the allow-list from a metric config file.
pub fn load_metric_names(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    let file: MetricConfigFile = serde_yaml::from_str(&contents)?;
    Ok(file.metric_name)
}

impl Args {
    pub fn into_config(self) -> Result<Config> {
        if self.collect_interval == 0 {
            return Err(ExporterError::Config(
                "collect interval must be at least 1 second".into(),
            ));
        }

        let metric_names = match &self.metric_config_file {
            Some(path) => load_metric_names(path)?,
            None => Vec::new(),
        };

        let hostname = self
            .hostname
            .or_else(sysinfo::System::host_name)
            .unwrap_or_default();

        Ok(Config {
            listen_address: self.listen_address,
            collect_interval: Duration::from_secs(self.collect_interval),
            use_slurm: self.use_slurm,
            debug: self.debug,
            process_util_window: self.process_util_window,
            hostname,
            metric_names,
        })
    }
}
