//! Error types for the exporter library.

use nvml_wrapper::error::NvmlError;
use thiserror::Error;

/// Result type for exporter operations.
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors that can occur while enumerating, sampling or serving.
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("NVML error: {0}")]
    Nvml(#[from] NvmlError),

    #[error("unable to open device {index}: {source}")]
    Device {
        index: u32,
        #[source]
        source: Box<ExporterError>,
    },

    #[error("query failed: {0}")]
    Query(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}
