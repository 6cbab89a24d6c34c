//! nvml-exporter: samples NVIDIA GPUs and the processes using them on a fixed
//! interval and serves the latest snapshot as Prometheus metrics.

pub mod cache;
pub mod collector;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod nvml;
pub mod registry;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ExporterError, Result};
