//! Data types and structures used throughout nvml-exporter.

use serde::Serialize;

/// Static capability attributes reported by the device at enumeration time.
/// Counts the driver cannot report through the management interface stay zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    pub multiprocessor_count: u32,
    pub shared_copy_engine_count: u32,
    pub shared_decoder_count: u32,
    pub shared_encoder_count: u32,
    pub shared_jpeg_count: u32,
    pub shared_ofa_count: u32,
    pub gpu_instance_slice_count: u32,
    pub compute_instance_slice_count: u32,
    pub memory_size_mb: u64,
}

/// Immutable description of one GPU, captured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub index: u32,
    #[serde(rename = "UUID")]
    pub uuid: String,
    pub model_name: String,
    pub attributes: DeviceAttributes,
    /// MT/s
    pub pcie_link_max_speed: u32,
    pub pcie_link_max_gen: u32,
    pub pcie_link_max_width: u32,
}

/// One device's telemetry for one poll cycle.
///
/// Only fields whose metric name was requested are queried. Everything else
/// stays at zero, and a zero may also mean the query failed, so consumers must
/// not read a zero as a measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpuStat {
    #[serde(rename = "gpuIndex")]
    pub index: u32,
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "modelName")]
    pub model_name: String,

    /// MHz
    pub sm_clock: u32,
    /// MHz
    pub mem_clock: u32,

    /// Watts
    pub power_usage: u32,
    /// Millijoules since driver load
    pub energy_consumption: u64,

    /// Percent of maximum
    pub fan_speed: u32,
    /// Celsius
    pub temperature: u32,

    pub gpu_util: u32,
    pub memcpy_util: u32,
    pub encoder_util: u32,
    pub decoder_util: u32,

    /// Bytes per second
    pub pcie_tx_bytes: u64,
    /// Bytes per second
    pub pcie_rx_bytes: u64,

    pub mem_free_bytes: u64,
    pub mem_used_bytes: u64,
}

/// Workload-manager job metadata read from a process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlurmInfo {
    #[serde(rename = "slurmJobID")]
    pub job_id: String,
    #[serde(rename = "slurmStepID")]
    pub step_id: String,
    #[serde(rename = "slurmUser")]
    pub user: String,
    #[serde(rename = "slurmAccount")]
    pub account: String,
    #[serde(rename = "slurmJobName")]
    pub job_name: String,
}

/// A process holding memory on a GPU, enriched with OS attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessStat {
    pub pid: u32,
    #[serde(rename = "gpu")]
    pub gpu_index: u32,
    #[serde(rename = "procName")]
    pub name: String,
    pub user: String,
    pub status: String,
    pub ppid: u32,
    #[serde(rename = "workingDir")]
    pub working_dir: String,
    #[serde(rename = "commandLine")]
    pub command_line: String,

    pub cpu_percent: f32,
    pub cpu_mem_used_bytes: u64,
    pub num_threads: u32,

    /// Utilization fields are averaged over the sampling window passed to the
    /// utilization query, not instantaneous.
    pub smutil: u32,
    pub memutil: u32,
    pub decutil: u32,
    pub encutil: u32,
    pub gpu_used_memory_bytes: u64,

    #[serde(flatten)]
    pub slurm: Option<SlurmInfo>,
}

/// Clock domains the builder can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockKind {
    Sm,
    Memory,
}

/// PCIe throughput direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcieDirection {
    Tx,
    Rx,
}

/// Combined device utilization sample, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtilizationRates {
    pub gpu: u32,
    pub memory: u32,
}

/// Framebuffer memory usage, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub free: u64,
    pub used: u64,
}

/// An entry of the memory-holder query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHolder {
    pub pid: i64,
    /// `None` when the driver cannot report per-process usage.
    pub used_memory: Option<u64>,
}

/// An entry of the per-process utilization query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessUtilization {
    pub pid: i64,
    /// Driver timestamp in microseconds.
    pub timestamp: u64,
    pub sm_util: u32,
    pub mem_util: u32,
    pub enc_util: u32,
    pub dec_util: u32,
}

/// OS-level view of a running process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsProcess {
    pub name: String,
    pub command_line: String,
    pub working_dir: String,
    pub user: String,
    pub status: String,
    pub ppid: u32,
    pub cpu_percent: f32,
    pub resident_bytes: u64,
    pub num_threads: u32,
    /// `KEY=VALUE` pairs; only filled when requested.
    pub environ: Vec<String>,
}
