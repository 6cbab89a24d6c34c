//! Supported metric names, their metadata, and the per-instance registry of
//! enabled metrics.

use tracing::warn;

use crate::types::{GpuStat, ProcessStat};

/// Canonical metric names.
pub mod names {
    // Clocks
    pub const GPU_SM_CLOCK: &str = "gpu_sm_clock";
    pub const GPU_MEMORY_CLOCK: &str = "gpu_memory_clock";

    // Thermals
    pub const GPU_TEMPERATURE: &str = "gpu_temperature";
    pub const GPU_FAN_SPEED: &str = "gpu_fan_speed";

    // Power
    pub const GPU_POWER_USAGE: &str = "gpu_power_usage";
    pub const GPU_TOTAL_ENERGY_CONSUMPTION: &str = "gpu_total_energy_consumption";

    // PCIe
    pub const GPU_PCIE_TX_BYTES: &str = "gpu_pcie_tx_bytes";
    pub const GPU_PCIE_RX_BYTES: &str = "gpu_pcie_rx_bytes";

    // Utilization (the sample period varies with the product)
    pub const GPU_UTILIZATION: &str = "gpu_utilization";
    pub const GPU_MEM_COPY_UTILIZATION: &str = "gpu_mem_copy_utilization";
    pub const GPU_ENC_UTILIZATION: &str = "gpu_enc_utilization";
    pub const GPU_DEC_UTILIZATION: &str = "gpu_dec_utilization";

    // Framebuffer
    pub const GPU_MEMORY_FREE_BYTES: &str = "gpu_memory_free_bytes";
    pub const GPU_MEMORY_USED_BYTES: &str = "gpu_memory_used_bytes";

    // Process
    pub const PROCESS_INFO: &str = "process_info";
    pub const PROCESS_CPU_PERCENT: &str = "process_cpu_percent";
    pub const PROCESS_CPU_MEM_USED_BYTES: &str = "process_cpu_mem_used_bytes";
    pub const PROCESS_NUM_THREADS: &str = "process_num_threads";
    pub const PROCESS_GPU_SM_UTIL: &str = "process_gpu_sm_util";
    pub const PROCESS_GPU_MEM_UTIL: &str = "process_gpu_mem_util";
    pub const PROCESS_GPU_DECODE_UTIL: &str = "process_gpu_decode_util";
    pub const PROCESS_GPU_ENCODE_UTIL: &str = "process_gpu_encode_util";
    pub const PROCESS_GPU_MEM_USED_BYTES: &str = "process_gpu_mem_used_bytes";
}

use names::*;

/// How a value evolves between scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Which stat record a metric is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricDomain {
    Gpu,
    Process,
}

impl MetricDomain {
    /// Classify a name by its prefix.
    pub fn of(name: &str) -> Option<Self> {
        if name.starts_with("gpu_") {
            Some(Self::Gpu)
        } else if name.starts_with("process_") {
            Some(Self::Process)
        } else {
            None
        }
    }
}

/// Static registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricMeta {
    pub name: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
}

impl MetricMeta {
    const fn gauge(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            help,
        }
    }

    const fn counter(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            help,
        }
    }

    pub fn domain(&self) -> Option<MetricDomain> {
        MetricDomain::of(self.name)
    }
}

/// Every metric the exporter knows how to produce.
pub const SUPPORTED_METRICS: &[MetricMeta] = &[
    MetricMeta::gauge(GPU_SM_CLOCK, "SM clock frequency (in MHz)."),
    MetricMeta::gauge(GPU_MEMORY_CLOCK, "Memory clock frequency (in MHz)."),
    MetricMeta::gauge(GPU_TEMPERATURE, "GPU temperature (in C)."),
    MetricMeta::gauge(GPU_FAN_SPEED, "Fan speed (in % of maximum)."),
    MetricMeta::gauge(GPU_POWER_USAGE, "Power draw (in W)."),
    MetricMeta::counter(
        GPU_TOTAL_ENERGY_CONSUMPTION,
        "Total energy consumption since the driver was loaded (in mJ).",
    ),
    MetricMeta::gauge(
        GPU_PCIE_TX_BYTES,
        "PCIe transmit throughput, headers included (in bytes per second).",
    ),
    MetricMeta::gauge(
        GPU_PCIE_RX_BYTES,
        "PCIe receive throughput, headers included (in bytes per second).",
    ),
    MetricMeta::gauge(GPU_UTILIZATION, "GPU utilization (in %)."),
    MetricMeta::gauge(GPU_MEM_COPY_UTILIZATION, "Memory copy utilization (in %)."),
    MetricMeta::gauge(GPU_ENC_UTILIZATION, "Encoder utilization (in %)."),
    MetricMeta::gauge(GPU_DEC_UTILIZATION, "Decoder utilization (in %)."),
    MetricMeta::gauge(GPU_MEMORY_FREE_BYTES, "Framebuffer memory free (in bytes)."),
    MetricMeta::gauge(GPU_MEMORY_USED_BYTES, "Framebuffer memory used (in bytes)."),
    MetricMeta::gauge(PROCESS_INFO, "Process information, always 1."),
    MetricMeta::gauge(PROCESS_CPU_PERCENT, "Process CPU usage (in %)."),
    MetricMeta::gauge(
        PROCESS_CPU_MEM_USED_BYTES,
        "Process resident memory (in bytes).",
    ),
    MetricMeta::gauge(PROCESS_NUM_THREADS, "Number of threads of the process."),
    MetricMeta::gauge(
        PROCESS_GPU_SM_UTIL,
        "Process SM utilization averaged over the sampling window (in %).",
    ),
    MetricMeta::gauge(
        PROCESS_GPU_MEM_UTIL,
        "Process memory utilization averaged over the sampling window (in %).",
    ),
    MetricMeta::gauge(
        PROCESS_GPU_DECODE_UTIL,
        "Process decoder utilization averaged over the sampling window (in %).",
    ),
    MetricMeta::gauge(
        PROCESS_GPU_ENCODE_UTIL,
        "Process encoder utilization averaged over the sampling window (in %).",
    ),
    MetricMeta::gauge(
        PROCESS_GPU_MEM_USED_BYTES,
        "GPU memory used by the process (in bytes).",
    ),
];

/// Look up a supported metric by name.
pub fn lookup(name: &str) -> Option<&'static MetricMeta> {
    SUPPORTED_METRICS.iter().find(|m| m.name == name)
}

/// The set of metrics enabled for one exporter instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRegistry {
    enabled: Vec<MetricMeta>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::all()
    }
}

impl MetricRegistry {
    /// Every supported metric.
    pub fn all() -> Self {
        Self {
            enabled: SUPPORTED_METRICS.to_vec(),
        }
    }

    /// Build from an allow-list. An empty list enables everything; unknown
    /// names are reported and skipped; duplicates are collapsed.
    pub fn from_allow_list<S: AsRef<str>>(allow_list: &[S]) -> Self {
        if allow_list.is_empty() {
            return Self::all();
        }

        let mut enabled: Vec<MetricMeta> = Vec::with_capacity(allow_list.len());
        for name in allow_list {
            let name = name.as_ref();
            match lookup(name) {
                Some(meta) if !enabled.iter().any(|m| m.name == meta.name) => enabled.push(*meta),
                Some(_) => {}
                None => warn!(metric = name, "metric name not supported, ignoring"),
            }
        }

        Self { enabled }
    }

    pub fn enabled(&self) -> &[MetricMeta] {
        &self.enabled
    }

    pub fn contains(&self, name: &str) -> bool {
        self.enabled.iter().any(|m| m.name == name)
    }

    /// Enabled metrics whose name carries the given domain prefix.
    pub fn metrics_for(&self, domain: MetricDomain) -> impl Iterator<Item = &MetricMeta> {
        self.enabled
            .iter()
            .filter(move |m| m.domain() == Some(domain))
    }

    pub fn gpu_metrics(&self) -> impl Iterator<Item = &MetricMeta> {
        self.metrics_for(MetricDomain::Gpu)
    }

    pub fn process_metrics(&self) -> impl Iterator<Item = &MetricMeta> {
        self.metrics_for(MetricDomain::Process)
    }

    /// Names handed to the GPU stat builder each poll.
    pub fn gpu_metric_names(&self) -> Vec<&'static str> {
        self.gpu_metrics().map(|m| m.name).collect()
    }
}

/// A stat record that can be read by metric name.
pub trait MetricSource {
    /// Numeric value for `name`; unknown names read as zero.
    fn value_of(&self, name: &str) -> f64;
}

impl MetricSource for GpuStat {
    fn value_of(&self, name: &str) -> f64 {
        match name {
            GPU_SM_CLOCK => self.sm_clock as f64,
            GPU_MEMORY_CLOCK => self.mem_clock as f64,
            GPU_TEMPERATURE => self.temperature as f64,
            GPU_FAN_SPEED => self.fan_speed as f64,
            GPU_POWER_USAGE => self.power_usage as f64,
            GPU_TOTAL_ENERGY_CONSUMPTION => self.energy_consumption as f64,
            GPU_PCIE_TX_BYTES => self.pcie_tx_bytes as f64,
            GPU_PCIE_RX_BYTES => self.pcie_rx_bytes as f64,
            GPU_UTILIZATION => self.gpu_util as f64,
            GPU_MEM_COPY_UTILIZATION => self.memcpy_util as f64,
            GPU_ENC_UTILIZATION => self.encoder_util as f64,
            GPU_DEC_UTILIZATION => self.decoder_util as f64,
            GPU_MEMORY_FREE_BYTES => self.mem_free_bytes as f64,
            GPU_MEMORY_USED_BYTES => self.mem_used_bytes as f64,
            _ => 0.0,
        }
    }
}

impl MetricSource for ProcessStat {
    fn value_of(&self, name: &str) -> f64 {
        match name {
            PROCESS_INFO => 1.0,
            PROCESS_CPU_PERCENT => self.cpu_percent as f64,
            PROCESS_CPU_MEM_USED_BYTES => self.cpu_mem_used_bytes as f64,
            PROCESS_NUM_THREADS => self.num_threads as f64,
            PROCESS_GPU_SM_UTIL => self.smutil as f64,
            PROCESS_GPU_MEM_UTIL => self.memutil as f64,
            PROCESS_GPU_DECODE_UTIL => self.decutil as f64,
            PROCESS_GPU_ENCODE_UTIL => self.encutil as f64,
            PROCESS_GPU_MEM_USED_BYTES => self.gpu_used_memory_bytes as f64,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_pairwise_distinct() {
        let unique: HashSet<_> = SUPPORTED_METRICS.iter().map(|m| m.name).collect();
        assert_eq!(unique.len(), SUPPORTED_METRICS.len());
    }

    #[test]
    fn every_metric_has_a_domain() {
        for meta in SUPPORTED_METRICS {
            assert!(meta.domain().is_some(), "{} has no domain prefix", meta.name);
        }
    }

    #[test]
    fn empty_allow_list_enables_everything() {
        let registry = MetricRegistry::from_allow_list::<&str>(&[]);
        assert_eq!(registry.enabled().len(), SUPPORTED_METRICS.len());
    }

    #[test]
    fn allow_list_keeps_known_names_in_order() {
        let registry = MetricRegistry::from_allow_list(&[
            "process_num_threads",
            "gpu_not_a_metric",
            "gpu_temperature",
            "gpu_temperature",
            "bogus",
        ]);
        let names: Vec<_> = registry.enabled().iter().map(|m| m.name).collect();
        assert_eq!(names, vec![PROCESS_NUM_THREADS, GPU_TEMPERATURE]);
    }

    #[test]
    fn domain_views_respect_prefix() {
        let registry = MetricRegistry::from_allow_list(&[
            GPU_POWER_USAGE,
            PROCESS_INFO,
            GPU_UTILIZATION,
        ]);
        assert_eq!(
            registry.gpu_metric_names(),
            vec![GPU_POWER_USAGE, GPU_UTILIZATION]
        );
        let process: Vec<_> = registry.process_metrics().map(|m| m.name).collect();
        assert_eq!(process, vec![PROCESS_INFO]);
    }

    #[test]
    fn energy_is_a_counter() {
        assert_eq!(
            lookup(GPU_TOTAL_ENERGY_CONSUMPTION).map(|m| m.kind),
            Some(MetricKind::Counter)
        );
        assert_eq!(lookup(GPU_TEMPERATURE).map(|m| m.kind), Some(MetricKind::Gauge));
    }

    #[test]
    fn unknown_names_resolve_to_zero() {
        let gpu = GpuStat {
            temperature: 70,
            ..Default::default()
        };
        assert_eq!(gpu.value_of(GPU_TEMPERATURE), 70.0);
        assert_eq!(gpu.value_of("gpu_nope"), 0.0);
        assert_eq!(gpu.value_of(PROCESS_INFO), 0.0);

        let process = ProcessStat {
            smutil: 12,
            ..Default::default()
        };
        assert_eq!(process.value_of(PROCESS_GPU_SM_UTIL), 12.0);
        assert_eq!(process.value_of(PROCESS_INFO), 1.0);
        assert_eq!(process.value_of(GPU_TEMPERATURE), 0.0);
    }
}
