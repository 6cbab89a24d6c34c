//! Prometheus collectors reading the latest snapshot on every scrape.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use tracing::warn;

use crate::cache::SnapshotCache;
use crate::error::Result;
use crate::registry::{names, MetricKind, MetricMeta, MetricRegistry, MetricSource};
use crate::types::ProcessStat;

/// Constant label carried by every exported series.
pub const HOST_LABEL: &str = "Hostname";

const GPU_LABELS: &[&str] = &["gpu", "UUID", "modelName"];
const PLAIN_PROCESS_LABELS: &[&str] = &["gpu", "pid", "procName", "user", "status", "ppid"];
const SLURM_PROCESS_LABELS: &[&str] = &[
    "gpu",
    "pid",
    "procName",
    "user",
    "slurmJobID",
    "slurmStepID",
    "slurmUser",
    "slurmAccount",
    "slurmJobName",
];
const INFO_LABELS: &[&str] = &["workDir", "cmdLine"];

/// Label layout of process series, fixed when the collector is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLabels {
    Plain,
    Slurm,
}

impl ProcessLabels {
    pub fn new(use_slurm: bool) -> Self {
        if use_slurm {
            Self::Slurm
        } else {
            Self::Plain
        }
    }

    fn names(self, metric: &str) -> Vec<&'static str> {
        let base = match self {
            Self::Plain => PLAIN_PROCESS_LABELS,
            Self::Slurm => SLURM_PROCESS_LABELS,
        };
        let mut labels = base.to_vec();
        if metric == names::PROCESS_INFO {
            labels.extend_from_slice(INFO_LABELS);
        }
        labels
    }

    fn values(self, stat: &ProcessStat, metric: &str) -> Vec<String> {
        let mut values = vec![
            stat.gpu_index.to_string(),
            stat.pid.to_string(),
            stat.name.clone(),
            stat.user.clone(),
        ];
        match self {
            Self::Plain => {
                values.push(stat.status.clone());
                values.push(stat.ppid.to_string());
            }
            Self::Slurm => {
                let slurm = stat.slurm.clone().unwrap_or_default();
                values.extend([
                    slurm.job_id,
                    slurm.step_id,
                    slurm.user,
                    slurm.account,
                    slurm.job_name,
                ]);
            }
        }
        if metric == names::PROCESS_INFO {
            values.push(stat.working_dir.clone());
            values.push(stat.command_line.clone());
        }
        values
    }
}

fn describe(meta: &MetricMeta, hostname: &str, labels: &[&str]) -> Result<Desc> {
    let const_labels = HashMap::from([(HOST_LABEL.to_string(), hostname.to_string())]);
    let desc = Desc::new(
        meta.name.to_string(),
        meta.help.to_string(),
        labels.iter().map(|l| l.to_string()).collect(),
        const_labels,
    )?;
    Ok(desc)
}

/// Build one metric family from `(label values, value)` rows.
fn build_family<I>(
    meta: &MetricMeta,
    hostname: &str,
    labels: &[&str],
    rows: I,
) -> prometheus::Result<Vec<MetricFamily>>
where
    I: IntoIterator<Item = (Vec<String>, f64)>,
{
    let opts = Opts::new(meta.name, meta.help).const_label(HOST_LABEL, hostname);
    match meta.kind {
        MetricKind::Gauge => {
            let vec = GaugeVec::new(opts, labels)?;
            for (values, value) in rows {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                vec.get_metric_with_label_values(&values)?.set(value);
            }
            Ok(vec.collect())
        }
        MetricKind::Counter => {
            let vec = CounterVec::new(opts, labels)?;
            for (values, value) in rows {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                vec.get_metric_with_label_values(&values)?.inc_by(value);
            }
            Ok(vec.collect())
        }
    }
}

/// Device-level series, one per GPU in the snapshot.
pub struct GpuCollector {
    cache: Arc<SnapshotCache>,
    hostname: String,
    metrics: Vec<MetricMeta>,
    descs: Vec<Desc>,
}

impl GpuCollector {
    pub fn new(cache: Arc<SnapshotCache>, registry: &MetricRegistry, hostname: &str) -> Result<Self> {
        let metrics: Vec<MetricMeta> = registry.gpu_metrics().copied().collect();
        let descs = metrics
            .iter()
            .map(|meta| describe(meta, hostname, GPU_LABELS))
            .collect::<Result<_>>()?;
        Ok(Self {
            cache,
            hostname: hostname.to_string(),
            metrics,
            descs,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Collector for GpuCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let stats = self.cache.gpu_stats();
        let mut families = Vec::with_capacity(self.metrics.len());

        for meta in &self.metrics {
            let rows = stats.iter().map(|stat| {
                let labels = vec![
                    stat.index.to_string(),
                    stat.uuid.clone(),
                    stat.model_name.clone(),
                ];
                (labels, stat.value_of(meta.name))
            });
            match build_family(meta, &self.hostname, GPU_LABELS, rows) {
                Ok(mut family) => families.append(&mut family),
                Err(e) => warn!(metric = meta.name, error = %e, "failed to build metric"),
            }
        }

        families
    }
}

/// Per-process series, one per process holding GPU memory.
pub struct ProcessCollector {
    cache: Arc<SnapshotCache>,
    hostname: String,
    labels: ProcessLabels,
    metrics: Vec<MetricMeta>,
    descs: Vec<Desc>,
}

impl ProcessCollector {
    pub fn new(
        cache: Arc<SnapshotCache>,
        registry: &MetricRegistry,
        hostname: &str,
        labels: ProcessLabels,
    ) -> Result<Self> {
        let metrics: Vec<MetricMeta> = registry.process_metrics().copied().collect();
        let descs = metrics
            .iter()
            .map(|meta| describe(meta, hostname, &labels.names(meta.name)))
            .collect::<Result<_>>()?;
        Ok(Self {
            cache,
            hostname: hostname.to_string(),
            labels,
            metrics,
            descs,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Collector for ProcessCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let stats = self.cache.process_stats();
        let mut families = Vec::with_capacity(self.metrics.len());

        for meta in &self.metrics {
            let names = self.labels.names(meta.name);
            let rows = stats
                .values()
                .map(|stat| (self.labels.values(stat, meta.name), stat.value_of(meta.name)));
            match build_family(meta, &self.hostname, &names, rows) {
                Ok(mut family) => families.append(&mut family),
                Err(e) => warn!(metric = meta.name, error = %e, "failed to build metric"),
            }
        }

        families
    }
}

/// A Prometheus registry holding the GPU and process collectors. A collector
/// with no enabled metrics is left out.
pub fn new_registry(
    cache: Arc<SnapshotCache>,
    metrics: &MetricRegistry,
    hostname: &str,
    use_slurm: bool,
) -> Result<Registry> {
    let registry = Registry::new();

    let gpu = GpuCollector::new(Arc::clone(&cache), metrics, hostname)?;
    if !gpu.is_empty() {
        registry.register(Box::new(gpu))?;
    }

    let process = ProcessCollector::new(cache, metrics, hostname, ProcessLabels::new(use_slurm))?;
    if !process.is_empty() {
        registry.register(Box::new(process))?;
    }

    Ok(registry)
}
