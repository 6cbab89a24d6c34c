//! The background poll loop that refreshes the snapshot cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::SnapshotCache;
use crate::config::{Config, UtilizationWindow};
use crate::device::{Devices, GpuBackend};
use crate::error::{ExporterError, Result};
use crate::metrics::{build_gpu_stat, build_process_stats, ProcessInspector};
use crate::registry::MetricRegistry;
use crate::types::{GpuStat, ProcessStat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Sampling,
    Stopped,
}

/// Owns the GPU backend and every device handle. Samples all devices on each
/// tick and publishes the batch to the cache in one swap.
pub struct SamplingEngine {
    backend: Option<Box<dyn GpuBackend>>,
    devices: Devices,
    inspector: Box<dyn ProcessInspector>,
    cache: Arc<SnapshotCache>,
    gpu_metrics: Vec<&'static str>,
    use_slurm: bool,
    window: UtilizationWindow,
    /// Newest utilization timestamp per device, from the last successful poll.
    last_seen: Vec<u64>,
    state: EngineState,
}

impl SamplingEngine {
    /// Enumerate the backend's devices and create an empty cache for them.
    pub fn new(
        backend: Box<dyn GpuBackend>,
        inspector: Box<dyn ProcessInspector>,
        config: &Config,
        registry: &MetricRegistry,
    ) -> Result<Self> {
        let devices = Devices::enumerate(backend.as_ref())?;
        let cache = Arc::new(SnapshotCache::new(devices.identities()));

        Ok(Self {
            last_seen: vec![0; devices.len()],
            backend: Some(backend),
            devices,
            inspector,
            cache,
            gpu_metrics: registry.gpu_metric_names(),
            use_slurm: config.use_slurm,
            window: config.process_util_window,
            state: EngineState::Idle,
        })
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.cache)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Run one poll cycle. On error the cache keeps the previous snapshot.
    pub fn sample_once(&mut self) -> Result<()> {
        if self.state == EngineState::Stopped {
            return Err(ExporterError::Query("sampling engine is stopped".into()));
        }

        self.state = EngineState::Sampling;
        let started = Instant::now();
        let result = self.collect();
        self.state = EngineState::Idle;

        let (gpu_stats, process_stats, newest) = result?;
        if self.window == UtilizationWindow::SinceLastPoll {
            self.last_seen = newest;
        }
        debug!(
            gpus = gpu_stats.len(),
            processes = process_stats.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sampled devices"
        );
        self.cache.replace(gpu_stats, process_stats);
        Ok(())
    }

    fn collect(&mut self) -> Result<(Vec<GpuStat>, BTreeMap<u32, ProcessStat>, Vec<u64>)> {
        let mut gpu_stats = Vec::with_capacity(self.devices.len());
        let mut process_stats = BTreeMap::new();
        let mut newest = Vec::with_capacity(self.devices.len());

        for (position, device) in self.devices.iter().enumerate() {
            gpu_stats.push(build_gpu_stat(device, &self.gpu_metrics));

            let since = match self.window {
                UtilizationWindow::SinceStart => 0,
                UtilizationWindow::SinceLastPoll => self.last_seen[position],
            };
            let sample =
                build_process_stats(device, self.inspector.as_mut(), self.use_slurm, since)?;
            // A pid seen on several devices keeps the last device's entry.
            process_stats.extend(sample.stats);
            newest.push(sample.newest_timestamp);
        }

        Ok((gpu_stats, process_stats, newest))
    }

    /// Sample every `period` until `cancel` fires, then release the backend.
    /// The first sample is taken immediately. Cancellation is only observed
    /// between cycles. Needs the multi-threaded runtime.
    pub async fn run(&mut self, period: Duration, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("sampling engine shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    // NVML and procfs calls block; keep other tasks off this worker meanwhile.
                    if let Err(e) = tokio::task::block_in_place(|| self.sample_once()) {
                        error!(error = %e, "failed to sample GPUs, keeping previous snapshot");
                    }
                }
            }
        }

        self.shutdown()
    }

    /// Drop every device handle, then shut the backend down.
    pub fn shutdown(&mut self) -> Result<()> {
        self.devices = Devices::default();
        self.state = EngineState::Stopped;
        match self.backend.take() {
            Some(backend) => backend.shutdown(),
            None => Ok(()),
        }
    }
}
