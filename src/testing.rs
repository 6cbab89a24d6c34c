//! In-memory stand-ins for NVML and the OS used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::{Device, DeviceQueries, GpuBackend};
use crate::error::{ExporterError, Result};
use crate::metrics::ProcessInspector;
use crate::types::{
    ClockKind, DeviceIdentity, MemoryHolder, MemoryUsage, OsProcess, PcieDirection,
    ProcessUtilization, UtilizationRates,
};

fn value<T: Clone>(v: &Option<T>, query: &str) -> Result<T> {
    v.clone()
        .ok_or_else(|| ExporterError::Query(format!("{query} not supported")))
}

/// A scripted device. `None` fields fail their query.
#[derive(Clone, Default)]
pub struct FakeDevice {
    pub sm_clock: Option<u32>,
    pub mem_clock: Option<u32>,
    pub temperature: Option<u32>,
    pub fan_speed: Option<u32>,
    pub power_mw: Option<u32>,
    pub energy_j: Option<f64>,
    pub pcie_tx_kb: Option<u32>,
    pub pcie_rx_kb: Option<u32>,
    pub rates: Option<UtilizationRates>,
    pub encoder: Option<u32>,
    pub decoder: Option<u32>,
    pub memory: Option<MemoryUsage>,
    pub holders: Option<Vec<MemoryHolder>>,
    pub utilization: Option<Vec<ProcessUtilization>>,

    /// Makes the memory-holder query fail while set.
    pub broken: Arc<AtomicBool>,
    /// Blocks the memory-holder query for this long.
    pub delay: Option<Duration>,
    pub rate_queries: Arc<AtomicUsize>,
    pub last_since: Arc<AtomicU64>,
}

impl DeviceQueries for FakeDevice {
    fn clock(&self, kind: ClockKind) -> Result<u32> {
        match kind {
            ClockKind::Sm => value(&self.sm_clock, "sm clock"),
            ClockKind::Memory => value(&self.mem_clock, "memory clock"),
        }
    }

    fn temperature(&self) -> Result<u32> {
        value(&self.temperature, "temperature")
    }

    fn fan_speed(&self) -> Result<u32> {
        value(&self.fan_speed, "fan speed")
    }

    fn power_usage(&self) -> Result<u32> {
        value(&self.power_mw, "power usage")
    }

    fn total_energy_consumption(&self) -> Result<f64> {
        value(&self.energy_j, "energy")
    }

    fn pcie_throughput(&self, direction: PcieDirection) -> Result<u32> {
        match direction {
            PcieDirection::Tx => value(&self.pcie_tx_kb, "pcie tx"),
            PcieDirection::Rx => value(&self.pcie_rx_kb, "pcie rx"),
        }
    }

    fn utilization_rates(&self) -> Result<UtilizationRates> {
        self.rate_queries.fetch_add(1, Ordering::SeqCst);
        value(&self.rates, "utilization rates")
    }

    fn encoder_utilization(&self) -> Result<u32> {
        value(&self.encoder, "encoder")
    }

    fn decoder_utilization(&self) -> Result<u32> {
        value(&self.decoder, "decoder")
    }

    fn memory_info(&self) -> Result<MemoryUsage> {
        value(&self.memory, "memory info")
    }

    fn memory_holders(&self) -> Result<Vec<MemoryHolder>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(ExporterError::Query("GPU is lost".into()));
        }
        value(&self.holders, "running processes")
    }

    fn process_utilization(&self, since: u64) -> Result<Vec<ProcessUtilization>> {
        self.last_since.store(since, Ordering::SeqCst);
        value(&self.utilization, "process utilization")
    }
}

pub fn fake_identity(index: u32) -> DeviceIdentity {
    DeviceIdentity {
        index,
        uuid: format!("GPU-00000000-0000-0000-0000-{index:012}"),
        model_name: "NVIDIA A100-SXM4-80GB".into(),
        pcie_link_max_speed: 16_000,
        ..Default::default()
    }
}

pub fn fake_device(index: u32, fake: FakeDevice) -> Device {
    Device::new(fake_identity(index), Box::new(fake))
}

/// Backend over a fixed set of fake devices.
#[derive(Default)]
pub struct FakeBackend {
    pub devices: Vec<FakeDevice>,
    pub fail_open: Option<u32>,
    pub shut_down: Arc<AtomicBool>,
}

impl FakeBackend {
    pub fn new(devices: Vec<FakeDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }
}

impl GpuBackend for FakeBackend {
    fn device_count(&self) -> Result<u32> {
        Ok(self.devices.len() as u32)
    }

    fn open(&self, index: u32) -> Result<Device> {
        if self.fail_open == Some(index) {
            return Err(ExporterError::Query("unable to get handle".into()));
        }
        let fake = self
            .devices
            .get(index as usize)
            .cloned()
            .ok_or_else(|| ExporterError::Query(format!("no device {index}")))?;
        Ok(fake_device(index, fake))
    }

    fn shutdown(self: Box<Self>) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn os_process(name: &str) -> OsProcess {
    OsProcess {
        name: name.into(),
        command_line: format!("{name} train.py"),
        working_dir: "/home/alice".into(),
        user: "alice".into(),
        status: "Running".into(),
        ppid: 1,
        num_threads: 1,
        ..Default::default()
    }
}

/// Inspector over a fixed process table.
#[derive(Default)]
pub struct FakeInspector {
    processes: HashMap<u32, OsProcess>,
    refreshed: Mutex<Vec<u32>>,
}

impl FakeInspector {
    pub fn with<I: IntoIterator<Item = u32>>(pids: I) -> Self {
        let mut inspector = Self::default();
        for pid in pids {
            inspector.insert(pid, os_process(&format!("proc-{pid}")));
        }
        inspector
    }

    pub fn insert(&mut self, pid: u32, process: OsProcess) {
        self.processes.insert(pid, process);
    }

    /// Pids passed to the last refresh.
    pub fn refreshed(&self) -> Vec<u32> {
        self.refreshed.lock().unwrap().clone()
    }
}

impl ProcessInspector for FakeInspector {
    fn refresh(&mut self, pids: &[u32]) {
        *self.refreshed.lock().unwrap() = pids.to_vec();
    }

    fn lookup(&self, pid: u32, with_environ: bool) -> Option<OsProcess> {
        let mut process = self.processes.get(&pid)?.clone();
        if !with_environ {
            process.environ.clear();
        }
        Some(process)
    }
}
