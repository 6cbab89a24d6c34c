//! NVML implementation of the device traits.

use std::sync::Arc;

use nvml_wrapper::enum_wrappers::device::{Clock, PcieUtilCounter, TemperatureSensor};
use nvml_wrapper::enums::device::{PcieLinkMaxSpeed, UsedGpuMemory};
use nvml_wrapper::Nvml;

use crate::device::{Device, DeviceQueries, GpuBackend};
use crate::error::{ExporterError, Result};
use crate::types::{
    ClockKind, DeviceAttributes, DeviceIdentity, MemoryHolder, MemoryUsage, PcieDirection,
    ProcessUtilization, UtilizationRates,
};

/// Owner of the NVML library handle.
pub struct NvmlBackend {
    nvml: Arc<Nvml>,
}

impl NvmlBackend {
    pub fn init() -> Result<Self> {
        Ok(Self {
            nvml: Arc::new(Nvml::init()?),
        })
    }

    fn identity(&self, index: u32) -> Result<DeviceIdentity> {
        let device = self.nvml.device_by_index(index)?;

        // Link limits and capacity are missing on some parts; only the
        // handle, UUID and name are required.
        let attributes = DeviceAttributes {
            memory_size_mb: device
                .memory_info()
                .map(|info| memory_size_mb(info.total))
                .unwrap_or_default(),
            ..Default::default()
        };

        Ok(DeviceIdentity {
            index,
            uuid: device.uuid()?,
            model_name: device.name()?,
            attributes,
            pcie_link_max_speed: device
                .max_pcie_link_speed()
                .map(link_speed_mts)
                .unwrap_or_default(),
            pcie_link_max_gen: device.max_pcie_link_gen().unwrap_or_default(),
            pcie_link_max_width: device.max_pcie_link_width().unwrap_or_default(),
        })
    }
}

fn millijoules_to_joules(mj: u64) -> f64 {
    mj as f64 / 1000.0
}

fn memory_size_mb(total_bytes: u64) -> u64 {
    total_bytes / (1024 * 1024)
}

/// Transfer rate in MT/s; 0 when the driver reports no valid speed.
fn link_speed_mts(speed: PcieLinkMaxSpeed) -> u32 {
    speed.as_integer().unwrap_or(0)
}

impl GpuBackend for NvmlBackend {
    fn device_count(&self) -> Result<u32> {
        Ok(self.nvml.device_count()?)
    }

    fn open(&self, index: u32) -> Result<Device> {
        let identity = self.identity(index)?;
        let handle = NvmlDevice {
            nvml: Arc::clone(&self.nvml),
            index,
        };
        Ok(Device::new(identity, Box::new(handle)))
    }

    fn shutdown(self: Box<Self>) -> Result<()> {
        match Arc::try_unwrap(self.nvml) {
            Ok(nvml) => Ok(nvml.shutdown()?),
            Err(_) => Err(ExporterError::Query(
                "NVML handle still referenced by an open device".into(),
            )),
        }
    }
}

/// Query handle for one NVML device, resolved by index on each call.
struct NvmlDevice {
    nvml: Arc<Nvml>,
    index: u32,
}

impl NvmlDevice {
    fn device(&self) -> Result<nvml_wrapper::Device<'_>> {
        Ok(self.nvml.device_by_index(self.index)?)
    }
}

impl DeviceQueries for NvmlDevice {
    fn clock(&self, kind: ClockKind) -> Result<u32> {
        let clock = match kind {
            ClockKind::Sm => Clock::SM,
            ClockKind::Memory => Clock::Memory,
        };
        Ok(self.device()?.clock_info(clock)?)
    }

    fn temperature(&self) -> Result<u32> {
        Ok(self.device()?.temperature(TemperatureSensor::Gpu)?)
    }

    fn fan_speed(&self) -> Result<u32> {
        Ok(self.device()?.fan_speed(0)?)
    }

    fn power_usage(&self) -> Result<u32> {
        Ok(self.device()?.power_usage()?)
    }

    fn total_energy_consumption(&self) -> Result<f64> {
        // NVML counts millijoules.
        Ok(millijoules_to_joules(self.device()?.total_energy_consumption()?))
    }

    fn pcie_throughput(&self, direction: PcieDirection) -> Result<u32> {
        let counter = match direction {
            PcieDirection::Tx => PcieUtilCounter::Send,
            PcieDirection::Rx => PcieUtilCounter::Receive,
        };
        Ok(self.device()?.pcie_throughput(counter)?)
    }

    fn utilization_rates(&self) -> Result<UtilizationRates> {
        let rates = self.device()?.utilization_rates()?;
        Ok(UtilizationRates {
            gpu: rates.gpu,
            memory: rates.memory,
        })
    }

    fn encoder_utilization(&self) -> Result<u32> {
        Ok(self.device()?.encoder_utilization()?.utilization)
    }

    fn decoder_utilization(&self) -> Result<u32> {
        Ok(self.device()?.decoder_utilization()?.utilization)
    }

    fn memory_info(&self) -> Result<MemoryUsage> {
        let info = self.device()?.memory_info()?;
        Ok(MemoryUsage {
            free: info.free,
            used: info.used,
        })
    }

    fn memory_holders(&self) -> Result<Vec<MemoryHolder>> {
        let processes = self.device()?.running_compute_processes()?;
        Ok(processes
            .into_iter()
            .map(|p| MemoryHolder {
                pid: i64::from(p.pid),
                used_memory: match p.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => Some(bytes),
                    UsedGpuMemory::Unavailable => None,
                },
            })
            .collect())
    }

    fn process_utilization(&self, since: u64) -> Result<Vec<ProcessUtilization>> {
        let samples = self.device()?.process_utilization_stats(since)?;
        Ok(samples
            .into_iter()
            .map(|s| ProcessUtilization {
                pid: i64::from(s.pid),
                timestamp: s.timestamp,
                sm_util: s.sm_util,
                mem_util: s.mem_util,
                enc_util: s.enc_util,
                dec_util: s.dec_util,
            })
            .collect())
    }
}
