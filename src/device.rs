//! Device handles and the startup device directory.
//!
//! A [`Device`] pairs the immutable [`DeviceIdentity`] captured at enumeration
//! with an opaque query handle. Stat builders only talk to hardware through the
//! delegating methods here, so a fake handle can stand in for NVML in tests.

use tracing::info;

use crate::error::{ExporterError, Result};
use crate::types::{
    ClockKind, DeviceIdentity, MemoryHolder, MemoryUsage, PcieDirection, ProcessUtilization,
    UtilizationRates,
};

/// Hardware queries a GPU handle answers, in the interface's native units.
pub trait DeviceQueries: Send + Sync {
    /// MHz
    fn clock(&self, kind: ClockKind) -> Result<u32>;
    /// Celsius
    fn temperature(&self) -> Result<u32>;
    /// Percent of maximum, fan 0
    fn fan_speed(&self) -> Result<u32>;
    /// Milliwatts
    fn power_usage(&self) -> Result<u32>;
    /// Joules since the driver was loaded
    fn total_energy_consumption(&self) -> Result<f64>;
    /// KB/s
    fn pcie_throughput(&self, direction: PcieDirection) -> Result<u32>;
    fn utilization_rates(&self) -> Result<UtilizationRates>;
    fn encoder_utilization(&self) -> Result<u32>;
    fn decoder_utilization(&self) -> Result<u32>;
    fn memory_info(&self) -> Result<MemoryUsage>;
    /// Processes currently holding device memory.
    fn memory_holders(&self) -> Result<Vec<MemoryHolder>>;
    /// Per-process utilization samples newer than `since` (driver microseconds).
    fn process_utilization(&self, since: u64) -> Result<Vec<ProcessUtilization>>;
}

/// A GPU management interface that can enumerate devices.
pub trait GpuBackend: Send {
    fn device_count(&self) -> Result<u32>;
    fn open(&self, index: u32) -> Result<Device>;
    /// Release the interface. Every [`Device`] opened from it must be dropped first.
    fn shutdown(self: Box<Self>) -> Result<()>;
}

/// One enumerated GPU.
pub struct Device {
    identity: DeviceIdentity,
    handle: Box<dyn DeviceQueries>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Device {
    pub fn new(identity: DeviceIdentity, handle: Box<dyn DeviceQueries>) -> Self {
        Self { identity, handle }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn index(&self) -> u32 {
        self.identity.index
    }

    pub fn clock(&self, kind: ClockKind) -> Result<u32> {
        self.handle.clock(kind)
    }

    pub fn temperature(&self) -> Result<u32> {
        self.handle.temperature()
    }

    pub fn fan_speed(&self) -> Result<u32> {
        self.handle.fan_speed()
    }

    pub fn power_usage(&self) -> Result<u32> {
        self.handle.power_usage()
    }

    pub fn total_energy_consumption(&self) -> Result<f64> {
        self.handle.total_energy_consumption()
    }

    pub fn pcie_throughput(&self, direction: PcieDirection) -> Result<u32> {
        self.handle.pcie_throughput(direction)
    }

    pub fn utilization_rates(&self) -> Result<UtilizationRates> {
        self.handle.utilization_rates()
    }

    pub fn encoder_utilization(&self) -> Result<u32> {
        self.handle.encoder_utilization()
    }

    pub fn decoder_utilization(&self) -> Result<u32> {
        self.handle.decoder_utilization()
    }

    pub fn memory_info(&self) -> Result<MemoryUsage> {
        self.handle.memory_info()
    }

    pub fn memory_holders(&self) -> Result<Vec<MemoryHolder>> {
        self.handle.memory_holders()
    }

    pub fn process_utilization(&self, since: u64) -> Result<Vec<ProcessUtilization>> {
        self.handle.process_utilization(since)
    }
}

/// The immutable device list built once at startup.
#[derive(Debug, Default)]
pub struct Devices {
    devices: Vec<Device>,
}

impl Devices {
    /// Open every device the backend reports. Any failure aborts enumeration:
    /// a partial list is never returned.
    pub fn enumerate(backend: &dyn GpuBackend) -> Result<Self> {
        let count = backend.device_count()?;
        let mut devices = Vec::with_capacity(count as usize);

        for index in 0..count {
            let device = backend.open(index).map_err(|e| ExporterError::Device {
                index,
                source: Box::new(e),
            })?;
            info!(
                index,
                uuid = %device.identity().uuid,
                model = %device.identity().model_name,
                "found GPU"
            );
            devices.push(device);
        }

        Ok(Self { devices })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn identities(&self) -> Vec<DeviceIdentity> {
        self.devices.iter().map(|d| d.identity().clone()).collect()
    }
}
