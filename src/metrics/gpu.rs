//! GPU stat collection.

use std::cell::OnceCell;

use tracing::debug;

use crate::device::Device;
use crate::error::Result;
use crate::registry::names::*;
use crate::types::{ClockKind, GpuStat, MemoryUsage, PcieDirection, UtilizationRates};

/// Build one device's stat record for the requested metric names.
///
/// Each field is queried independently; a failed query leaves that field at
/// zero and collection continues. Values are normalized to watts,
/// millijoules and bytes per second here. Names that are not GPU metrics are
/// ignored.
pub fn build_gpu_stat(device: &Device, requested: &[&str]) -> GpuStat {
    let identity = device.identity();
    let index = identity.index;
    let mut stat = GpuStat {
        index,
        uuid: identity.uuid.clone(),
        model_name: identity.model_name.clone(),
        ..Default::default()
    };

    // Shared by two metrics each; issued at most once per record.
    let rates: OnceCell<UtilizationRates> = OnceCell::new();
    let utilization =
        || *rates.get_or_init(|| or_zero(device.utilization_rates(), index, "utilization_rates"));
    let memory: OnceCell<MemoryUsage> = OnceCell::new();
    let memory_info = || *memory.get_or_init(|| or_zero(device.memory_info(), index, "memory_info"));

    for &name in requested {
        match name {
            GPU_SM_CLOCK => {
                stat.sm_clock = or_zero(device.clock(ClockKind::Sm), index, name);
            }
            GPU_MEMORY_CLOCK => {
                stat.mem_clock = or_zero(device.clock(ClockKind::Memory), index, name);
            }
            GPU_TEMPERATURE => {
                stat.temperature = or_zero(device.temperature(), index, name);
            }
            GPU_FAN_SPEED => {
                stat.fan_speed = or_zero(device.fan_speed(), index, name);
            }
            GPU_POWER_USAGE => {
                stat.power_usage = or_zero(device.power_usage(), index, name) / 1000;
            }
            GPU_TOTAL_ENERGY_CONSUMPTION => {
                stat.energy_consumption =
                    joules_to_millijoules(or_zero(device.total_energy_consumption(), index, name));
            }
            GPU_PCIE_TX_BYTES => {
                let kb = or_zero(device.pcie_throughput(PcieDirection::Tx), index, name);
                stat.pcie_tx_bytes = u64::from(kb) * 1024;
            }
            GPU_PCIE_RX_BYTES => {
                let kb = or_zero(device.pcie_throughput(PcieDirection::Rx), index, name);
                stat.pcie_rx_bytes = u64::from(kb) * 1024;
            }
            GPU_UTILIZATION => stat.gpu_util = utilization().gpu,
            GPU_MEM_COPY_UTILIZATION => stat.memcpy_util = utilization().memory,
            GPU_ENC_UTILIZATION => {
                stat.encoder_util = or_zero(device.encoder_utilization(), index, name);
            }
            GPU_DEC_UTILIZATION => {
                stat.decoder_util = or_zero(device.decoder_utilization(), index, name);
            }
            GPU_MEMORY_FREE_BYTES => stat.mem_free_bytes = memory_info().free,
            GPU_MEMORY_USED_BYTES => stat.mem_used_bytes = memory_info().used,
            _ => {}
        }
    }

    stat
}

/// Rounded to the nearest millijoule; negative or NaN readings become 0.
pub fn joules_to_millijoules(joules: f64) -> u64 {
    (joules * 1000.0).round() as u64
}

fn or_zero<T: Default>(result: Result<T>, index: u32, query: &str) -> T {
    result.unwrap_or_else(|e| {
        debug!(gpu = index, query, error = %e, "GPU query failed, reporting zero");
        T::default()
    })
}
