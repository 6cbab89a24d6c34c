//! Per-device process stats: memory holders merged with utilization samples
//! and enriched with OS and Slurm attributes.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::device::Device;
use crate::error::Result;
use crate::metrics::slurm;
use crate::metrics::system::ProcessInspector;
use crate::types::{ProcessStat, ProcessUtilization};

/// Output of one device's process pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSample {
    pub stats: BTreeMap<u32, ProcessStat>,
    /// Newest utilization timestamp seen, or `since` if there were none.
    pub newest_timestamp: u64,
}

/// Build the process stats of one device.
///
/// Only processes in the memory-holder list that are still running show up.
/// Utilization samples are taken since `since` (driver microseconds); `0`
/// averages over everything the driver still buffers, so the values are a
/// window average rather than an instantaneous rate. Samples for pids not in
/// the result are ignored.
pub fn build_process_stats(
    device: &Device,
    inspector: &mut dyn ProcessInspector,
    use_slurm: bool,
    since: u64,
) -> Result<ProcessSample> {
    let index = device.index();

    let holders: Vec<(u32, u64)> = device
        .memory_holders()?
        .into_iter()
        .filter_map(|h| {
            let pid = u32::try_from(h.pid).ok().filter(|&pid| pid > 0)?;
            Some((pid, h.used_memory.unwrap_or(0)))
        })
        .collect();

    let pids: Vec<u32> = holders.iter().map(|&(pid, _)| pid).collect();
    inspector.refresh(&pids);

    let mut stats = BTreeMap::new();
    for (pid, used_memory) in holders {
        let Some(os) = inspector.lookup(pid, use_slurm) else {
            debug!(gpu = index, pid, "process exited before lookup, dropping");
            continue;
        };

        let slurm = use_slurm.then(|| slurm::from_environ(&os.environ));
        stats.insert(
            pid,
            ProcessStat {
                pid,
                gpu_index: index,
                name: os.name,
                user: os.user,
                status: os.status,
                ppid: os.ppid,
                working_dir: os.working_dir,
                command_line: os.command_line,
                cpu_percent: os.cpu_percent,
                cpu_mem_used_bytes: os.resident_bytes,
                num_threads: os.num_threads,
                gpu_used_memory_bytes: used_memory,
                slurm,
                ..Default::default()
            },
        );
    }

    let samples = match device.process_utilization(since) {
        Ok(samples) => samples,
        Err(e) => {
            // NVML reports "not found" when nothing ran during the window.
            debug!(gpu = index, error = %e, "no process utilization samples");
            Vec::new()
        }
    };
    let newest_timestamp = apply_utilization(&mut stats, &samples).max(since);

    Ok(ProcessSample {
        stats,
        newest_timestamp,
    })
}

/// Overwrite utilization of known pids with their most recent sample and
/// return the newest timestamp seen.
fn apply_utilization(stats: &mut BTreeMap<u32, ProcessStat>, samples: &[ProcessUtilization]) -> u64 {
    let mut newest = 0;
    let mut latest: HashMap<u32, &ProcessUtilization> = HashMap::new();

    for sample in samples {
        newest = newest.max(sample.timestamp);
        let Ok(pid) = u32::try_from(sample.pid) else {
            continue;
        };
        if !stats.contains_key(&pid) {
            continue;
        }
        latest
            .entry(pid)
            .and_modify(|current| {
                if sample.timestamp >= current.timestamp {
                    *current = sample;
                }
            })
            .or_insert(sample);
    }

    for (pid, sample) in latest {
        if let Some(stat) = stats.get_mut(&pid) {
            stat.smutil = sample.sm_util;
            stat.memutil = sample.mem_util;
            stat.encutil = sample.enc_util;
            stat.decutil = sample.dec_util;
        }
    }

    newest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExporterError;
    use crate::testing::{fake_device, os_process, FakeDevice, FakeInspector};
    use crate::types::MemoryHolder;

    fn holder(pid: i64, used: u64) -> MemoryHolder {
        MemoryHolder {
            pid,
            used_memory: Some(used),
        }
    }

    fn util(pid: i64, timestamp: u64, sm: u32) -> ProcessUtilization {
        ProcessUtilization {
            pid,
            timestamp,
            sm_util: sm,
            ..Default::default()
        }
    }

    #[test]
    fn utilization_only_pids_never_appear() {
        let device = fake_device(
            0,
            FakeDevice {
                holders: Some(vec![holder(100, 2048)]),
                utilization: Some(vec![util(100, 10, 40), util(200, 11, 10)]),
                ..Default::default()
            },
        );
        let mut inspector = FakeInspector::with([100, 200]);

        let sample = build_process_stats(&device, &mut inspector, false, 0).unwrap();

        assert_eq!(sample.stats.len(), 1);
        let stat = &sample.stats[&100];
        assert_eq!(stat.gpu_used_memory_bytes, 2048);
        assert_eq!(stat.smutil, 40);
        assert!(!sample.stats.contains_key(&200));
        assert_eq!(sample.newest_timestamp, 11);
    }

    #[test]
    fn non_positive_pids_are_discarded() {
        let device = fake_device(
            0,
            FakeDevice {
                holders: Some(vec![holder(0, 1), holder(-1, 1), holder(7, 1)]),
                ..Default::default()
            },
        );
        let mut inspector = FakeInspector::with([0, 7]);

        let sample = build_process_stats(&device, &mut inspector, false, 0).unwrap();
        assert_eq!(sample.stats.keys().copied().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn vanished_processes_are_dropped() {
        let device = fake_device(
            1,
            FakeDevice {
                holders: Some(vec![holder(100, 1), holder(101, 1)]),
                utilization: Some(vec![util(101, 5, 90)]),
                ..Default::default()
            },
        );
        let mut inspector = FakeInspector::with([100]);

        let sample = build_process_stats(&device, &mut inspector, false, 0).unwrap();
        assert_eq!(sample.stats.len(), 1);
        assert_eq!(sample.stats[&100].gpu_index, 1);
        assert_eq!(inspector.refreshed(), vec![100, 101]);
    }

    #[test]
    fn os_attributes_are_copied() {
        let device = fake_device(
            0,
            FakeDevice {
                holders: Some(vec![MemoryHolder {
                    pid: 100,
                    used_memory: None,
                }]),
                ..Default::default()
            },
        );
        let mut inspector = FakeInspector::default();
        let mut os = os_process("python");
        os.ppid = 1;
        os.cpu_percent = 99.5;
        os.resident_bytes = 4096;
        os.num_threads = 12;
        inspector.insert(100, os);

        let stat = build_process_stats(&device, &mut inspector, false, 0)
            .unwrap()
            .stats
            .remove(&100)
            .unwrap();
        assert_eq!(stat.name, "python");
        assert_eq!(stat.user, "alice");
        assert_eq!(stat.command_line, "python train.py");
        assert_eq!(stat.working_dir, "/home/alice");
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.cpu_percent, 99.5);
        assert_eq!(stat.cpu_mem_used_bytes, 4096);
        assert_eq!(stat.num_threads, 12);
        assert_eq!(stat.gpu_used_memory_bytes, 0);
    }

    #[test]
    fn slurm_fields_only_when_enabled() {
        let device = fake_device(
            0,
            FakeDevice {
                holders: Some(vec![holder(100, 1)]),
                ..Default::default()
            },
        );
        let mut inspector = FakeInspector::default();
        let mut os = os_process("python");
        os.environ = vec!["SLURM_JOBID=12".into(), "SLURM_JOB_USER=bob".into()];
        inspector.insert(100, os);

        let off = build_process_stats(&device, &mut inspector, false, 0).unwrap();
        assert_eq!(off.stats[&100].slurm, None);

        let on = build_process_stats(&device, &mut inspector, true, 0).unwrap();
        let slurm = on.stats[&100].slurm.clone().unwrap();
        assert_eq!(slurm.job_id, "12");
        assert_eq!(slurm.user, "bob");
        assert!(slurm.account.is_empty());
    }

    #[test]
    fn most_recent_sample_wins() {
        let device = fake_device(
            0,
            FakeDevice {
                holders: Some(vec![holder(100, 1)]),
                utilization: Some(vec![util(100, 30, 70), util(100, 10, 20)]),
                ..Default::default()
            },
        );
        let mut inspector = FakeInspector::with([100]);

        let sample = build_process_stats(&device, &mut inspector, false, 0).unwrap();
        assert_eq!(sample.stats[&100].smutil, 70);
        assert_eq!(sample.newest_timestamp, 30);
    }

    #[test]
    fn failed_utilization_query_keeps_memory_holders() {
        let device = fake_device(
            0,
            FakeDevice {
                holders: Some(vec![holder(100, 512)]),
                utilization: None,
                ..Default::default()
            },
        );
        let mut inspector = FakeInspector::with([100]);

        let sample = build_process_stats(&device, &mut inspector, false, 55).unwrap();
        assert_eq!(sample.stats[&100].smutil, 0);
        assert_eq!(sample.stats[&100].gpu_used_memory_bytes, 512);
        assert_eq!(sample.newest_timestamp, 55);
    }

    #[test]
    fn failed_memory_holder_query_is_an_error() {
        let device = fake_device(
            0,
            FakeDevice {
                holders: None,
                ..Default::default()
            },
        );
        let mut inspector = FakeInspector::default();

        let err = build_process_stats(&device, &mut inspector, false, 0).unwrap_err();
        assert!(matches!(err, ExporterError::Query(_)));
    }

    #[test]
    fn since_is_forwarded_to_the_device() {
        let fake = FakeDevice {
            holders: Some(Vec::new()),
            ..Default::default()
        };
        let last_since = fake.last_since.clone();
        let device = fake_device(0, fake);

        build_process_stats(&device, &mut FakeInspector::default(), false, 1234).unwrap();
        assert_eq!(last_since.load(std::sync::atomic::Ordering::SeqCst), 1234);
    }
}
