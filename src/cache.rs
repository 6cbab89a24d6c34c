//! The snapshot cache shared by the sampling engine and scrape handlers.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{DeviceIdentity, GpuStat, ProcessStat};

/// Stats produced by one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub gpu_stats: Vec<GpuStat>,
    pub process_stats: BTreeMap<u32, ProcessStat>,
}

#[derive(Default)]
struct State {
    snapshot: Snapshot,
    updated_at: Option<DateTime<Utc>>,
}

/// Latest completed snapshot plus the static device list.
///
/// There is one writer (the sampling engine) and any number of readers. Every
/// read returns an owned copy, and both halves of a snapshot are always
/// replaced together, so readers never mix stats from two poll cycles.
pub struct SnapshotCache {
    devices: Vec<DeviceIdentity>,
    state: RwLock<State>,
}

impl SnapshotCache {
    pub fn new(devices: Vec<DeviceIdentity>) -> Self {
        Self {
            state: RwLock::new(State {
                snapshot: Snapshot {
                    gpu_stats: Vec::with_capacity(devices.len()),
                    process_stats: BTreeMap::new(),
                },
                updated_at: None,
            }),
            devices,
        }
    }

    // A panicking writer cannot leave a half-written snapshot behind: the
    // swap below is a single assignment.
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in the stats of a completed poll cycle.
    pub fn replace(&self, gpu_stats: Vec<GpuStat>, process_stats: BTreeMap<u32, ProcessStat>) {
        let snapshot = Snapshot {
            gpu_stats,
            process_stats,
        };
        let mut state = self.write();
        state.snapshot = snapshot;
        state.updated_at = Some(Utc::now());
    }

    pub fn gpu_stats(&self) -> Vec<GpuStat> {
        self.read().snapshot.gpu_stats.clone()
    }

    pub fn process_stats(&self) -> BTreeMap<u32, ProcessStat> {
        self.read().snapshot.process_stats.clone()
    }

    /// Both halves of the current snapshot under one lock acquisition.
    pub fn snapshot(&self) -> Snapshot {
        self.read().snapshot.clone()
    }

    /// When the last successful poll completed.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.read().updated_at
    }

    pub fn devices(&self) -> &[DeviceIdentity] {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}
