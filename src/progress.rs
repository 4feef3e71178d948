//! Run-scoped progress shared between scheduler workers and pollers.

use crate::{
    error::JobError,
    job::{DeviceAddress, JobSpec},
    pipeline::{DeviceRecord, DeviceStatus},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub status: RunStatus,
    pub total: usize,
    pub completed: usize,
    /// Job order, for presenting per-device views.
    pub order: Vec<DeviceAddress>,
    pub records: HashMap<DeviceAddress, DeviceRecord>,
    pub in_flight: HashSet<DeviceAddress>,
}

impl RunState {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }

    pub fn record(&self, device: &DeviceAddress) -> Option<&DeviceRecord> {
        self.records.get(device)
    }

    fn device_state(&self, device: &DeviceAddress) -> DeviceState {
        match self.records.get(device).map(|r| r.status) {
            Some(DeviceStatus::Success) => DeviceState::Success,
            Some(DeviceStatus::Failed) => DeviceState::Failed,
            Some(DeviceStatus::Skipped) => DeviceState::Skipped,
            Some(DeviceStatus::Aborted) => DeviceState::Aborted,
            None if self.in_flight.contains(device) => DeviceState::Running,
            None => DeviceState::Pending,
        }
    }

    fn count(&self, status: DeviceStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProgress {
    pub device: DeviceAddress,
    pub state: DeviceState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressView {
    pub status: RunStatus,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub percent: f64,
    pub devices: Vec<DeviceProgress>,
}

/// Single lock around [`RunState`]; every read and write goes through it.
#[derive(Debug, Default)]
pub struct Progress {
    state: Mutex<RunState>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fresh run, replacing any finished one.
    pub fn begin(&self, job: &JobSpec) -> Result<(), JobError> {
        let mut st = self.lock();
        if st.status == RunStatus::Running {
            return Err(JobError::state("a run is already in progress"));
        }
        *st = RunState {
            status: RunStatus::Running,
            total: job.devices.len(),
            completed: 0,
            order: job.devices.clone(),
            records: HashMap::with_capacity(job.devices.len()),
            in_flight: HashSet::new(),
        };
        Ok(())
    }

    pub fn mark_started(&self, device: &DeviceAddress) {
        self.lock().in_flight.insert(device.clone());
    }

    /// Store a finished device. Returns `false` if the device already had a record.
    pub fn record(&self, record: DeviceRecord) -> bool {
        let mut st = self.lock();
        if st.records.contains_key(&record.device) {
            warn!("duplicate record for {} ignored", record.device);
            return false;
        }
        st.in_flight.remove(&record.device);
        st.records.insert(record.device.clone(), record);
        st.completed += 1;
        true
    }

    pub fn has_record(&self, device: &DeviceAddress) -> bool {
        self.lock().records.contains_key(device)
    }

    pub fn finish(&self) {
        let mut st = self.lock();
        st.in_flight.clear();
        st.status = RunStatus::Done;
    }

    pub fn snapshot(&self) -> ProgressView {
        let st = self.lock();
        let percent = if st.total == 0 {
            if st.is_done() { 100.0 } else { 0.0 }
        } else {
            st.completed as f64 * 100.0 / st.total as f64
        };
        ProgressView {
            status: st.status,
            total: st.total,
            completed: st.completed,
            succeeded: st.count(DeviceStatus::Success),
            failed: st.count(DeviceStatus::Failed),
            percent,
            devices: st
                .order
                .iter()
                .map(|d| DeviceProgress {
                    device: d.clone(),
                    state: st.device_state(d),
                })
                .collect(),
        }
    }

    /// Consistent copy of the whole run state.
    pub fn state(&self) -> RunState {
        self.lock().clone()
    }
}
