use crate::{
    executor::{Executor, StepName, StepResult},
    job::{DeviceAddress, JobSpec},
    scheduler::CancelToken,
    util::now_rfc3339,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Success,
    Failed,
    /// Never dispatched because the run was cancelled.
    Skipped,
    /// Stopped between steps because the run was cancelled.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device: DeviceAddress,
    pub started_at: String,
    pub steps: Vec<StepResult>,
    pub status: DeviceStatus,
    #[serde(rename = "total_ms", with = "crate::util::duration_ms")]
    pub total: Duration,
}

impl DeviceRecord {
    pub fn skipped(device: &DeviceAddress) -> Self {
        Self {
            device: device.clone(),
            started_at: now_rfc3339(),
            steps: Vec::new(),
            status: DeviceStatus::Skipped,
            total: Duration::ZERO,
        }
    }

    pub fn step(&self, name: StepName) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step == name)
    }

    pub fn failure(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.success)
    }
}

/// Drives one device through the configured steps.
pub struct Pipeline<E: Executor> {
    executor: E,
}

impl<E: Executor> Pipeline<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn run(&self, device: &DeviceAddress, job: &JobSpec) -> DeviceRecord {
        self.run_cancellable(device, job, &CancelToken::default())
    }

    /// Steps run strictly in order and stop at the first failure. A
    /// cancellation seen before the first step yields a `Skipped` record
    /// without touching the device; one seen between steps ends it `Aborted`.
    pub fn run_cancellable(
        &self,
        device: &DeviceAddress,
        job: &JobSpec,
        cancel: &CancelToken,
    ) -> DeviceRecord {
        if cancel.is_cancelled() {
            info!("{device}: run cancelled before dispatch");
            return DeviceRecord::skipped(device);
        }

        let started_at = now_rfc3339();
        let configured = job.configured_steps();
        let mut steps: Vec<StepResult> = Vec::with_capacity(configured.len());
        let mut aborted = false;

        for &step in &configured {
            if !steps.is_empty() && cancel.is_cancelled() {
                info!("{device}: run cancelled before {step}");
                aborted = true;
                break;
            }

            debug!("{device}: {step}");
            let result = self.execute_step(step, device, job);
            let failed = !result.success;
            steps.push(result);
            if failed {
                break;
            }
        }

        self.executor.release(device, job);

        let all_ok = steps.iter().all(|s| s.success);
        let status = if aborted {
            DeviceStatus::Aborted
        } else if all_ok && steps.len() == configured.len() {
            DeviceStatus::Success
        } else {
            DeviceStatus::Failed
        };
        let total = steps.iter().map(|s| s.elapsed).sum();

        DeviceRecord {
            device: device.clone(),
            started_at,
            steps,
            status,
            total,
        }
    }

    /// A panicking executor fails the step it was running.
    fn execute_step(&self, step: StepName, device: &DeviceAddress, job: &JobSpec) -> StepResult {
        let started = Instant::now();
        catch_unwind(AssertUnwindSafe(|| self.executor.execute(step, device, job))).unwrap_or_else(
            |payload| {
                let msg = panic_message(payload.as_ref());
                error!("{device}: {step} panicked: {msg}");
                StepResult::failed(step, format!("step panicked: {msg}"), started.elapsed())
            },
        )
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
