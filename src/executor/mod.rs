pub mod bridge;
pub mod types;

use crate::job::{DeviceAddress, JobSpec};

pub use bridge::BridgeExecutor;
pub use types::{BridgeDiag, Invocation, StepName, StepResult};

/// Runs single pipeline steps against a device.
///
/// Implementations report every failure (non-zero exit, timeout, spawn error,
/// failure text) through the returned [`StepResult`] and never panic.
pub trait Executor: Send + Sync {
    fn execute(&self, step: StepName, device: &DeviceAddress, job: &JobSpec) -> StepResult;

    /// Called once after a device's pipeline has finished, whatever its outcome.
    fn release(&self, _device: &DeviceAddress, _job: &JobSpec) {}
}
