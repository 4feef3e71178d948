#![allow(dead_code)]

use fleet_install::{
    executor::{Executor, StepName, StepResult},
    job::{DeviceAddress, JobSpec},
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type StepHook = Box<dyn Fn(StepName, &DeviceAddress) + Send + Sync>;

/// Scripted executor: every step succeeds unless listed in `failures`.
#[derive(Default)]
pub struct MockExecutor {
    failures: HashSet<(String, StepName)>,
    delay: Duration,
    hook: Option<StepHook>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub calls: Mutex<Vec<(String, StepName)>>,
    pub released: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, device: &str, step: StepName) -> Self {
        self.failures.insert((device.to_string(), step));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn on_step(mut self, hook: impl Fn(StepName, &DeviceAddress) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, device: &str) -> Vec<StepName> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == device)
            .map(|(_, s)| *s)
            .collect()
    }
}

impl Executor for MockExecutor {
    fn execute(&self, step: StepName, device: &DeviceAddress, _job: &JobSpec) -> StepResult {
        if step == StepName::Connect {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        }
        self.calls
            .lock()
            .unwrap()
            .push((device.to_string(), step));
        if let Some(hook) = &self.hook {
            hook(step, device);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let elapsed = Duration::from_millis(10);
        if self.failures.contains(&(device.to_string(), step)) {
            StepResult::failed(step, format!("{step} failed on {device}"), elapsed)
        } else {
            StepResult::ok(step, "ok", elapsed)
        }
    }

    fn release(&self, device: &DeviceAddress, _job: &JobSpec) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.released.lock().unwrap().push(device.to_string());
    }
}

pub fn job(devices: &[&str], concurrency: usize) -> JobSpec {
    JobSpec {
        bridge_path: PathBuf::from("/usr/bin/adb"),
        package_path: PathBuf::from("app.apk"),
        package_bytes: 1024,
        devices: devices
            .iter()
            .map(|d| DeviceAddress::parse(d).unwrap())
            .collect(),
        uninstall_package: None,
        launch_package: None,
        concurrency,
    }
}

pub fn job_with(devices: &[&str], concurrency: usize, uninstall: bool, launch: bool) -> JobSpec {
    let mut j = job(devices, concurrency);
    if uninstall {
        j.uninstall_package = Some("com.example.old".into());
    }
    if launch {
        j.launch_package = Some("com.example.app".into());
    }
    j
}

pub fn addr(s: &str) -> DeviceAddress {
    DeviceAddress::parse(s).unwrap()
}
