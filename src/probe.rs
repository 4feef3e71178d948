use crate::{
    executor::BridgeExecutor,
    job::DeviceAddress,
    scheduler::{CancelToken, worker_pool},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProbe {
    pub device: DeviceAddress,
    pub connected: bool,
    pub latency_ms: u64,
    pub model: Option<String>,
    pub os_version: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Connect to each device and read basic identity properties.
pub fn probe_device(bridge: &BridgeExecutor, exe: &Path, device: &DeviceAddress) -> DeviceProbe {
    let started = Instant::now();
    let verdict = bridge.connect(exe, device);
    let latency_ms = started.elapsed().as_millis() as u64;

    let probe = if verdict.ok {
        DeviceProbe {
            device: device.clone(),
            connected: true,
            latency_ms,
            model: bridge.getprop(exe, device, "ro.product.model"),
            os_version: bridge.getprop(exe, device, "ro.build.version.release"),
            error: None,
        }
    } else {
        DeviceProbe {
            device: device.clone(),
            connected: false,
            latency_ms,
            model: None,
            os_version: None,
            error: Some(verdict.detail.trim().to_string()),
        }
    };

    let _ = bridge.disconnect(exe, device);
    probe
}

/// Probe all devices with at most `workers` in flight. Results keep input order.
pub fn probe_devices(
    bridge: &BridgeExecutor,
    exe: &Path,
    devices: &[DeviceAddress],
    workers: usize,
) -> Vec<DeviceProbe> {
    let slots: Vec<Mutex<Option<DeviceProbe>>> = devices.iter().map(|_| Mutex::new(None)).collect();

    worker_pool(devices, workers, &CancelToken::new(), |i, device| {
        let probe = probe_device(bridge, exe, device);
        if let Ok(mut slot) = slots[i].lock() {
            *slot = Some(probe);
        }
    });

    slots
        .into_iter()
        .zip(devices)
        .map(|(slot, device)| {
            slot.into_inner().ok().flatten().unwrap_or_else(|| DeviceProbe {
                device: device.clone(),
                connected: false,
                latency_ms: 0,
                model: None,
                os_version: None,
                error: Some("not probed".into()),
            })
        })
        .collect()
}
