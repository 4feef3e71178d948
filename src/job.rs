use crate::{config::Config, error::JobError, executor::StepName};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// One target device, `host` or `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Trims surrounding whitespace; blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        if s.is_empty() {
            None
        } else {
            Some(Self(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Device addresses as submitted: newline-delimited text or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceList {
    Text(String),
    List(Vec<String>),
}

impl Default for DeviceList {
    fn default() -> Self {
        DeviceList::List(Vec::new())
    }
}

impl DeviceList {
    /// Parsed, trimmed and deduplicated addresses in first-seen order.
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        let raw: Vec<&str> = match self {
            DeviceList::Text(s) => s.lines().collect(),
            DeviceList::List(v) => v.iter().map(String::as_str).collect(),
        };
        let mut seen = HashSet::new();
        raw.into_iter()
            .filter_map(DeviceAddress::parse)
            .filter(|d| seen.insert(d.clone()))
            .collect()
    }
}

/// Job submission payload, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub bridge_path: PathBuf,
    pub package_path: PathBuf,
    #[serde(default)]
    pub devices: DeviceList,
    #[serde(default)]
    pub max_parallel: Option<i64>,
    #[serde(default)]
    pub uninstall_package: Option<String>,
    #[serde(default)]
    pub launch_package: Option<String>,
    #[serde(default)]
    pub auto_launch: bool,
}

impl JobRequest {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading job file: {}", path.display()))?;
        let req: JobRequest = serde_json::from_str(&raw)
            .with_context(|| format!("parsing job file: {}", path.display()))?;
        Ok(req)
    }

    pub fn validate(&self, cfg: &Config) -> Result<JobSpec, JobError> {
        let devices = self.devices.addresses();
        if devices.is_empty() {
            return Err(JobError::validation("no devices specified"));
        }

        let requested = self.max_parallel.unwrap_or(cfg.run.default_max_parallel);
        if requested <= 0 {
            return Err(JobError::validation(format!(
                "max_parallel must be positive, got {requested}"
            )));
        }

        if !self.bridge_path.is_file() {
            return Err(JobError::validation(format!(
                "bridge executable not found: {}",
                self.bridge_path.display()
            )));
        }

        let package_bytes = match std::fs::metadata(&self.package_path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return Err(JobError::validation(format!(
                    "package file not found: {}",
                    self.package_path.display()
                )));
            }
        };

        let mut concurrency = usize::try_from(requested).unwrap_or(usize::MAX);
        if cfg.run.max_parallel_cap > 0 {
            concurrency = concurrency.min(cfg.run.max_parallel_cap);
        }
        concurrency = concurrency.min(devices.len());

        let launch_package = if self.auto_launch {
            non_blank(self.launch_package.as_deref())
        } else {
            None
        };

        Ok(JobSpec {
            bridge_path: self.bridge_path.clone(),
            package_path: self.package_path.clone(),
            package_bytes,
            devices,
            uninstall_package: non_blank(self.uninstall_package.as_deref()),
            launch_package,
            concurrency,
        })
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

/// Validated, immutable description of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub bridge_path: PathBuf,
    pub package_path: PathBuf,
    pub package_bytes: u64,
    pub devices: Vec<DeviceAddress>,
    pub uninstall_package: Option<String>,
    pub launch_package: Option<String>,
    /// Already clamped to `1..=devices.len()`.
    pub concurrency: usize,
}

impl JobSpec {
    /// The ordered steps every device pipeline will attempt.
    pub fn configured_steps(&self) -> Vec<StepName> {
        let mut steps = vec![StepName::Connect];
        if self.uninstall_package.is_some() {
            steps.push(StepName::Uninstall);
        }
        steps.push(StepName::Install);
        if self.launch_package.is_some() {
            steps.push(StepName::Launch);
        }
        steps
    }

    pub fn is_configured(&self, step: StepName) -> bool {
        match step {
            StepName::Connect | StepName::Install => true,
            StepName::Uninstall => self.uninstall_package.is_some(),
            StepName::Launch => self.launch_package.is_some(),
        }
    }
}
