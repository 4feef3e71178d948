use crate::{
    config::{Config, Timeouts},
    executor::{Invocation, StepName},
};
use anyhow::{Context, Result};
use regex::Regex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub ok: bool,
    pub detail: String,
}

impl Verdict {
    fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Compiled output markers deciding whether a bridge call succeeded.
///
/// Bridges routinely exit 0 while printing a failure, so the exit code is
/// necessary but not sufficient.
#[derive(Debug, Clone)]
pub struct OutputRules {
    failure: Vec<Regex>,
    connect_success: Vec<Regex>,
    install_success: Vec<Regex>,
    uninstall_absent: Vec<Regex>,
    uninstall_absent_ok: bool,
}

impl OutputRules {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self {
            failure: compile("markers.failure", &cfg.markers.failure)?,
            connect_success: compile("markers.connect_success", &cfg.markers.connect_success)?,
            install_success: compile("markers.install_success", &cfg.markers.install_success)?,
            uninstall_absent: compile("markers.uninstall_absent", &cfg.markers.uninstall_absent)?,
            uninstall_absent_ok: cfg.bridge.uninstall_absent_ok,
        })
    }

    pub fn judge(&self, step: StepName, inv: &Invocation) -> Verdict {
        let (code, output) = match inv {
            Invocation::SpawnFailed(err) => {
                return Verdict::fail(format!("failed to run bridge: {err}"));
            }
            Invocation::TimedOut { after, output } => {
                return Verdict::fail(format!(
                    "timed out after {}s: {}",
                    after.as_secs(),
                    output.trim()
                ));
            }
            Invocation::Exited { code, output } => (*code, output.as_str()),
        };

        if step == StepName::Uninstall
            && self.uninstall_absent_ok
            && self.uninstall_absent.iter().any(|r| r.is_match(output))
        {
            return Verdict::ok(format!("package not installed: {}", output.trim()));
        }

        if code != Some(0) {
            let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Verdict::fail(format!("exit code {code}: {}", output.trim()));
        }

        if let Some(m) = self.failure.iter().find_map(|r| r.find(output)) {
            return Verdict::fail(format!(
                "failure marker `{}`: {}",
                m.as_str(),
                output.trim()
            ));
        }

        let required = match step {
            StepName::Connect => &self.connect_success,
            StepName::Install => &self.install_success,
            StepName::Uninstall | StepName::Launch => return Verdict::ok(output.trim()),
        };
        if !required.is_empty() && !required.iter().any(|r| r.is_match(output)) {
            return Verdict::fail(format!("no success marker in output: {}", output.trim()));
        }

        Verdict::ok(output.trim())
    }
}

fn compile(key: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("invalid regex in {key}: {p}")))
        .collect()
}

/// Install timeout: fixed when configured, otherwise scaled to the package size.
pub fn install_timeout(t: &Timeouts, package_bytes: u64) -> Duration {
    if t.install_seconds > 0 {
        return Duration::from_secs(t.install_seconds);
    }

    let mib = package_bytes as f64 / (1024.0 * 1024.0);
    let base = 180.0;
    let size_term = if mib <= 10.0 {
        120.0
    } else if mib <= 50.0 {
        mib * 15.0
    } else if mib <= 100.0 {
        mib * 20.0
    } else {
        mib * 25.0
    };
    let network = mib * 10.0;
    let device = 120.0;

    let secs = (base + size_term + network + device) as u64;
    Duration::from_secs(secs.max(t.install_min_seconds))
}
