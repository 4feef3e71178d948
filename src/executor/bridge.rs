use super::{Executor, types::*};
use crate::{
    config::Config,
    job::{DeviceAddress, JobSpec},
    policy::{self, OutputRules, Verdict},
    util::condense_output,
};
use anyhow::{Context, Result, anyhow};
use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Executes steps by shelling out to an adb-compatible bridge.
pub struct BridgeExecutor {
    cfg: Config,
    rules: OutputRules,
}

impl BridgeExecutor {
    pub fn new(cfg: &Config) -> Result<Self> {
        let rules = OutputRules::from_config(cfg)?;
        Ok(Self {
            cfg: cfg.clone(),
            rules,
        })
    }

    /// Run the bridge once. Never fails; spawn errors become [`Invocation::SpawnFailed`].
    pub fn invoke<I, S>(&self, bridge: &Path, args: I, timeout: Duration) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(bridge);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so a timeout can take down helpers the bridge forked.
            cmd.process_group(0);
        }
        debug!("bridge run {:?} timeout={:?}", cmd, timeout);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return Invocation::SpawnFailed(format!("spawning {}: {err}", bridge.display()));
            }
        };

        match wait_with_timeout(&mut child, timeout) {
            Ok(done) => {
                let mut output = String::from_utf8_lossy(&done.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&done.stderr));
                match done.status {
                    Some(status) => Invocation::Exited {
                        code: status.code(),
                        output,
                    },
                    None => Invocation::TimedOut {
                        after: timeout,
                        output,
                    },
                }
            }
            Err(err) => Invocation::SpawnFailed(format!("{err:#}")),
        }
    }

    fn serial_args<'a>(device: &'a DeviceAddress, rest: &[&'a OsStr]) -> Vec<&'a OsStr> {
        let mut args: Vec<&OsStr> = vec![OsStr::new("-s"), OsStr::new(device.as_str())];
        args.extend_from_slice(rest);
        args
    }

    fn condense(&self, text: &str) -> String {
        condense_output(text, self.cfg.diagnostics.max_chars)
    }

    /// Connect (with optional retries and shell verification).
    pub fn connect(&self, bridge: &Path, device: &DeviceAddress) -> Verdict {
        let t = &self.cfg.timeouts;
        let attempts = self.cfg.bridge.connect_retries + 1;
        let mut last = Verdict {
            ok: false,
            detail: "connect not attempted".into(),
        };

        for attempt in 1..=attempts {
            if attempt > 1 {
                std::thread::sleep(Duration::from_millis(self.cfg.bridge.retry_delay_ms));
                let _ = self.invoke(
                    bridge,
                    ["disconnect", device.as_str()],
                    Duration::from_secs(t.release_seconds),
                );
                debug!("connect retry {attempt}/{attempts} for {device}");
            }

            let inv = self.invoke(
                bridge,
                ["connect", device.as_str()],
                Duration::from_secs(t.connect_seconds),
            );
            last = self.rules.judge(StepName::Connect, &inv);
            if !last.ok {
                continue;
            }

            if !self.cfg.bridge.verify_connection {
                return last;
            }

            let token = self.cfg.bridge.verify_token.as_str();
            let check = self.invoke(
                bridge,
                ["-s", device.as_str(), "shell", "echo", token],
                Duration::from_secs(t.verify_seconds),
            );
            if check.exited_zero() && check.output().contains(token) {
                return last;
            }
            last = Verdict {
                ok: false,
                detail: format!(
                    "connected but shell verification failed: {}",
                    check.output().trim()
                ),
            };
        }

        if attempts > 1 {
            last.detail = format!("after {attempts} attempts: {}", last.detail);
        }
        last
    }

    fn uninstall(&self, bridge: &Path, device: &DeviceAddress, package: &str) -> Verdict {
        let timeout = Duration::from_secs(self.cfg.timeouts.uninstall_seconds);
        let args = Self::serial_args(device, &[OsStr::new("uninstall"), OsStr::new(package)]);
        let first = self.rules.judge(StepName::Uninstall, &self.invoke(bridge, args, timeout));
        if first.ok || !self.cfg.bridge.pm_uninstall_fallback {
            return first;
        }

        // Packages installed for another user only go away through pm.
        debug!("uninstall {package} on {device} failed, retrying with pm --user 0");
        let inv = self.invoke(
            bridge,
            ["-s", device.as_str(), "shell", "pm", "uninstall", "--user", "0", package],
            timeout,
        );
        let fallback = self.rules.judge(StepName::Uninstall, &inv);
        Verdict {
            ok: fallback.ok,
            detail: if fallback.ok {
                format!("pm uninstall --user 0: {}", fallback.detail)
            } else {
                format!("{}; pm uninstall --user 0: {}", first.detail, fallback.detail)
            },
        }
    }

    fn install(&self, device: &DeviceAddress, job: &JobSpec) -> Verdict {
        let timeout = policy::install_timeout(&self.cfg.timeouts, job.package_bytes);
        debug!(
            "install on {device}: package_bytes={} timeout={:?}",
            job.package_bytes, timeout
        );
        let args = Self::serial_args(
            device,
            &[
                OsStr::new("install"),
                OsStr::new("-r"),
                OsStr::new("-d"),
                job.package_path.as_os_str(),
            ],
        );
        let inv = self.invoke(&job.bridge_path, args, timeout);
        self.rules.judge(StepName::Install, &inv)
    }

    fn launch(&self, bridge: &Path, device: &DeviceAddress, package: &str) -> Verdict {
        let launch = &self.cfg.launch;
        let timeout = Duration::from_secs(self.cfg.timeouts.launch_seconds);
        if launch.settle_ms > 0 {
            std::thread::sleep(Duration::from_millis(launch.settle_ms));
        }

        let mut failures = Vec::new();
        for activity in &launch.activities {
            let component = format!("{package}/{activity}");
            let inv = self.invoke(
                bridge,
                ["-s", device.as_str(), "shell", "am", "start", "-n", component.as_str()],
                timeout,
            );
            let verdict = self.rules.judge(StepName::Launch, &inv);
            if verdict.ok {
                return Verdict {
                    ok: true,
                    detail: format!("launched {component}"),
                };
            }
            failures.push(format!("{component}: {}", verdict.detail));
        }

        if launch.monkey_fallback {
            let inv = self.invoke(
                bridge,
                [
                    "-s",
                    device.as_str(),
                    "shell",
                    "monkey",
                    "-p",
                    package,
                    "-c",
                    "android.intent.category.LAUNCHER",
                    "1",
                ],
                timeout,
            );
            let verdict = self.rules.judge(StepName::Launch, &inv);
            if verdict.ok {
                return Verdict {
                    ok: true,
                    detail: format!("launched {package} via monkey"),
                };
            }
            failures.push(format!("monkey: {}", verdict.detail));
        }

        if failures.is_empty() {
            failures.push("no launch strategy configured".into());
        }
        Verdict {
            ok: false,
            detail: failures.join("; "),
        }
    }

    pub fn disconnect(&self, bridge: &Path, device: &DeviceAddress) -> Invocation {
        self.invoke(
            bridge,
            ["disconnect", device.as_str()],
            Duration::from_secs(self.cfg.timeouts.release_seconds),
        )
    }

    /// `getprop <key>` on a connected device.
    pub fn getprop(&self, bridge: &Path, device: &DeviceAddress, key: &str) -> Option<String> {
        let inv = self.invoke(
            bridge,
            ["-s", device.as_str(), "shell", "getprop", key],
            Duration::from_secs(self.cfg.timeouts.verify_seconds),
        );
        let value = inv.output().trim();
        (inv.exited_zero() && !value.is_empty()).then(|| value.to_string())
    }

    pub fn doctor(&self, bridge: &Path) -> BridgeDiag {
        let inv = self.invoke(
            bridge,
            ["version"],
            Duration::from_secs(self.cfg.timeouts.connect_seconds),
        );
        let bridge = bridge.display().to_string();
        match &inv {
            Invocation::Exited { code: Some(0), output } => BridgeDiag {
                bridge,
                version: output.lines().next().map(|l| l.trim().to_string()),
                ok: true,
                error: None,
            },
            _ => BridgeDiag {
                bridge,
                version: None,
                ok: false,
                error: Some(self.condense(&self.rules.judge(StepName::Connect, &inv).detail)),
            },
        }
    }
}

impl Executor for BridgeExecutor {
    fn execute(&self, step: StepName, device: &DeviceAddress, job: &JobSpec) -> StepResult {
        let started = Instant::now();
        let bridge = job.bridge_path.as_path();

        let verdict = match step {
            StepName::Connect => self.connect(bridge, device),
            StepName::Uninstall => match job.uninstall_package.as_deref() {
                Some(pkg) => self.uninstall(bridge, device, pkg),
                None => Verdict {
                    ok: false,
                    detail: "no uninstall package configured".into(),
                },
            },
            StepName::Install => self.install(device, job),
            StepName::Launch => match job.launch_package.as_deref() {
                Some(pkg) => self.launch(bridge, device, pkg),
                None => Verdict {
                    ok: false,
                    detail: "no launch package configured".into(),
                },
            },
        };

        let elapsed = started.elapsed();
        let diagnostic = self.condense(&verdict.detail);
        if verdict.ok {
            StepResult::ok(step, diagnostic, elapsed)
        } else {
            warn!("{step} failed on {device}: {diagnostic}");
            StepResult::failed(step, diagnostic, elapsed)
        }
    }

    fn release(&self, device: &DeviceAddress, job: &JobSpec) {
        if !self.cfg.bridge.disconnect_after {
            return;
        }
        let inv = self.disconnect(&job.bridge_path, device);
        if !inv.exited_zero() {
            debug!("disconnect {device}: {}", inv.output().trim());
        }
    }
}

struct Finished {
    /// `None` when the process was killed on timeout.
    status: Option<ExitStatus>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// How long to keep collecting output once the step deadline has passed.
const READER_GRACE: Duration = Duration::from_millis(500);

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Finished> {
    // Drain pipes while waiting so a chatty bridge can't deadlock on a full
    // stdout/stderr buffer.
    let stdout_rx = spawn_reader(child.stdout.take(), "stdout");
    let stderr_rx = spawn_reader(child.stderr.take(), "stderr");

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            break Some(status);
        }

        if start.elapsed() > timeout {
            warn!("bridge process timed out after {:?}", timeout);
            kill_tree(child);
            child.wait().with_context(|| "wait after kill")?;
            break None;
        }

        std::thread::sleep(Duration::from_millis(25));
    };

    // A grandchild may still hold the pipes open; never wait on it past the deadline.
    let deadline = (start + timeout).max(Instant::now()) + READER_GRACE;
    let stdout = collect_reader(&stdout_rx, deadline, "stdout")?;
    let stderr = collect_reader(&stderr_rx, deadline, "stderr")?;

    Ok(Finished {
        status,
        stdout,
        stderr,
    })
}

fn spawn_reader<R>(reader: Option<R>, name: &'static str) -> mpsc::Receiver<Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let read = match reader {
            Some(mut r) => r
                .read_to_end(&mut buf)
                .map(|_| ())
                .with_context(|| format!("read {name}")),
            None => Ok(()),
        };
        let _ = tx.send(read.map(|_| buf));
    });
    rx
}

fn collect_reader(
    rx: &mpsc::Receiver<Result<Vec<u8>>>,
    deadline: Instant,
    name: &str,
) -> Result<Vec<u8>> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(read) => read,
        Err(RecvTimeoutError::Timeout) => {
            warn!("{name} still open after the bridge exited; dropping its output");
            Ok(Vec::new())
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{name} reader thread panicked")),
    }
}

/// Kill the bridge and anything it spawned into its process group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
        .args(["-KILL", "--", group.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if !matches!(killed, Ok(status) if status.success()) {
        debug!("process group kill {group} failed: {killed:?}");
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}
