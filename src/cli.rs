use crate::{
    config::Config,
    executor::BridgeExecutor,
    job::{DeviceAddress, DeviceList, JobRequest, JobSpec},
    probe::probe_devices,
    progress::Progress,
    report::Report,
    scheduler::Scheduler,
    util::{ensure_dir, hash_file, now_rfc3339, sha256_hex, write_file},
};
use anyhow::{Context, Result, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fleet-install")]
#[command(about = "Install a package on many networked devices in parallel via an adb-style bridge")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./fleet-install.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the bridge executable runs.
    Doctor {
        #[arg(long)]
        bridge: PathBuf,
    },
    /// Connect to each device and report model / OS version.
    Probe {
        #[arg(long)]
        bridge: PathBuf,
        #[command(flatten)]
        devices: DeviceArgs,
        #[arg(long)]
        max_parallel: Option<usize>,
    },
    /// Install the package on every device.
    Run {
        /// JSON job file; flags below override its fields.
        #[arg(long)]
        job: Option<PathBuf>,
        #[arg(long)]
        bridge: Option<PathBuf>,
        #[arg(long)]
        package: Option<PathBuf>,
        #[command(flatten)]
        devices: DeviceArgs,
        #[arg(long, allow_negative_numbers = true)]
        max_parallel: Option<i64>,
        /// Package id to uninstall before installing.
        #[arg(long)]
        uninstall: Option<String>,
        /// Package id to launch after installing (requires --auto-launch).
        #[arg(long)]
        launch: Option<String>,
        #[arg(long)]
        auto_launch: bool,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

#[derive(ClapArgs, Debug, Default)]
pub struct DeviceArgs {
    /// Device address (host or host:port). Repeatable.
    #[arg(long = "device")]
    pub device: Vec<String>,
    /// File with one device address per line.
    #[arg(long)]
    pub devices_file: Option<PathBuf>,
}

impl DeviceArgs {
    fn is_empty(&self) -> bool {
        self.device.is_empty() && self.devices_file.is_none()
    }

    fn to_list(&self) -> Result<DeviceList> {
        let mut all = self.device.clone();
        if let Some(path) = &self.devices_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading devices file: {}", path.display()))?;
            all.extend(raw.lines().map(String::from));
        }
        Ok(DeviceList::List(all))
    }
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match &args.cmd {
        Command::Doctor { bridge } => {
            let _guard = init_logging(&args, &cfg, None)?;
            doctor(&cfg, bridge)
        }
        Command::Probe {
            bridge,
            devices,
            max_parallel,
        } => {
            let _guard = init_logging(&args, &cfg, None)?;
            probe(&cfg, bridge, devices, *max_parallel)
        }
        Command::Run {
            job,
            bridge,
            package,
            devices,
            max_parallel,
            uninstall,
            launch,
            auto_launch,
            out_dir,
        } => {
            let mut req = match job {
                Some(path) => JobRequest::from_json_file(path)?,
                None => JobRequest::default(),
            };
            if let Some(b) = bridge {
                req.bridge_path = b.clone();
            }
            if let Some(p) = package {
                req.package_path = p.clone();
            }
            if !devices.is_empty() {
                req.devices = devices.to_list()?;
            }
            if max_parallel.is_some() {
                req.max_parallel = *max_parallel;
            }
            if uninstall.is_some() {
                req.uninstall_package = uninstall.clone();
            }
            if launch.is_some() {
                req.launch_package = launch.clone();
            }
            req.auto_launch |= *auto_launch;

            run(&args, &cfg, &req, out_dir.as_deref())
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("fleet-install.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config, bridge: &Path) -> Result<()> {
    let executor = BridgeExecutor::new(cfg)?;
    let diag = executor.doctor(bridge);
    println!("{}", serde_json::to_string_pretty(&diag)?);
    if !diag.ok {
        return Err(anyhow!("bridge check failed: {}", bridge.display()));
    }
    Ok(())
}

fn probe(cfg: &Config, bridge: &Path, devices: &DeviceArgs, max_parallel: Option<usize>) -> Result<()> {
    if !bridge.is_file() {
        return Err(anyhow!("bridge executable not found: {}", bridge.display()));
    }
    let addresses = devices.to_list()?.addresses();
    if addresses.is_empty() {
        return Err(anyhow!("no devices specified"));
    }

    let workers = max_parallel
        .unwrap_or(cfg.run.default_max_parallel.max(1) as usize)
        .max(1);
    let executor = BridgeExecutor::new(cfg)?;
    let results = probe_devices(&executor, bridge, &addresses, workers);

    let connected = results.iter().filter(|r| r.connected).count();
    info!("probe: {connected}/{} connected", results.len());
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn run(args: &Args, cfg: &Config, req: &JobRequest, out_override: Option<&Path>) -> Result<()> {
    let job = Arc::new(req.validate(cfg)?);

    let started = now_rfc3339();
    let package_sha256 = hash_file(&job.package_path)
        .with_context(|| format!("hashing package: {}", job.package_path.display()))?;
    let run_id = make_run_id(&started, &package_sha256, &job);

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.output.out_dir));
    let run_dir = out_root.join(&run_id);
    ensure_dir(&run_dir)?;
    ensure_dir(&run_dir.join("logs"))?;

    let log_path = resolve_log_path(cfg, &run_dir);
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!(
        "run_id={run_id} out={} devices={} concurrency={}",
        run_dir.display(),
        job.devices.len(),
        job.concurrency
    );
    if let Some(requested) = req.max_parallel {
        if requested > job.concurrency as i64 {
            warn!("max_parallel {requested} clamped to {}", job.concurrency);
        }
    }

    let scheduler = Scheduler::new(BridgeExecutor::new(cfg)?);
    let progress = Arc::new(Progress::new());
    let handle = scheduler.spawn(Arc::clone(&job), Arc::clone(&progress))?;

    let interval = Duration::from_millis(cfg.run.progress_interval_ms.max(100));
    let mut last_log = Instant::now();
    while !handle.is_finished() {
        std::thread::sleep(Duration::from_millis(100));
        if last_log.elapsed() >= interval {
            let view = handle.snapshot();
            info!(
                "progress {}/{} ({:.0}%) ok={} failed={}",
                view.completed, view.total, view.percent, view.succeeded, view.failed
            );
            last_log = Instant::now();
        }
    }

    let report = handle.wait()?;
    write_outputs(cfg, &run_dir, &run_id, &started, &package_sha256, &job, &report)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "run_id": run_id,
            "run_dir": run_dir,
            "summary": report.summary,
        }))?
    );
    Ok(())
}

fn make_run_id(started: &str, package_sha256: &str, job: &JobSpec) -> String {
    let devices = job
        .devices
        .iter()
        .map(DeviceAddress::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    let full = sha256_hex(format!("{started}:{package_sha256}:{devices}").as_bytes());
    full[..16].to_string()
}

fn write_outputs(
    cfg: &Config,
    run_dir: &Path,
    run_id: &str,
    started: &str,
    package_sha256: &str,
    job: &JobSpec,
    report: &Report,
) -> Result<()> {
    if cfg.output.write_csv {
        write_file(&run_dir.join(&cfg.output.csv_filename), report.to_csv())?;
    }

    if cfg.output.write_report_json {
        write_file(
            &run_dir.join(&cfg.output.report_filename),
            serde_json::to_string_pretty(report).with_context(|| "serializing report")?,
        )?;
    }

    if cfg.output.write_index_json {
        let index = serde_json::json!({
            "run_id": run_id,
            "started": started,
            "finished": now_rfc3339(),
            "package": {
                "path": job.package_path,
                "bytes": job.package_bytes,
                "sha256": package_sha256,
            },
            "summary": report.summary,
            "report_csv": cfg.output.csv_filename,
            "report_json": cfg.output.report_filename,
        });
        write_file(
            &run_dir.join("index.json"),
            serde_json::to_string_pretty(&index).with_context(|| "serializing index.json")?,
        )?;
    }

    Ok(())
}

fn resolve_log_path(cfg: &Config, run_dir: &Path) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    Some(run_dir.join("logs").join("fleet-install.log"))
}
