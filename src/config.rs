use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: Bridge,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub launch: Launch,
    #[serde(default)]
    pub markers: Markers,
    #[serde(default)]
    pub run: Run,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub diagnostics: Diagnostics,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Bridge {
    /// Follow `connect` with a `shell echo` round trip before declaring CONNECT ok.
    pub verify_connection: bool,
    pub verify_token: String,
    /// Extra connect attempts inside the CONNECT step. Zero means a single attempt.
    pub connect_retries: u32,
    pub retry_delay_ms: u64,
    pub disconnect_after: bool,
    /// Treat "package not installed" uninstall output as success.
    pub uninstall_absent_ok: bool,
    /// Follow a failed `uninstall` with `shell pm uninstall --user 0`.
    pub pm_uninstall_fallback: bool,
}
impl Default for Bridge {
    fn default() -> Self {
        Self {
            verify_connection: true,
            verify_token: "fleet_install_ok".into(),
            connect_retries: 0,
            retry_delay_ms: 2000,
            disconnect_after: true,
            uninstall_absent_ok: true,
            pm_uninstall_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    pub connect_seconds: u64,
    pub verify_seconds: u64,
    pub uninstall_seconds: u64,
    /// 0 = derive from package size.
    pub install_seconds: u64,
    pub install_min_seconds: u64,
    pub launch_seconds: u64,
    pub release_seconds: u64,
}
impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_seconds: 15,
            verify_seconds: 8,
            uninstall_seconds: 60,
            install_seconds: 0,
            install_min_seconds: 300,
            launch_seconds: 15,
            release_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Launch {
    pub activities: Vec<String>,
    pub monkey_fallback: bool,
    pub settle_ms: u64,
}
impl Default for Launch {
    fn default() -> Self {
        Self {
            activities: vec![".MainActivity".into(), ".LauncherActivity".into()],
            monkey_fallback: true,
            settle_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Markers {
    /// Any match fails the step even when the bridge exits 0.
    pub failure: Vec<String>,
    pub connect_success: Vec<String>,
    pub install_success: Vec<String>,
    pub uninstall_absent: Vec<String>,
}
impl Default for Markers {
    fn default() -> Self {
        Self {
            failure: vec![
                "(?i)\\berror\\b".into(),
                "(?i)failure".into(),
                "(?i)\\bfailed\\b".into(),
                "(?i)unable to".into(),
                "(?i)cannot ".into(),
                "(?i)monkey aborted".into(),
                "(?i)device .* not found".into(),
            ],
            connect_success: vec!["(?i)\\bconnected to\\b".into()],
            install_success: vec!["(?m)^\\s*Success\\s*$".into()],
            uninstall_absent: vec![
                "(?i)unknown package".into(),
                "(?i)not installed".into(),
                "DELETE_FAILED_INTERNAL_ERROR".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub default_max_parallel: i64,
    /// Upper bound applied to any requested concurrency. 0 disables the cap.
    pub max_parallel_cap: usize,
    pub progress_interval_ms: u64,
}
impl Default for Run {
    fn default() -> Self {
        Self {
            default_max_parallel: 4,
            max_parallel_cap: 6,
            progress_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub out_dir: String,
    pub write_csv: bool,
    pub write_report_json: bool,
    pub write_index_json: bool,
    pub csv_filename: String,
    pub report_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            write_csv: true,
            write_report_json: true,
            write_index_json: true,
            csv_filename: "report.csv".into(),
            report_filename: "report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub max_chars: usize,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self { max_chars: 400 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}
