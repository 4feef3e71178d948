use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepName {
    Connect,
    Uninstall,
    Install,
    Launch,
}

impl StepName {
    /// Pipeline order.
    pub const ALL: [StepName; 4] = [
        StepName::Connect,
        StepName::Uninstall,
        StepName::Install,
        StepName::Launch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Connect => "CONNECT",
            StepName::Uninstall => "UNINSTALL",
            StepName::Install => "INSTALL",
            StepName::Launch => "LAUNCH",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: StepName,
    pub success: bool,
    pub diagnostic: String,
    #[serde(rename = "elapsed_ms", with = "crate::util::duration_ms")]
    pub elapsed: Duration,
}

impl StepResult {
    pub fn ok(step: StepName, diagnostic: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            step,
            success: true,
            diagnostic: diagnostic.into(),
            elapsed,
        }
    }

    pub fn failed(step: StepName, diagnostic: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            step,
            success: false,
            diagnostic: diagnostic.into(),
            elapsed,
        }
    }
}

/// Raw outcome of one bridge process.
#[derive(Debug, Clone)]
pub enum Invocation {
    Exited { code: Option<i32>, output: String },
    TimedOut { after: Duration, output: String },
    SpawnFailed(String),
}

impl Invocation {
    pub fn output(&self) -> &str {
        match self {
            Invocation::Exited { output, .. } | Invocation::TimedOut { output, .. } => output,
            Invocation::SpawnFailed(_) => "",
        }
    }

    pub fn exited_zero(&self) -> bool {
        matches!(self, Invocation::Exited { code: Some(0), .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeDiag {
    pub bridge: String,
    pub version: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
