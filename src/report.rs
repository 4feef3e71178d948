use crate::{
    error::JobError,
    executor::StepName,
    job::JobSpec,
    pipeline::{DeviceRecord, DeviceStatus},
    progress::RunState,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub summary: ReportSummary,
    /// Steps every pipeline in this run was configured to attempt.
    pub steps: Vec<StepName>,
    /// One record per device, in job order.
    pub rows: Vec<DeviceRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: usize,
}

pub const CSV_HEADER: [&str; 9] = [
    "timestamp",
    "device",
    "status",
    "connect",
    "uninstall",
    "install",
    "launch",
    "total_ms",
    "details",
];

impl Report {
    pub fn build(state: &RunState, job: &JobSpec) -> Result<Self, JobError> {
        if !state.is_done() {
            return Err(JobError::state(format!(
                "report requested while run is {:?}",
                state.status
            )));
        }

        let rows = job
            .devices
            .iter()
            .map(|d| {
                state
                    .record(d)
                    .cloned()
                    .ok_or_else(|| JobError::state(format!("no record for device {d}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = ReportSummary {
            total: rows.len(),
            ..Default::default()
        };
        for r in &rows {
            match r.status {
                DeviceStatus::Success => summary.succeeded += 1,
                DeviceStatus::Failed => summary.failed += 1,
                DeviceStatus::Skipped => summary.skipped += 1,
                DeviceStatus::Aborted => summary.aborted += 1,
            }
        }

        Ok(Self {
            summary,
            steps: job.configured_steps(),
            rows,
        })
    }

    pub fn to_csv(&self) -> String {
        let mut out = CSV_HEADER.join(",");
        out.push('\n');

        for r in &self.rows {
            let mut fields = vec![
                r.started_at.clone(),
                r.device.to_string(),
                format!("{:?}", r.status).to_uppercase(),
            ];
            fields.extend(StepName::ALL.iter().map(|&s| self.step_cell(r, s).to_string()));
            fields.push(r.total.as_millis().to_string());
            fields.push(details(r));

            let line = fields
                .iter()
                .map(|f| csv_field(f))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    fn step_cell(&self, r: &DeviceRecord, step: StepName) -> &'static str {
        if !self.steps.contains(&step) {
            return "n/a";
        }
        match r.step(step) {
            Some(s) if s.success => "OK",
            Some(_) => "FAIL",
            None => "",
        }
    }
}

fn details(r: &DeviceRecord) -> String {
    if let Some(f) = r.failure() {
        return format!("{}: {}", f.step, f.diagnostic);
    }
    match r.status {
        DeviceStatus::Success => match r.step(StepName::Launch) {
            Some(_) => "installed and launched".to_string(),
            None => "installed".to_string(),
        },
        DeviceStatus::Skipped => "not dispatched: run cancelled".to_string(),
        DeviceStatus::Aborted => match r.steps.last() {
            Some(s) => format!("run cancelled after {}", s.step),
            None => "run cancelled".to_string(),
        },
        DeviceStatus::Failed => "pipeline panicked before completion".to_string(),
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
