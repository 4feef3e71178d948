mod common;

use common::{MockExecutor, addr, job_with};
use fleet_install::{
    executor::StepName,
    pipeline::{DeviceRecord, DeviceStatus},
    progress::Progress,
    report::{CSV_HEADER, Report},
    scheduler::{CancelToken, Scheduler},
    util::write_file,
};

#[test]
fn csv_has_header_and_one_row_per_device() {
    let scheduler = Scheduler::new(
        MockExecutor::new().failing("10.0.0.3:5555", StepName::Install),
    );
    let spec = job_with(&["10.0.0.2", "10.0.0.3:5555", "10.0.0.4"], 2, false, true);
    let progress = Progress::new();
    scheduler
        .run_all(&spec, &progress, &CancelToken::new())
        .unwrap();
    let report = Report::build(&progress.state(), &spec).unwrap();

    let csv = report.to_csv();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], CSV_HEADER.join(","));

    let cols: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(cols[1], "10.0.0.2");
    assert_eq!(cols[2], "SUCCESS");
    assert_eq!(&cols[3..7], &["OK", "n/a", "OK", "OK"]);
    assert_eq!(cols[7], "30");
    assert_eq!(cols[8], "installed and launched");

    let cols: Vec<&str> = lines[2].split(',').collect();
    assert_eq!(cols[1], "10.0.0.3:5555");
    assert_eq!(cols[2], "FAILED");
    // launch configured but never attempted
    assert_eq!(&cols[3..7], &["OK", "n/a", "FAIL", ""]);
    assert!(cols[8].starts_with("INSTALL: "));
}

#[test]
fn json_report_carries_step_timings() {
    let scheduler = Scheduler::new(MockExecutor::new());
    let spec = job_with(&["d1"], 1, true, false);
    let progress = Progress::new();
    scheduler
        .run_all(&spec, &progress, &CancelToken::new())
        .unwrap();
    let report = Report::build(&progress.state(), &spec).unwrap();

    let v = serde_json::to_value(&report).unwrap();
    assert_eq!(v["summary"]["succeeded"], 1);
    assert_eq!(v["steps"][1], "UNINSTALL");
    assert_eq!(v["rows"][0]["status"], "SUCCESS");
    assert_eq!(v["rows"][0]["total_ms"], 30);
    assert_eq!(v["rows"][0]["steps"][0]["elapsed_ms"], 10);
}

#[test]
fn failed_record_without_steps_gets_neutral_details() {
    let spec = job_with(&["d0"], 1, false, false);
    let progress = Progress::new();
    progress.begin(&spec).unwrap();
    let mut record = DeviceRecord::skipped(&addr("d0"));
    record.status = DeviceStatus::Failed;
    progress.record(record);
    progress.finish();

    let report = Report::build(&progress.state(), &spec).unwrap();
    let csv = report.to_csv();
    let cols: Vec<&str> = csv.lines().nth(1).unwrap().split(',').collect();
    assert_eq!(cols[2], "FAILED");
    assert_eq!(&cols[3..7], &["", "n/a", "", "n/a"]);
    assert_eq!(cols[8], "pipeline panicked before completion");
}

#[test]
fn output_write_errors_name_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let ok = dir.path().join("report.csv");
    write_file(&ok, "a,b\n").unwrap();
    assert_eq!(std::fs::read_to_string(&ok).unwrap(), "a,b\n");

    let missing = dir.path().join("no-such-dir").join("report.json");
    let err = write_file(&missing, "{}").unwrap_err();
    assert!(
        format!("{err:#}").contains(&missing.display().to_string()),
        "{err:#}"
    );
}
