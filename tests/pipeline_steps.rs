mod common;

use common::{MockExecutor, addr, job, job_with};
use fleet_install::{
    executor::StepName,
    pipeline::{DeviceStatus, Pipeline},
    scheduler::CancelToken,
};
use std::time::Duration;

#[test]
fn connect_failure_stops_pipeline() {
    let pipeline = Pipeline::new(MockExecutor::new().failing("10.0.0.2", StepName::Connect));
    let spec = job_with(&["10.0.0.2"], 1, true, true);

    let record = pipeline.run(&addr("10.0.0.2"), &spec);

    assert_eq!(record.status, DeviceStatus::Failed);
    assert_eq!(record.steps.len(), 1);
    assert_eq!(record.steps[0].step, StepName::Connect);
    assert!(!record.steps[0].success);
    assert_eq!(pipeline.executor().calls_for("10.0.0.2"), vec![StepName::Connect]);
}

#[test]
fn successful_step_count_follows_configuration() {
    let cases = [
        (false, false, vec![StepName::Connect, StepName::Install]),
        (true, false, vec![StepName::Connect, StepName::Uninstall, StepName::Install]),
        (false, true, vec![StepName::Connect, StepName::Install, StepName::Launch]),
        (true, true, StepName::ALL.to_vec()),
    ];

    for (uninstall, launch, expected) in cases {
        let pipeline = Pipeline::new(MockExecutor::new());
        let record = pipeline.run(&addr("10.0.0.2"), &job_with(&["10.0.0.2"], 1, uninstall, launch));
        assert_eq!(record.status, DeviceStatus::Success);
        let steps: Vec<StepName> = record.steps.iter().map(|s| s.step).collect();
        assert_eq!(steps, expected);
    }
}

#[test]
fn no_step_after_failure() {
    let pipeline = Pipeline::new(MockExecutor::new().failing("d1", StepName::Uninstall));
    let record = pipeline.run(&addr("d1"), &job_with(&["d1"], 1, true, true));

    assert_eq!(record.status, DeviceStatus::Failed);
    let steps: Vec<(StepName, bool)> = record.steps.iter().map(|s| (s.step, s.success)).collect();
    assert_eq!(
        steps,
        vec![(StepName::Connect, true), (StepName::Uninstall, false)]
    );
    assert_eq!(record.failure().unwrap().step, StepName::Uninstall);
}

#[test]
fn total_is_sum_of_attempted_steps() {
    let pipeline = Pipeline::new(MockExecutor::new());
    let record = pipeline.run(&addr("d1"), &job_with(&["d1"], 1, true, false));
    // mock reports 10ms per step
    assert_eq!(record.total, Duration::from_millis(30));
}

#[test]
fn release_runs_after_success_and_failure() {
    let pipeline = Pipeline::new(MockExecutor::new().failing("bad", StepName::Install));
    let spec = job(&["ok", "bad"], 1);
    pipeline.run(&addr("ok"), &spec);
    pipeline.run(&addr("bad"), &spec);

    let released = pipeline.executor().released.lock().unwrap().clone();
    assert_eq!(released, vec!["ok".to_string(), "bad".to_string()]);
}

#[test]
fn cancellation_between_steps_aborts() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let pipeline = Pipeline::new(MockExecutor::new().on_step(move |step, _| {
        if step == StepName::Install {
            trigger.cancel();
        }
    }));

    let record = pipeline.run_cancellable(&addr("d1"), &job_with(&["d1"], 1, false, true), &cancel);

    assert_eq!(record.status, DeviceStatus::Aborted);
    let steps: Vec<StepName> = record.steps.iter().map(|s| s.step).collect();
    assert_eq!(steps, vec![StepName::Connect, StepName::Install]);
}

#[test]
fn cancelled_before_first_step_is_skipped() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let pipeline = Pipeline::new(MockExecutor::new());

    let record = pipeline.run_cancellable(&addr("d1"), &job_with(&["d1"], 1, true, true), &cancel);

    assert_eq!(record.status, DeviceStatus::Skipped);
    assert!(record.steps.is_empty());
    assert_eq!(record.total, Duration::ZERO);
    assert!(pipeline.executor().calls_for("d1").is_empty());
    assert!(pipeline.executor().released.lock().unwrap().is_empty());
}

#[test]
fn executor_panic_fails_the_running_step() {
    let pipeline = Pipeline::new(MockExecutor::new().on_step(|step, _| {
        if step == StepName::Install {
            panic!("bridge exploded");
        }
    }));

    let record = pipeline.run(&addr("d1"), &job_with(&["d1"], 1, true, true));

    assert_eq!(record.status, DeviceStatus::Failed);
    let steps: Vec<(StepName, bool)> = record.steps.iter().map(|s| (s.step, s.success)).collect();
    assert_eq!(
        steps,
        vec![
            (StepName::Connect, true),
            (StepName::Uninstall, true),
            (StepName::Install, false)
        ]
    );
    let failure = record.failure().unwrap();
    assert!(failure.diagnostic.contains("bridge exploded"), "{}", failure.diagnostic);
    assert_eq!(pipeline.executor().released.lock().unwrap().len(), 1);
}
