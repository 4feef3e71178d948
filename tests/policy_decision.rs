use fleet_install::{
    config::{Config, Timeouts},
    executor::{Invocation, StepName},
    policy::{OutputRules, install_timeout},
};
use std::time::Duration;

fn rules() -> OutputRules {
    OutputRules::from_config(&Config::default()).unwrap()
}

fn exited(code: i32, output: &str) -> Invocation {
    Invocation::Exited {
        code: Some(code),
        output: output.into(),
    }
}

#[test]
fn connect_requires_success_marker() {
    let r = rules();
    assert!(r.judge(StepName::Connect, &exited(0, "connected to 10.0.0.2:5555\n")).ok);
    assert!(r.judge(StepName::Connect, &exited(0, "already connected to 10.0.0.2:5555\n")).ok);
    assert!(!r.judge(StepName::Connect, &exited(0, "\n")).ok);
}

#[test]
fn failure_text_overrides_zero_exit() {
    let r = rules();
    let v = r.judge(
        StepName::Connect,
        &exited(0, "failed to connect to '10.0.0.3:5555': Connection refused\n"),
    );
    assert!(!v.ok);
    assert!(v.detail.contains("Connection refused"));

    let v = r.judge(
        StepName::Install,
        &exited(0, "Performing Streamed Install\nadb: failed to install app.apk: Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]\n"),
    );
    assert!(!v.ok);
}

#[test]
fn install_needs_success_line() {
    let r = rules();
    assert!(r.judge(StepName::Install, &exited(0, "Performing Streamed Install\nSuccess\n")).ok);
    assert!(!r.judge(StepName::Install, &exited(0, "Performing Streamed Install\n")).ok);
}

#[test]
fn nonzero_exit_fails() {
    let v = rules().judge(StepName::Launch, &exited(255, "oops"));
    assert!(!v.ok);
    assert!(v.detail.contains("exit code 255"));
}

#[test]
fn timeout_and_spawn_errors_fail() {
    let r = rules();
    let v = r.judge(
        StepName::Install,
        &Invocation::TimedOut {
            after: Duration::from_secs(30),
            output: String::new(),
        },
    );
    assert!(!v.ok);
    assert!(v.detail.contains("timed out after 30s"));

    let v = r.judge(StepName::Connect, &Invocation::SpawnFailed("No such file".into()));
    assert!(!v.ok);
}

#[test]
fn uninstall_of_absent_package_is_tolerated() {
    let r = rules();
    let v = r.judge(
        StepName::Uninstall,
        &exited(1, "Failure [DELETE_FAILED_INTERNAL_ERROR]\n"),
    );
    assert!(v.ok);

    let mut cfg = Config::default();
    cfg.bridge.uninstall_absent_ok = false;
    let strict = OutputRules::from_config(&cfg).unwrap();
    assert!(!strict.judge(StepName::Uninstall, &exited(1, "Failure [DELETE_FAILED_INTERNAL_ERROR]\n")).ok);
}

#[test]
fn install_timeout_scales_with_package_size() {
    let t = Timeouts::default();
    // <= 10 MiB: 180 + 120 + 50 + 120
    assert_eq!(install_timeout(&t, 5 * 1024 * 1024), Duration::from_secs(470));
    // 40 MiB: 180 + 600 + 400 + 120
    assert_eq!(install_timeout(&t, 40 * 1024 * 1024), Duration::from_secs(1300));
    // 200 MiB: 180 + 5000 + 2000 + 120
    assert_eq!(install_timeout(&t, 200 * 1024 * 1024), Duration::from_secs(7300));

    let fixed = Timeouts {
        install_seconds: 45,
        ..Timeouts::default()
    };
    assert_eq!(install_timeout(&fixed, 200 * 1024 * 1024), Duration::from_secs(45));

    let floored = Timeouts {
        install_min_seconds: 900,
        ..Timeouts::default()
    };
    assert_eq!(install_timeout(&floored, 0), Duration::from_secs(900));
}
