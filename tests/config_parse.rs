use fleet_install::{config::Config, executor::BridgeExecutor};

#[test]
fn parse_example_config() {
    let raw = include_str!("../fleet-install.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert!(cfg.run.default_max_parallel >= 1);
    assert!(!cfg.output.out_dir.is_empty());
    assert_eq!(cfg.markers.failure, Config::default().markers.failure);
    assert!(BridgeExecutor::new(&cfg).is_ok());
}

#[test]
fn missing_sections_use_defaults() {
    let cfg: Config = toml::from_str("[run]\ndefault_max_parallel = 2\nmax_parallel_cap = 0\nprogress_interval_ms = 500\n")
        .expect("parse TOML");
    assert_eq!(cfg.run.default_max_parallel, 2);
    assert_eq!(cfg.timeouts.install_min_seconds, 300);
    assert!(cfg.bridge.verify_connection);
}

#[test]
fn bridge_section_fills_unlisted_keys() {
    let cfg: Config = toml::from_str("[bridge]\nconnect_retries = 2\n").expect("parse TOML");
    assert_eq!(cfg.bridge.connect_retries, 2);
    assert!(cfg.bridge.pm_uninstall_fallback);
    assert!(cfg.bridge.uninstall_absent_ok);
}

#[test]
fn invalid_marker_regex_is_rejected() {
    let mut cfg = Config::default();
    cfg.markers.failure.push("(unclosed".into());
    let err = BridgeExecutor::new(&cfg).err().expect("invalid regex must fail");
    assert!(format!("{err:#}").contains("markers.failure"));
}
