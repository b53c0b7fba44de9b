use shared_utils::config::{ConfigError, WardenConfig};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_valid_config() {
    let mut file = NamedTempFile::new().unwrap();

    let config_str = r#"
        log_level = "debug"

        [wireguard]
        conf_path = "/etc/wireguard"
        command_timeout_secs = 5

        [store]
        database_url = "sqlite::memory:"

        [engine]
        scan_interval_secs = 30

        [peer_defaults]
        dns = "1.1.1.1, 8.8.8.8"
        endpoint_allowed_ip = "0.0.0.0/0"
        mtu = 1380
        keepalive = 25
    "#;

    file.write_all(config_str.as_bytes()).unwrap();

    let config = WardenConfig::load(file.path()).unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.wireguard.conf_path, "/etc/wireguard");
    assert_eq!(config.wireguard.command_timeout_secs, 5);
    assert_eq!(config.store.database_url, "sqlite::memory:");
    assert_eq!(config.engine.scan_interval_secs, 30);
    assert_eq!(config.peer_defaults.dns, "1.1.1.1, 8.8.8.8");
    assert_eq!(config.peer_defaults.mtu, 1380);
    assert_eq!(config.peer_defaults.keepalive, 25);
}

#[test]
fn test_defaults_fill_missing_sections() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"log_level = \"info\"\n").unwrap();

    let config = WardenConfig::load(file.path()).unwrap();

    assert_eq!(config.wireguard.conf_path, "/etc/wireguard");
    assert_eq!(config.engine.scan_interval_secs, 10);
    assert_eq!(config.peer_defaults.endpoint_allowed_ip, "0.0.0.0/0");
    assert_eq!(config.peer_defaults.mtu, 1420);
}

#[test]
fn test_invalid_scan_interval_rejected() {
    let mut file = NamedTempFile::new().unwrap();

    let config_str = r#"
        [engine]
        scan_interval_secs = 0
    "#;
    file.write_all(config_str.as_bytes()).unwrap();

    let err = WardenConfig::load(file.path()).unwrap_err();
    match err {
        ConfigError::InvalidValue { key, .. } => {
            assert_eq!(key, "engine.scan_interval_secs");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_missing_file() {
    let err = WardenConfig::load("/nonexistent/wgwarden.toml").unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

#[test]
fn test_save_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wgwarden.toml");

    let config = WardenConfig::new();
    config.save(&path).unwrap();

    let loaded = WardenConfig::load(&path).unwrap();
    assert_eq!(loaded.log_level, config.log_level);
    assert_eq!(loaded.peer_defaults.dns, config.peer_defaults.dns);
}
