// anvil-config/tests/load_validation.rs
// ============================================================================
// Module: Config Load Validation Tests
// Description: Tests for TOML loading, defaults, and limit enforcement.
// ============================================================================
//! ## Overview
//! Named config files must parse and validate; defaults must validate on
//! their own; every limit fails closed.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic config fixtures.")]

use std::io::Write;

use anvil_config::AnvilConfig;
use anvil_config::ConfigError;
use anvil_config::StoreBackend;
use tempfile::TempDir;

/// Writes a config file and loads it.
fn load(toml_text: &str) -> Result<AnvilConfig, ConfigError> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("anvil.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(toml_text.as_bytes()).unwrap();
    AnvilConfig::load(Some(&path))
}

#[test]
fn test_defaults_validate() {
    let config = AnvilConfig::default();
    config.validate().unwrap();
    assert!(matches!(config.store, StoreBackend::Memory));
    assert_eq!(config.base_url(), format!("http://{}", config.server.bind_addr));
}

#[test]
fn test_full_config_round_trips() {
    let config = load(
        r#"
        repo_store_root = "/var/lib/anvil/repo"
        templates_root = "/etc/anvil/templates"

        [server]
        bind_addr = "0.0.0.0:8150"
        base_url = "http://anvil.example.com/"
        max_body_bytes = 65536

        [store]
        backend = "sqlite"
        path = "/var/lib/anvil/anvil.db"
        busy_timeout_ms = 2000

        [microkernel]
        kernel_args = "console=ttyS0"
        nic_max = 8

        [loader]
        poll_interval_ms = 1000
        "#,
    )
    .unwrap();
    assert!(matches!(config.store, StoreBackend::Sqlite(_)));
    assert_eq!(config.microkernel.nic_max, 8);
    // Trailing slash is stripped from the advertised base URL.
    assert_eq!(config.base_url(), "http://anvil.example.com");
}

#[test]
fn test_named_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = AnvilConfig::load(Some(&dir.path().join("missing.toml")));
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn test_unknown_keys_fail_closed() {
    let result = load("unknown_knob = true\n");
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

#[test]
fn test_nic_max_limits_are_enforced() {
    let result = load("[microkernel]\nnic_max = 0\n");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
    let result = load("[microkernel]\nnic_max = 64\n");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_base_url_scheme_is_required() {
    let result = load("[server]\nbase_url = \"ftp://anvil\"\n");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_loader_poll_interval_limits() {
    let result = load("[loader]\npoll_interval_ms = 5\n");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
