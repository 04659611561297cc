// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn empty_flags() -> Flags {
    Flags::default()
}

#[test]
fn defaults_apply_when_nothing_is_configured() {
    let config = BrokerConfig::resolve(empty_flags()).unwrap();
    assert_eq!(config.codex_bin, DEFAULT_CODEX_BIN);
    assert_eq!(config.bind_ip, DEFAULT_BIND_IP);
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.ts_hostname, DEFAULT_TS_HOSTNAME);
    assert!(config.ts_auth_key.is_none());
    assert!(!config.overlay_enabled());
    assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
    assert_eq!(config.hub_capacity, DEFAULT_HUB_CAPACITY);
    assert_eq!(config.idle_ttl_secs, DEFAULT_IDLE_TTL_SECS);
}

#[test]
fn resource_limits_are_independently_configurable() {
    let flags = Flags { max_sessions: Some(4), hub_capacity: Some(64), ..Flags::default() };
    let config = BrokerConfig::resolve(flags).unwrap();
    assert_eq!(config.max_sessions, 4);
    assert_eq!(config.hub_capacity, 64);
    // idle_ttl_secs untouched, still defaulted.
    assert_eq!(config.idle_ttl_secs, DEFAULT_IDLE_TTL_SECS);
}

#[test]
fn flags_take_precedence_over_file_and_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("climate.toml");
    std::fs::write(&path, "port = 9000\ncodex_bin = \"from-file\"\n").unwrap();

    let flags = Flags {
        config: Some(path),
        port: Some(5555),
        ..Flags::default()
    };
    let config = BrokerConfig::resolve(flags).unwrap();
    assert_eq!(config.port, 5555, "flag must win over file value");
    assert_eq!(config.codex_bin, "from-file", "file value used where no flag given");
}

#[test]
fn file_values_apply_when_no_flag_given_for_that_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("climate.toml");
    std::fs::write(&path, "bind_ip = \"0.0.0.0\"\nts_hostname = \"custom-host\"\n").unwrap();

    let flags = Flags { config: Some(path), ..Flags::default() };
    let config = BrokerConfig::resolve(flags).unwrap();
    assert_eq!(config.bind_ip, "0.0.0.0");
    assert_eq!(config.ts_hostname, "custom-host");
    // Fields absent from the file still fall back to built-in defaults.
    assert_eq!(config.port, DEFAULT_PORT);
}

#[test]
fn ts_auth_key_presence_enables_overlay() {
    let flags = Flags { ts_auth_key: Some("tskey-abc".to_owned()), ..Flags::default() };
    let config = BrokerConfig::resolve(flags).unwrap();
    assert!(config.overlay_enabled());
}

#[test]
fn tilde_state_dir_is_expanded_to_home() {
    let flags = Flags::default();
    let config = BrokerConfig::resolve(flags).unwrap();
    if let Some(home) = dirs::home_dir() {
        assert_eq!(config.ts_state_dir, home.join(".climate/tsnet"));
    }
}

#[test]
fn non_tilde_state_dir_passes_through_unchanged() {
    let flags = Flags { ts_state_dir: Some(PathBuf::from("/var/lib/climate")), ..Flags::default() };
    let config = BrokerConfig::resolve(flags).unwrap();
    assert_eq!(config.ts_state_dir, PathBuf::from("/var/lib/climate"));
}

#[test]
fn missing_config_file_is_an_error() {
    let flags = Flags { config: Some(PathBuf::from("/nonexistent/climate.toml")), ..Flags::default() };
    assert!(BrokerConfig::resolve(flags).is_err());
}
