//! Settings resolution tests
//!
//! Tests that manipulate DKF_CONFIG are marked with #[serial] so they never
//! race each other on the process environment.

use dkf_common::config::{load_settings, resolve_config_path, Settings, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn cli_argument_wins_over_environment() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(Some(std::path::Path::new("/from/cli.toml")));
    assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn environment_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(None);
    assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn load_settings_reads_named_file() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        [folders]
        year_prefix = "YR_"

        [categories]
        other_enabled = false
        "#,
    )
    .unwrap();

    let (settings, source) = load_settings(Some(&path)).unwrap();
    assert_eq!(source, Some(path));
    assert_eq!(settings.folders.year_prefix, "YR_");
    assert!(!settings.categories.other_enabled);
    assert!(settings.categories.music_enabled);
}

#[test]
#[serial]
fn missing_named_file_is_an_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    assert!(load_settings(Some(&missing)).is_err());
}

#[test]
fn defaults_round_trip_through_toml() {
    let text = toml::to_string(&Settings::default()).unwrap();
    let parsed = Settings::from_toml_str(&text).unwrap();
    assert_eq!(parsed, Settings::default());
}
