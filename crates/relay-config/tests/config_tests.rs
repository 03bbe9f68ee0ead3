//! Configuration loading and precedence tests

use pretty_assertions::assert_eq;
use relay_config::{ConfigError, ConfigLoader, RelayConfig, ReleasePolicy};
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

// ============================================================================
// Loading
// ============================================================================

#[test]
#[serial]
fn test_project_config_found_in_parent() {
    let temp_dir = TempDir::new().unwrap();
    write_file(
        &temp_dir.path().join("relay.toml"),
        "[callbacks]\nsweep_interval = 5\n",
    );
    let nested = temp_dir.path().join("a").join("b");
    fs::create_dir_all(&nested).unwrap();

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(&nested).unwrap();

    assert_eq!(config.sweep_interval(), 5);
    assert_eq!(config.project_root(), Some(temp_dir.path()));
}

#[test]
#[serial]
fn test_project_overrides_global() {
    let temp_dir = TempDir::new().unwrap();
    let global = temp_dir.path().join("home").join("config.toml");
    write_file(
        &global,
        r#"
[callbacks]
release_policy = "release"
sweep_interval = 3

[logging]
filter = "debug"
"#,
    );
    let project_dir = temp_dir.path().join("project");
    write_file(
        &project_dir.join("relay.toml"),
        "[callbacks]\nrelease_policy = \"retain\"\n",
    );

    let mut loader = ConfigLoader::with_global_path(global);
    let config = loader.load_from_directory(&project_dir).unwrap();

    assert_eq!(config.release_policy(), ReleasePolicy::Retain);
    assert_eq!(config.sweep_interval(), 3);
    assert_eq!(config.log_filter(), "debug");
}

#[test]
#[serial]
fn test_env_log_filter_wins() {
    let temp_dir = TempDir::new().unwrap();
    write_file(
        &temp_dir.path().join("relay.toml"),
        "[logging]\nfilter = \"info\"\n",
    );

    env::set_var("RELAY_LOG", "relay_runtime=trace");
    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(temp_dir.path());
    env::remove_var("RELAY_LOG");

    assert_eq!(config.unwrap().log_filter(), "relay_runtime=trace");
}

#[test]
#[serial]
fn test_load_from_specific_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("custom.toml");
    write_file(&path, "[callbacks]\nrelease_policy = \"release\"\n");

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_file(&path).unwrap();

    assert_eq!(config.release_policy(), ReleasePolicy::Release);
    assert_eq!(config.project_root(), Some(temp_dir.path()));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_missing_file_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let result = RelayConfig::load_from_file(&temp_dir.path().join("nope.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[rstest]
#[case("[callbacks]\nunknown = 1\n")]
#[case("[tracing]\nfilter = \"x\"\n")]
#[case("[callbacks\n")]
fn test_malformed_files_are_parse_errors(#[case] content: &str) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("relay.toml");
    write_file(&path, content);

    let result = RelayConfig::load_from_file(&path);
    assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
}

#[rstest]
#[case("[callbacks]\nsweep_interval = 0\n")]
#[case("[logging]\nfilter = \"  \"\n")]
fn test_out_of_range_values_rejected(#[case] content: &str) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("relay.toml");
    write_file(&path, content);

    let result = RelayConfig::load_from_file(&path);
    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
}

#[test]
fn test_serialized_config_snapshot() {
    let config: RelayConfig =
        toml::from_str("[callbacks]\nrelease_policy = \"release\"\nsweep_interval = 8\n").unwrap();
    insta::assert_snapshot!(toml::to_string(&config).unwrap(), @r###"
    [callbacks]
    release_policy = "release"
    sweep_interval = 8
    "###);
}
