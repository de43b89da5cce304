//! Configuration file loading and environment precedence
//!
//! Tests that touch process environment variables are marked `#[serial]`.

use empire_common::config::{EmpireConfig, ENV_DATABASE_URL, ENV_PORT};
use empire_common::Error;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_from_explicit_file() {
    env::remove_var(ENV_DATABASE_URL);
    env::remove_var(ENV_PORT);

    let file = write_config(
        r#"
        database_url = "sqlite://from-file.db"
        port = 6100
        base_url = "https://empire.example"

        [engines]
        run_jobs = false
        "#,
    );

    let config = EmpireConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.database_url, "sqlite://from-file.db");
    assert_eq!(config.port, 6100);
    assert_eq!(config.base_url, "https://empire.example");
    assert!(!config.engines.run_jobs);
}

#[test]
#[serial]
fn test_environment_beats_file() {
    let file = write_config("database_url = \"sqlite://from-file.db\"\nport = 6100\n");

    env::set_var(ENV_DATABASE_URL, "sqlite::memory:");
    env::set_var(ENV_PORT, "6200");
    let config = EmpireConfig::load(Some(file.path()));
    env::remove_var(ENV_DATABASE_URL);
    env::remove_var(ENV_PORT);

    let config = config.unwrap();
    assert_eq!(config.database_url, "sqlite::memory:");
    assert_eq!(config.port, 6200);
}

#[test]
#[serial]
fn test_malformed_file_is_config_error() {
    let file = write_config("port = \"not a number\"");
    let result = EmpireConfig::load(Some(file.path()));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_missing_explicit_file_is_io_error() {
    let result = EmpireConfig::from_file(std::path::Path::new("/nonexistent/empire/config.toml"));
    assert!(matches!(result, Err(Error::Io(_))));
}
