use std::fs;
use std::path::PathBuf;

use pgmcp_harness::config::{Config, ServerConfig};
use tempfile::TempDir;

/// Path to the `mcp_test_server` binary built alongside the tests.
pub fn test_server_path() -> String {
    env!("CARGO_BIN_EXE_mcp_test_server").to_string()
}

/// Server config that launches the test server with a short timeout.
#[allow(dead_code)]
pub fn test_server_config() -> ServerConfig {
    ServerConfig {
        command: test_server_path(),
        args: Vec::new(),
        request_timeout_seconds: 5,
        shutdown_grace_ms: 500,
        ..ServerConfig::default()
    }
}

/// Full config pointing at the test server.
#[allow(dead_code)]
pub fn test_config() -> Config {
    Config {
        server: test_server_config(),
        ..Config::default()
    }
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("harness.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
