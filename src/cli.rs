//! Command-line interface definition for pgmcp-harness
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to run scenarios, call a single tool, and list tools.

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt;

/// pgmcp-harness - drive a PostgreSQL MCP tool server over stdio
///
/// Spawns the tool server, speaks newline-delimited JSON-RPC with it, and
/// checks the shape of every administrative tool against a seeded database.
#[derive(Parser, Debug, Clone)]
#[command(name = "pgmcp-harness")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/harness.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Override the tool-server command
    #[arg(long, global = true)]
    pub server_command: Option<String>,

    /// Override the tool-server arguments (repeatable)
    #[arg(long = "server-arg", global = true, allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Override the backend connection string
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Override whether the server may run write operations
    #[arg(long, global = true)]
    pub allow_write: Option<bool>,

    /// Override the per-request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for pgmcp-harness
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a test scenario against the tool server
    Run {
        /// Scenario to run
        #[arg(short, long, value_enum, default_value_t = ScenarioKind::Stdio)]
        scenario: ScenarioKind,

        /// Assume the database is already up and seeded
        #[arg(long)]
        skip_fixture: bool,

        /// Leave the database container running afterwards
        #[arg(long)]
        keep_fixture: bool,
    },

    /// Call a single tool and print its normalized result
    Call {
        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },

    /// List the tools exposed by the server
    Tools,
}

/// Which scenario `run` executes.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Fixture, handshake, the full tool menu with shape checks, teardown
    Stdio,
    /// Handshake, ping, and the tool-error check; no fixture required
    Smoke,
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Smoke => write!(f, "smoke"),
        }
    }
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/harness.yaml".to_string()),
            verbose: false,
            json_logs: false,
            server_command: None,
            server_args: Vec::new(),
            database_url: None,
            allow_write: None,
            timeout: None,
            command: Commands::Tools,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/harness.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(!cli.json_logs);
        assert!(matches!(cli.command, Commands::Tools));
    }

    #[test]
    fn test_cli_parse_run_defaults_to_stdio_scenario() {
        let cli = Cli::try_parse_from(["pgmcp-harness", "run"]).unwrap();
        if let Commands::Run {
            scenario,
            skip_fixture,
            keep_fixture,
        } = cli.command
        {
            assert_eq!(scenario, ScenarioKind::Stdio);
            assert!(!skip_fixture);
            assert!(!keep_fixture);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_run_smoke_with_flags() {
        let cli = Cli::try_parse_from([
            "pgmcp-harness",
            "run",
            "--scenario",
            "smoke",
            "--skip-fixture",
            "--keep-fixture",
        ])
        .unwrap();
        if let Commands::Run {
            scenario,
            skip_fixture,
            keep_fixture,
        } = cli.command
        {
            assert_eq!(scenario, ScenarioKind::Smoke);
            assert!(skip_fixture);
            assert!(keep_fixture);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_call_with_args() {
        let cli = Cli::try_parse_from([
            "pgmcp-harness",
            "call",
            "run_query",
            "--args",
            r#"{"sql":"select 1"}"#,
        ])
        .unwrap();
        if let Commands::Call { tool, args } = cli.command {
            assert_eq!(tool, "run_query");
            assert_eq!(args.as_deref(), Some(r#"{"sql":"select 1"}"#));
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_global_overrides_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pgmcp-harness",
            "tools",
            "--verbose",
            "--json-logs",
            "--server-command",
            "python3",
            "--server-arg",
            "server.py",
            "--server-arg",
            "--no-banner",
            "--allow-write",
            "false",
            "--timeout",
            "5",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert_eq!(cli.server_command.as_deref(), Some("python3"));
        assert_eq!(cli.server_args, vec!["server.py", "--no-banner"]);
        assert_eq!(cli.allow_write, Some(false));
        assert_eq!(cli.timeout, Some(5));
    }

    #[test]
    fn test_cli_rejects_unknown_scenario() {
        let cli = Cli::try_parse_from(["pgmcp-harness", "run", "--scenario", "http"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["pgmcp-harness"]).is_err());
    }

    #[test]
    fn test_scenario_kind_display() {
        assert_eq!(ScenarioKind::Stdio.to_string(), "stdio");
        assert_eq!(ScenarioKind::Smoke.to_string(), "smoke");
    }
}
