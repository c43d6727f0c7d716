//! pgmcp-harness - client and test harness for PostgreSQL MCP tool servers
//!
//! This library spawns an MCP tool server as a child process, speaks
//! newline-delimited JSON-RPC 2.0 with it over stdio, adapts the tools it
//! exposes (and local callables) behind one invocation interface, and runs
//! scenarios that check every administrative tool against a seeded database.
//!
//! # Architecture
//!
//! - `mcp`: wire types, line codec, request correlation, transports, the
//!   JSON-RPC client and the MCP session
//! - `tools`: the polymorphic tool adapter and registry
//! - `scenario`: database fixture, tool menu and scenario runner
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli` / `commands`: command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use pgmcp_harness::Config;
//! use pgmcp_harness::cli::ScenarioKind;
//! use pgmcp_harness::scenario::{run_scenario, ScenarioOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/harness.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let report = run_scenario(&config, &ScenarioOptions::new(ScenarioKind::Smoke)).await?;
//!     assert!(report.passed());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;
pub mod scenario;
pub mod tools;

// Re-export commonly used types
pub use config::Config;
pub use error::{HarnessError, Result};
pub use tools::{ToolRef, ToolRegistry};
