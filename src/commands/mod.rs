/*!
Command handlers for the CLI

This module provides the handlers invoked by the CLI entrypoint:

- `run`   - Run a scenario and print its step summary
- `call`  - Invoke one tool through the adapter and print the result
- `tools` - List the tools the server exposes

Each handler spawns its own server session and shuts it down before
returning.
*/

use colored::Colorize;
use prettytable::{format, row, Table};

use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::scenario::{ScenarioReport, StepStatus};

/// Width at which table cells are cut.
const CELL_WIDTH: usize = 72;

// Scenario command handler
pub mod run {
    //! Scenario runner.
    //!
    //! Runs the selected scenario, prints a table of every step and a
    //! PASS/FAIL line, and fails when any step failed.

    use super::*;
    use crate::scenario::{run_scenario, ScenarioOptions};

    /// Run a scenario and report it
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `options` - Scenario selection, fixture handling and cancellation
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Assertion`] when a step failed, so the process
    /// exits non-zero.
    pub async fn run_scenario_command(config: &Config, options: ScenarioOptions) -> Result<()> {
        let report = run_scenario(config, &options).await?;
        print_report(&report);

        if report.passed() {
            Ok(())
        } else {
            let (_, failed, _) = report.counts();
            Err(HarnessError::Assertion(format!(
                "{} scenario failed: {} step(s) failed",
                report.scenario, failed
            ))
            .into())
        }
    }
}

// Single tool invocation handler
pub mod call {
    //! One-shot tool invocation.

    use super::*;
    use crate::mcp::protocol::McpSession;
    use crate::tools::{Arguments, ToolRegistry};

    /// Parse the `--args` JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the text is not a JSON object.
    pub fn parse_arguments(raw: Option<&str>) -> Result<Arguments> {
        let Some(raw) = raw else {
            return Ok(Arguments::new());
        };
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(HarnessError::Config(format!(
                "--args must be a JSON object, got {other}"
            ))
            .into()),
            Err(e) => Err(HarnessError::Config(format!("--args is not valid JSON: {e}")).into()),
        }
    }

    /// Connect, invoke `tool` with `args`, and print the normalized result
    ///
    /// # Errors
    ///
    /// Returns the tool's error, or any connection or handshake error. The
    /// session is shut down in both cases.
    pub async fn call_tool(config: &Config, tool: &str, args: Option<&str>) -> Result<()> {
        let arguments = parse_arguments(args)?;
        let session = McpSession::connect(&config.server, &config.client).await?;

        let result = async {
            let registry = ToolRegistry::from_session(&session).await?;
            registry.invoke(tool, arguments).await
        }
        .await;

        if let Err(e) = session.shutdown().await {
            tracing::warn!("Failed to shut down tool server: {}", e);
        }

        let value = result?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok(())
    }
}

// Tool listing handler
pub mod tools {
    //! Tool listing.

    use super::*;
    use crate::mcp::protocol::McpSession;
    use crate::scenario::suite::REQUIRED_TOOLS;

    /// Connect and print every advertised tool
    ///
    /// Tools the stdio scenario depends on are marked; any it expects but the
    /// server does not list are reported after the table.
    ///
    /// # Errors
    ///
    /// Returns any connection, handshake or `tools/list` error.
    pub async fn list_tools(config: &Config) -> Result<()> {
        let session = McpSession::connect(&config.server, &config.client).await?;
        let listed = session.list_tools().await;
        if let Err(e) = session.shutdown().await {
            tracing::warn!("Failed to shut down tool server: {}", e);
        }
        let mut tools = listed?;
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
        table.set_titles(row!["Tool".bold(), "Required".bold(), "Description".bold()]);
        for tool in &tools {
            let required = if REQUIRED_TOOLS.contains(&tool.name.as_str()) {
                "yes"
            } else {
                ""
            };
            table.add_row(row![
                tool.name,
                required,
                clip(tool.description.as_deref().unwrap_or(""))
            ]);
        }

        let server = session
            .initialize_response()
            .server_info
            .as_ref()
            .map(|info| format!("{} {}", info.name, info.version))
            .unwrap_or_else(|| config.server.command.clone());
        println!("\n{} tools from {}:\n", tools.len(), server);
        table.printstd();

        let missing: Vec<&str> = REQUIRED_TOOLS
            .iter()
            .copied()
            .filter(|name| !tools.iter().any(|t| t.name == *name))
            .collect();
        if !missing.is_empty() {
            println!(
                "\n{}",
                format!("Missing expected tools: {}", missing.join(", ")).yellow()
            );
        }
        println!();
        Ok(())
    }
}

/// Print a step table followed by the PASS/FAIL line.
pub fn print_report(report: &ScenarioReport) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.set_titles(row![
        "Step".bold(),
        "Status".bold(),
        "Time".bold(),
        "Detail".bold()
    ]);

    for step in &report.steps {
        let status = match step.status {
            StepStatus::Passed => "ok".green(),
            StepStatus::Failed => "FAILED".red().bold(),
            StepStatus::Skipped => "skipped".dimmed(),
        };
        table.add_row(row![
            step.name,
            status,
            format!("{}ms", step.elapsed.as_millis()),
            clip(&step.detail)
        ]);
    }

    println!("\nScenario: {}\n", report.scenario);
    table.printstd();

    let (passed, failed, skipped) = report.counts();
    let tally = format!("{passed} passed, {failed} failed, {skipped} skipped");
    if report.passed() {
        println!("\n{} {}\n", "PASS".green().bold(), tally);
    } else {
        println!("\n{} {}", "FAIL".red().bold(), tally);
        for step in report.failures() {
            println!("  {}: {}", step.name.red(), step.detail);
        }
        println!();
    }
}

/// Cut `text` to one line of at most [`CELL_WIDTH`] characters.
fn clip(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > CELL_WIDTH {
        let cut: String = line.chars().take(CELL_WIDTH - 3).collect();
        format!("{cut}...")
    } else if text.lines().nth(1).is_some() {
        format!("{line} ...")
    } else {
        line.to_string()
    }
}
