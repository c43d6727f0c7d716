//! pgmcp-harness - PostgreSQL MCP tool server harness
//!
#![doc = "pgmcp-harness - PostgreSQL MCP tool server harness"]
#![doc = "Main entry point for the harness CLI."]

use anyhow::Result;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use pgmcp_harness::cli::{Cli, Commands};
use pgmcp_harness::commands;
use pgmcp_harness::config::Config;
use pgmcp_harness::scenario::ScenarioOptions;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/harness.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Run {
            scenario,
            skip_fixture,
            keep_fixture,
        } => {
            tracing::info!("Starting {} scenario", scenario);
            if skip_fixture {
                tracing::debug!("Fixture management disabled");
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling scenario");
                    on_signal.cancel();
                }
            });

            let options = ScenarioOptions {
                kind: scenario,
                skip_fixture,
                keep_fixture,
                cancel,
            };
            commands::run::run_scenario_command(&config, options).await?;
            Ok(())
        }
        Commands::Call { tool, args } => {
            tracing::info!("Calling tool {}", tool);
            commands::call::call_tool(&config, &tool, args.as_deref()).await?;
            Ok(())
        }
        Commands::Tools => {
            commands::tools::list_tools(&config).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so that stdout carries only command output.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "pgmcp_harness=debug"
    } else {
        "pgmcp_harness=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
