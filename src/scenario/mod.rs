//! Scenario orchestration
//!
//! A scenario strings together fixture setup, the MCP handshake, a series of
//! tool calls with shape checks, and teardown. Every step is recorded as a
//! [`StepOutcome`] so the caller can render a summary; the scenario itself
//! only fails with an error for problems outside the steps.
//!
//! - [`ScenarioKind::Stdio`]: fixture up, ready, seed; connect; check the tool
//!   list; run the tool menu; `kill_session`; shutdown; fixture down.
//! - [`ScenarioKind::Smoke`]: connect; `ping`; a failing `run_query`; a second
//!   `ping` on the same session; shutdown. Needs no fixture.

pub mod fixture;
pub mod suite;

use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::cli::ScenarioKind;
use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::mcp::protocol::McpSession;
use crate::tools::ToolRegistry;

use fixture::Fixture;

/// Result of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The step succeeded.
    Passed,
    /// The step ran and failed.
    Failed,
    /// The step did not run.
    Skipped,
}

/// One recorded step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Step or tool name.
    pub name: String,
    /// Outcome.
    pub status: StepStatus,
    /// Short summary of the result or the failure message.
    pub detail: String,
    /// Wall-clock time spent.
    pub elapsed: Duration,
    /// The failure left the session unusable.
    pub fatal: bool,
}

impl StepOutcome {
    /// A passing step.
    pub fn passed(name: &str, elapsed: Duration, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Passed,
            detail: detail.into(),
            elapsed,
            fatal: false,
        }
    }

    /// A step that ran and produced the wrong result.
    pub fn failed(name: &str, elapsed: Duration, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Failed,
            detail: detail.into(),
            elapsed,
            fatal: false,
        }
    }

    /// A step that did not run.
    pub fn skipped(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Skipped,
            detail: reason.into(),
            elapsed: Duration::ZERO,
            fatal: false,
        }
    }

    /// A step that failed with an error.
    pub fn from_error(name: &str, elapsed: Duration, err: &anyhow::Error) -> Self {
        let fatal = err
            .downcast_ref::<HarnessError>()
            .is_some_and(HarnessError::is_fatal_to_session);
        Self {
            fatal,
            ..Self::failed(name, elapsed, err.to_string())
        }
    }
}

/// Everything a scenario run recorded.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// Which scenario ran.
    pub scenario: ScenarioKind,
    /// Steps in execution order.
    pub steps: Vec<StepOutcome>,
}

impl ScenarioReport {
    fn new(scenario: ScenarioKind) -> Self {
        Self {
            scenario,
            steps: Vec::new(),
        }
    }

    fn push(&mut self, outcome: StepOutcome) {
        match outcome.status {
            StepStatus::Passed => tracing::info!("{} ok ({})", outcome.name, outcome.detail),
            StepStatus::Failed => tracing::error!("{} failed: {}", outcome.name, outcome.detail),
            StepStatus::Skipped => tracing::debug!("{} skipped: {}", outcome.name, outcome.detail),
        }
        self.steps.push(outcome);
    }

    /// Record `result` as a step; returns the value on success.
    fn record<T>(
        &mut self,
        name: &str,
        started: Instant,
        result: Result<T>,
        detail: impl FnOnce(&T) -> String,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                self.push(StepOutcome::passed(name, started.elapsed(), detail(&value)));
                Some(value)
            }
            Err(e) => {
                self.push(StepOutcome::from_error(name, started.elapsed(), &e));
                None
            }
        }
    }

    /// True when at least one step ran and none failed.
    pub fn passed(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Passed)
            && self.steps.iter().all(|s| s.status != StepStatus::Failed)
    }

    /// The failed steps.
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.status == StepStatus::Failed)
    }

    /// Counts of passed, failed and skipped steps.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.steps
            .iter()
            .fold((0, 0, 0), |(p, f, s), step| match step.status {
                StepStatus::Passed => (p + 1, f, s),
                StepStatus::Failed => (p, f + 1, s),
                StepStatus::Skipped => (p, f, s + 1),
            })
    }
}

/// How to run a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    /// Which scenario.
    pub kind: ScenarioKind,
    /// Assume the database is already up and seeded.
    pub skip_fixture: bool,
    /// Leave the container running afterwards.
    pub keep_fixture: bool,
    /// Fired to abort the run; in-flight calls fail with `Cancelled`.
    pub cancel: CancellationToken,
}

impl ScenarioOptions {
    /// Options for `kind` with fixture management enabled.
    pub fn new(kind: ScenarioKind) -> Self {
        Self {
            kind,
            skip_fixture: false,
            keep_fixture: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Run a scenario to completion and return what it recorded.
///
/// # Errors
///
/// Returns an error only if the configuration is invalid; step failures are
/// recorded in the report.
pub async fn run_scenario(config: &Config, options: &ScenarioOptions) -> Result<ScenarioReport> {
    config.validate()?;
    tracing::info!("Running {} scenario", options.kind);

    let report = match options.kind {
        ScenarioKind::Smoke => run_smoke(config, options).await,
        ScenarioKind::Stdio => run_stdio(config, options).await,
    };

    let (passed, failed, skipped) = report.counts();
    tracing::info!(
        "{} scenario finished: {} passed, {} failed, {} skipped",
        options.kind,
        passed,
        failed,
        skipped
    );
    Ok(report)
}

async fn connect(
    config: &Config,
    options: &ScenarioOptions,
    report: &mut ScenarioReport,
) -> Option<McpSession> {
    let started = Instant::now();
    let result = McpSession::connect_with_cancellation(
        &config.server,
        &config.client,
        options.cancel.child_token(),
    )
    .await;
    report.record("initialize", started, result, |session| {
        let response = session.initialize_response();
        match &response.server_info {
            Some(info) => format!(
                "{} {} (protocol {})",
                info.name, info.version, response.protocol_version
            ),
            None => format!("protocol {}", response.protocol_version),
        }
    })
}

async fn shutdown(session: McpSession, report: &mut ScenarioReport) {
    let started = Instant::now();
    let result = session.shutdown().await;
    report.record("shutdown", started, result, |_| "server terminated".to_string());
}

async fn run_smoke(config: &Config, options: &ScenarioOptions) -> ScenarioReport {
    let mut report = ScenarioReport::new(ScenarioKind::Smoke);
    let Some(session) = connect(config, options, &mut report).await else {
        return report;
    };

    let started = Instant::now();
    let result = session.ping().await;
    report.record("ping", started, result, |_| "pong".to_string());

    let started = Instant::now();
    let result = expect_missing_relation(&session).await;
    report.record("tool error", started, result, |msg| msg.clone());

    let started = Instant::now();
    let result = session.ping().await;
    report.record("ping after tool error", started, result, |_| {
        "session still usable".to_string()
    });

    shutdown(session, &mut report).await;
    report
}

/// Call `run_query` on a missing relation and require an error naming it.
///
/// The error may arrive as a JSON-RPC error payload or as a result flagged
/// `isError`; both are accepted.
async fn expect_missing_relation(session: &McpSession) -> Result<String> {
    let mut arguments = Map::new();
    arguments.insert("sql".to_string(), json!("select * from nonexistent"));

    let message = match session.call_tool("run_query", arguments).await {
        Ok(response) if response.is_error.unwrap_or(false) => response.text(),
        Ok(response) => {
            return Err(HarnessError::Assertion(format!(
                "run_query on a missing relation succeeded: {}",
                response.text()
            ))
            .into())
        }
        Err(e) => match e.downcast_ref::<HarnessError>() {
            Some(HarnessError::Tool { message, .. }) => message.clone(),
            _ => return Err(e),
        },
    };

    if message.contains("nonexistent") {
        Ok(message)
    } else {
        Err(HarnessError::Assertion(format!(
            "tool error does not name the missing relation: {message}"
        ))
        .into())
    }
}

async fn run_stdio(config: &Config, options: &ScenarioOptions) -> ScenarioReport {
    let mut report = ScenarioReport::new(ScenarioKind::Stdio);
    let mut fixture = Fixture::new(config.fixture.clone());

    if options.skip_fixture {
        report.push(StepOutcome::skipped("fixture", "--skip-fixture"));
    } else {
        let started = Instant::now();
        let result = setup_fixture(&mut fixture).await;
        let ready = report
            .record("fixture", started, result, |_| {
                format!("{} ready and seeded", config.fixture.service)
            })
            .is_some();
        if !ready {
            teardown_fixture(&mut fixture, options, &mut report).await;
            return report;
        }
    }

    if let Some(session) = connect(config, options, &mut report).await {
        exercise_tools(&session, &fixture, config, &mut report).await;
        shutdown(session, &mut report).await;
    }

    if !options.skip_fixture {
        teardown_fixture(&mut fixture, options, &mut report).await;
    }
    report
}

async fn setup_fixture(fixture: &mut Fixture) -> Result<()> {
    fixture.up().await?;
    fixture.wait_ready().await?;
    fixture.seed().await
}

async fn teardown_fixture(
    fixture: &mut Fixture,
    options: &ScenarioOptions,
    report: &mut ScenarioReport,
) {
    if options.keep_fixture {
        report.push(StepOutcome::skipped("fixture teardown", "--keep-fixture"));
        return;
    }
    let started = Instant::now();
    let result = fixture.down().await;
    report.record("fixture teardown", started, result, |_| "removed".to_string());
}

async fn exercise_tools(
    session: &McpSession,
    fixture: &Fixture,
    config: &Config,
    report: &mut ScenarioReport,
) {
    let started = Instant::now();
    let result = ToolRegistry::from_session(session).await;
    let Some(registry) = report.record("tools/list", started, result, |r| {
        format!("{} tools", r.len())
    }) else {
        return;
    };

    let missing = suite::missing_tools(&registry);
    if !missing.is_empty() {
        report.push(StepOutcome::failed(
            "required tools",
            Duration::ZERO,
            format!("Missing expected tools: {}", missing.join(", ")),
        ));
        return;
    }
    report.push(StepOutcome::passed(
        "required tools",
        Duration::ZERO,
        format!("{} present", suite::REQUIRED_TOOLS.len()),
    ));

    let ctx = suite::SuiteContext::new(config.fixture.database.clone());
    let menu = suite::tool_menu(&ctx);
    let outcomes = suite::run_menu(&registry, &menu).await;
    let session_lost = outcomes.iter().any(|o| o.fatal);
    for outcome in outcomes {
        report.push(outcome);
    }

    if session_lost {
        report.push(StepOutcome::skipped("kill_session", "session closed"));
    } else {
        report.push(suite::run_kill_session(&registry, fixture).await);
    }
}
