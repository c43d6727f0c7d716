//! Database fixture provisioning through docker compose
//!
//! The fixture is opaque to the harness: a compose service running
//! PostgreSQL, reached with `docker compose exec -T <service> psql`. No
//! database driver is linked; readiness, seeding and the idle victim session
//! used by `kill_session` all go through `psql` inside the container.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::config::FixtureConfig;
use crate::error::{HarnessError, Result};

/// Program used to drive compose.
const DOCKER: &str = "docker";

/// Upper bound on any single compose invocation.
const COMPOSE_TIMEOUT: Duration = Duration::from_secs(300);

/// Schema for the sample tables the tool checks expect.
pub const SEED_DDL: &str = r#"
create table if not exists public.customers (
  id serial primary key,
  email text not null unique,
  created_at timestamptz not null default now()
);

create table if not exists public.orders (
  id serial primary key,
  customer_id int not null references public.customers(id),
  status text not null,
  total_cents int not null,
  created_at timestamptz not null default now()
);

create table if not exists public.order_items (
  id serial primary key,
  order_id int not null references public.orders(id),
  sku text not null,
  qty int not null,
  unit_cents int not null
);

create index if not exists idx_orders_customer_created_at on public.orders(customer_id, created_at desc);
create index if not exists idx_order_items_order_id on public.order_items(order_id);
"#;

/// Sample rows; the trailing delete leaves dead tuples for the bloat checks.
pub const SEED_DML: &str = r#"
insert into public.customers(email)
select 'user' || g::text || '@example.com'
from generate_series(1, 200) as g
on conflict do nothing;

insert into public.orders(customer_id, status, total_cents, created_at)
select
  (random() * 199 + 1)::int,
  (array['new','paid','shipped','cancelled'])[1 + (random()*3)::int],
  (random() * 50000 + 100)::int,
  now() - ((random() * 30)::int || ' days')::interval
from generate_series(1, 5000) as g;

insert into public.order_items(order_id, sku, qty, unit_cents)
select
  (random() * 4999 + 1)::int,
  'sku-' || (random() * 50)::int,
  (random() * 5 + 1)::int,
  (random() * 10000 + 50)::int
from generate_series(1, 20000) as g;

delete from public.order_items where id in (
  select id from public.order_items order by id desc limit 2000
);
"#;

/// A PostgreSQL container managed through docker compose.
#[derive(Debug)]
pub struct Fixture {
    config: FixtureConfig,
    started: bool,
}

impl Fixture {
    /// Create a handle; nothing is started until [`Fixture::up`].
    pub fn new(config: FixtureConfig) -> Self {
        Self {
            config,
            started: false,
        }
    }

    /// The fixture configuration.
    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    /// Whether `up` has succeeded and `down` has not yet run.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// `docker` arguments for a compose subcommand.
    pub fn compose_args(&self, args: &[&str]) -> Vec<String> {
        let mut out = vec![
            "compose".to_string(),
            "-f".to_string(),
            self.config.compose_file.to_string_lossy().into_owned(),
        ];
        out.extend(args.iter().map(|s| s.to_string()));
        out
    }

    /// `docker` arguments for running `psql` inside the service container.
    ///
    /// With `sql` the statement is passed via `-c`; without it `psql` reads
    /// from stdin. The connection goes over TCP to the container's loopback:
    /// the image's first-boot init server only listens on the Unix socket.
    pub fn psql_args(&self, sql: Option<&str>, application_name: Option<&str>) -> Vec<String> {
        let mut exec = vec!["exec", "-T"];
        let password_env = format!("PGPASSWORD={}", self.config.password);
        exec.extend(["-e", password_env.as_str()]);
        let app_env = application_name.map(|name| format!("PGAPPNAME={name}"));
        if let Some(env) = &app_env {
            exec.extend(["-e", env.as_str()]);
        }
        exec.extend([
            self.config.service.as_str(),
            "psql",
            "-h",
            "127.0.0.1",
            "-v",
            "ON_ERROR_STOP=1",
            "-U",
            self.config.user.as_str(),
            "-d",
            self.config.database.as_str(),
            "-tA",
        ]);
        if let Some(sql) = sql {
            exec.extend(["-c", sql]);
        }
        self.compose_args(&exec)
    }

    /// Start the service container.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Fixture`] if compose fails.
    pub async fn up(&mut self) -> Result<()> {
        tracing::info!("Starting fixture service {}", self.config.service);
        let args = self.compose_args(&["up", "-d", self.config.service.as_str()]);
        run_docker(&args, None).await?;
        self.started = true;
        Ok(())
    }

    /// Probe with `select 1` until it succeeds or the readiness budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Fixture`] carrying the last probe error.
    pub async fn wait_ready(&self) -> Result<()> {
        let budget = Duration::from_secs(self.config.readiness_timeout_seconds);
        let interval = Duration::from_millis(self.config.readiness_interval_ms);
        let deadline = Instant::now() + budget;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let last_err = match self.psql("select 1").await {
                Ok(out) if out.trim() == "1" => {
                    tracing::info!("Database ready after {} probe(s)", attempts);
                    return Ok(());
                }
                Ok(out) => format!("unexpected probe output: {}", out.trim()),
                Err(e) => e.to_string(),
            };

            if Instant::now() >= deadline {
                return Err(HarnessError::Fixture(format!(
                    "PostgreSQL did not become ready within {}s: {}",
                    budget.as_secs(),
                    last_err
                ))
                .into());
            }
            tracing::debug!("Database not ready (attempt {}): {}", attempts, last_err);
            tokio::time::sleep(interval).await;
        }
    }

    /// Create and populate the sample tables.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Fixture`] if either script fails.
    pub async fn seed(&self) -> Result<()> {
        tracing::info!("Seeding sample data into {}", self.config.database);
        let args = self.psql_args(None, None);
        run_docker(&args, Some(SEED_DDL)).await?;
        run_docker(&args, Some(SEED_DML)).await?;
        Ok(())
    }

    /// Run one statement and return unaligned tuples-only output.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Fixture`] if `psql` exits non-zero.
    pub async fn psql(&self, sql: &str) -> Result<String> {
        run_docker(&self.psql_args(Some(sql), None), None).await
    }

    /// Open a backend session that sleeps under `application_name`.
    ///
    /// The session is the victim for `kill_session`; its pid is discovered
    /// through `pg_stat_activity`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Fixture`] if `docker` cannot be started.
    pub fn spawn_idle_session(&self, application_name: &str, seconds: u64) -> Result<IdleSession> {
        let sql = format!("select pg_sleep({seconds})");
        let args = self.psql_args(Some(&sql), Some(application_name));
        let child = Command::new(DOCKER)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::Fixture(format!("failed to start idle session: {e}")))?;
        Ok(IdleSession {
            child,
            application_name: application_name.to_string(),
        })
    }

    /// Stop the container and drop its volumes.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Fixture`] if compose fails.
    pub async fn down(&mut self) -> Result<()> {
        tracing::info!("Stopping fixture service {}", self.config.service);
        let args = self.compose_args(&["down", "-v"]);
        self.started = false;
        run_docker(&args, None).await.map(|_| ())
    }
}

/// A backend session held open for `kill_session`.
#[derive(Debug)]
pub struct IdleSession {
    child: Child,
    application_name: String,
}

impl IdleSession {
    /// The `application_name` the session runs under.
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// The query that finds this session's backend pid.
    pub fn pid_query(&self) -> String {
        format!(
            "select pid from pg_stat_activity where application_name = '{}' order by backend_start desc limit 1",
            self.application_name.replace('\'', "''")
        )
    }

    /// Kill the client process if the backend kill did not already end it.
    pub async fn stop(mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => tracing::debug!("idle session exited with {}", status),
            _ => {
                if let Err(e) = self.child.kill().await {
                    tracing::debug!("failed to stop idle session: {}", e);
                }
            }
        }
    }
}

async fn run_docker(args: &[String], input: Option<&str>) -> Result<String> {
    let mut child = Command::new(DOCKER)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HarnessError::Fixture(format!("failed to run {DOCKER}: {e}")))?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin
            .write_all(input.as_bytes())
            .await
            .context("failed to send script to psql")?;
        stdin.shutdown().await.context("failed to close psql stdin")?;
    }

    let output = tokio::time::timeout(COMPOSE_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            HarnessError::Fixture(format!(
                "{DOCKER} {} did not finish within {}s",
                args.join(" "),
                COMPOSE_TIMEOUT.as_secs()
            ))
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HarnessError::Fixture(format!(
            "{DOCKER} {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        ))
        .into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
