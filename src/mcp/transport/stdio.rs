//! Stdio transport for tool-server child processes
//!
//! This module implements [`StdioTransport`], which spawns a child process
//! and communicates with it over its stdin/stdout pipes using
//! newline-delimited JSON framing.
//!
//! # Protocol
//!
//! - Outbound frames are written to the child's stdin and flushed after
//!   every line, so the peer observes requests in write order.
//! - Inbound lines are read from the child's stdout on demand by the caller;
//!   there is no background reader.
//! - The child's stderr is drained by a background task and logged via
//!   `tracing::debug!`. Stderr output is diagnostic only and never treated
//!   as an error condition.
//!
//! # Lifecycle
//!
//! The transport is created via [`StdioTransport::spawn`]. The child
//! inherits the parent environment with the [`SpawnConfig`] environment
//! merged over it. [`Transport::terminate`] closes stdin, sends SIGTERM
//! (Unix) and waits up to the configured grace period before escalating to a
//! forceful kill. If the transport is dropped without being terminated, a
//! best-effort SIGTERM is sent instead.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::config::SpawnConfig;
use crate::error::{HarnessError, Result};
use crate::mcp::transport::Transport;

/// Stdio-based transport that drives a tool-server child process.
///
/// # Examples
///
/// ```no_run
/// use pgmcp_harness::config::ServerConfig;
/// use pgmcp_harness::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let spawn = ServerConfig::default().spawn_config()?;
/// let transport = StdioTransport::spawn(&spawn)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    /// Program name, for diagnostics.
    program: String,
    /// Handle to the spawned child process.
    child: Child,
    /// Writer side; `None` once stdin has been closed.
    stdin: Option<ChildStdin>,
    /// Reader side; `Lines::next_line` is cancel-safe.
    stdout: Lines<BufReader<ChildStdout>>,
    /// Background task draining stderr into the log.
    stderr_task: Option<JoinHandle<()>>,
    /// How long `terminate` waits after SIGTERM before killing.
    grace: Duration,
    /// Set once `terminate` has run.
    terminated: bool,
}

impl StdioTransport {
    /// Spawn the tool server and wire up its stdio pipes.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated spawn configuration (command, args, working
    ///   directory, environment, shutdown grace).
    ///
    /// # Returns
    ///
    /// A fully wired [`StdioTransport`] ready to exchange lines.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Spawn`] if the process cannot be started or
    /// if its stdio pipes are unavailable.
    pub fn spawn(config: &SpawnConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.envs(&config.env);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            HarnessError::Spawn(format!("failed to spawn `{}`: {}", config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Spawn("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Spawn("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HarnessError::Spawn("child stderr unavailable after spawn".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = LinesStream::new(BufReader::new(stderr).lines());
            while let Some(Ok(line)) = lines.next().await {
                tracing::debug!(
                    target: "pgmcp_harness::mcp::transport::stdio",
                    "tool server stderr: {}",
                    line
                );
            }
        });

        tracing::debug!(
            target: "pgmcp_harness::mcp::transport::stdio",
            "spawned `{}` (pid {:?})",
            config.command,
            child.id()
        );

        Ok(Self {
            program: config.command.clone(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stderr_task: Some(stderr_task),
            grace: config.shutdown_grace,
            terminated: false,
        })
    }

    /// OS process id of the child, if it is still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether [`Transport::terminate`] has already run.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            HarnessError::BrokenPipe(format!("stdin of `{}` already closed", self.program))
        })?;

        let mut buf = line.as_bytes().to_vec();
        if !line.ends_with('\n') {
            buf.push(b'\n');
        }

        let written = match stdin.write_all(&buf).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| {
            let msg = match e.kind() {
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
                    format!("`{}` closed its stdin: {}", self.program, e)
                }
                _ => format!("writing to stdin of `{}` failed: {}", self.program, e),
            };
            HarnessError::BrokenPipe(msg).into()
        })
    }

    async fn read_line(&mut self) -> Result<String> {
        match self.stdout.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(HarnessError::TransportClosed(format!(
                "`{}` closed its stdout",
                self.program
            ))
            .into()),
            Err(e) => Err(HarnessError::TransportClosed(format!(
                "reading stdout of `{}` failed: {}",
                self.program, e
            ))
            .into()),
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        // Closing stdin lets servers that exit on EOF shut down on their own.
        drop(self.stdin.take());

        if let Some(status) = self.child.try_wait()? {
            tracing::debug!("`{}` already exited: {}", self.program, status);
        } else {
            send_sigterm(&mut self.child);
            match tokio::time::timeout(self.grace, self.child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("`{}` exited: {}", self.program, status),
                Ok(Err(e)) => return Err(HarnessError::Io(e).into()),
                Err(_) => {
                    tracing::warn!(
                        "`{}` did not exit within {:?}; killing",
                        self.program,
                        self.grace
                    );
                    self.child.kill().await.map_err(HarnessError::Io)?;
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}

impl Drop for StdioTransport {
    /// Best-effort termination of the child process on drop.
    ///
    /// MUST NOT block; the child is signalled and left for the OS to reap.
    fn drop(&mut self) {
        if !self.terminated {
            send_sigterm(&mut self.child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spawn_config(command: &str, args: &[&str]) -> SpawnConfig {
        SpawnConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            env: HashMap::new(),
            request_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(500),
        }
    }

    fn downcast(err: &anyhow::Error) -> &HarnessError {
        err.downcast_ref::<HarnessError>()
            .expect("expected a HarnessError")
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_executable_returns_spawn_error() {
        let result = StdioTransport::spawn(&spawn_config(
            "/nonexistent/binary/that/does/not/exist",
            &[],
        ));
        let err = result.expect_err("expected error for missing executable");
        assert!(matches!(downcast(&err), HarnessError::Spawn(_)));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cat_echoes_written_line() {
        let mut transport = StdioTransport::spawn(&spawn_config("cat", &[])).unwrap();
        let msg = r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#;
        transport.write_line(msg).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), transport.read_line())
            .await
            .expect("timed out waiting for echo")
            .unwrap();
        assert_eq!(received, msg);
        transport.terminate().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_after_peer_exit_is_transport_closed() {
        let mut transport = StdioTransport::spawn(&spawn_config("true", &[])).unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), transport.read_line())
            .await
            .expect("read should not hang")
            .expect_err("expected end of stream");
        assert!(matches!(downcast(&err), HarnessError::TransportClosed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_sees_merged_environment() {
        let mut config = spawn_config("sh", &["-c", "echo \"$PGMCP_STDIO_TEST:$PATH\""]);
        config
            .env
            .insert("PGMCP_STDIO_TEST".to_string(), "merged".to_string());
        let mut transport = StdioTransport::spawn(&config).unwrap();
        let line = tokio::time::timeout(Duration::from_secs(5), transport.read_line())
            .await
            .unwrap()
            .unwrap();
        let (ours, inherited_path) = line.split_once(':').unwrap();
        assert_eq!(ours, "merged");
        assert!(!inherited_path.is_empty(), "parent PATH must be inherited");
        transport.terminate().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_is_idempotent_and_closes_writer() {
        let mut transport = StdioTransport::spawn(&spawn_config("cat", &[])).unwrap();
        transport.terminate().await.unwrap();
        assert!(transport.is_terminated());
        transport.terminate().await.unwrap();

        let err = transport.write_line("{}").await.expect_err("stdin is closed");
        assert!(matches!(downcast(&err), HarnessError::BrokenPipe(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_escalates_when_sigterm_is_ignored() {
        let mut config = spawn_config("sh", &["-c", "trap '' TERM; while true; do sleep 1; done"]);
        config.shutdown_grace = Duration::from_millis(200);
        let mut transport = StdioTransport::spawn(&config).unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::time::timeout(Duration::from_secs(5), transport.terminate())
            .await
            .expect("terminate must not hang")
            .unwrap();
        assert!(transport.pid().is_none(), "child must be reaped");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_with_working_dir_succeeds() {
        let mut config = spawn_config("pwd", &[]);
        let tmp = tempfile::tempdir().unwrap();
        config.working_dir = Some(tmp.path().to_path_buf());
        let mut transport = StdioTransport::spawn(&config).unwrap();
        let line = transport.read_line().await.unwrap();
        let expected = tmp.path().canonicalize().unwrap();
        assert_eq!(
            std::path::PathBuf::from(line).canonicalize().unwrap(),
            expected
        );
        transport.terminate().await.unwrap();
    }
}
