//! Sequential JSON-RPC 2.0 client over a line transport
//!
//! This module provides [`RpcClient`], which composes a [`Transport`], the
//! newline codec, and a [`Correlator`] into a `call` / `notify` interface.
//!
//! # Design
//!
//! - There is no background reader. `call` writes its request and then reads
//!   lines on the caller's task until the response carrying its own id
//!   arrives. Banners, log lines, notifications and responses for other ids
//!   are discarded along the way.
//! - One request awaits resolution at a time. `call` takes `&mut self`, so
//!   the borrow checker enforces this; share a client between tasks through
//!   [`SharedClient`], which serializes calls.
//! - Every wait is bounded. A timeout abandons the pending entry without
//!   deleting it, so a late response is recognised and dropped, and the
//!   session stays usable.
//! - A [`CancellationToken`] tears the session down, failing an in-flight
//!   call with [`HarnessError::Cancelled`].
//! - Transport failures (end of stream, broken pipe) close the session. Every
//!   later call fails with the same error instead of silently recovering.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SpawnConfig;
use crate::error::{HarnessError, Result};
use crate::mcp::codec::{decode_line, encode_notification, encode_request, DecodedMessage};
use crate::mcp::correlation::{Correlation, Correlator, PendingState};
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::Transport;

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A client shared between owners; the mutex serializes calls.
pub type SharedClient = Arc<Mutex<RpcClient>>;

/// Why a session stopped accepting requests.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CloseReason {
    Shutdown,
    TransportClosed(String),
    BrokenPipe(String),
    Cancelled,
}

impl CloseReason {
    fn to_error(&self) -> HarnessError {
        match self {
            Self::Shutdown => HarnessError::SessionClosed,
            Self::TransportClosed(msg) => HarnessError::TransportClosed(msg.clone()),
            Self::BrokenPipe(msg) => HarnessError::BrokenPipe(msg.clone()),
            Self::Cancelled => HarnessError::Cancelled("session cancelled".to_string()),
        }
    }
}

/// Outcome of one bounded wait.
enum Wait {
    Done(Result<Value>),
    TimedOut,
    Cancelled,
}

/// Sequential JSON-RPC 2.0 client session.
///
/// # Examples
///
/// ```no_run
/// use pgmcp_harness::config::ServerConfig;
/// use pgmcp_harness::mcp::client::RpcClient;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let spawn = ServerConfig::default().spawn_config()?;
///     let mut client = RpcClient::spawn(&spawn)?;
///     let pong = client.call("ping", serde_json::json!({})).await?;
///     println!("{pong}");
///     client.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct RpcClient {
    transport: Box<dyn Transport>,
    correlator: Correlator,
    closed: Option<CloseReason>,
    default_timeout: Duration,
    cancellation: CancellationToken,
    notifications_seen: u64,
    discarded_lines: u64,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("next_id", &self.correlator.peek_next_id())
            .field("pending", &self.correlator.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Create a client over an already-open transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            correlator: Correlator::new(),
            closed: None,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            cancellation: CancellationToken::new(),
            notifications_seen: 0,
            discarded_lines: 0,
        }
    }

    /// Spawn the tool server over stdio and open a session.
    ///
    /// The request timeout is taken from `config.request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Spawn`] if the child cannot be started.
    pub fn spawn(config: &SpawnConfig) -> Result<Self> {
        let transport = StdioTransport::spawn(config)?;
        Ok(Self::new(Box::new(transport)).with_timeout(config.request_timeout))
    }

    /// Replace the default request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Use a caller-supplied cancellation token (e.g. a child of a scenario token).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Wrap the client for shared ownership.
    pub fn into_shared(self) -> SharedClient {
        Arc::new(Mutex::new(self))
    }

    /// A handle that cancels this session when fired.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Whether the session has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// The id the next request will carry.
    pub fn next_request_id(&self) -> u64 {
        self.correlator.peek_next_id()
    }

    /// Number of entries in the pending table.
    pub fn pending_len(&self) -> usize {
        self.correlator.len()
    }

    /// State of a pending request id, if it is still in the table.
    pub fn pending_state(&self, id: u64) -> Option<PendingState> {
        self.correlator.state(id)
    }

    /// Number of server notifications skipped while waiting for responses.
    pub fn notifications_seen(&self) -> u64 {
        self.notifications_seen
    }

    /// Number of non-protocol lines skipped while waiting for responses.
    pub fn discarded_lines(&self) -> u64 {
        self.discarded_lines
    }

    /// Send a request and wait for its response using the default timeout.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call_with_timeout`].
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let timeout = self.default_timeout;
        self.call_with_timeout(method, params, timeout).await
    }

    /// Send a request and wait at most `timeout` for its response.
    ///
    /// # Arguments
    ///
    /// * `method` - The JSON-RPC method name.
    /// * `params` - Parameters mapping; `Value::Null` is sent as `{}`.
    /// * `timeout` - Upper bound on the wait for the matching response.
    ///
    /// # Returns
    ///
    /// The `result` member of the matching response, unchanged.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::Tool`] if the peer answered with an error payload
    ///   (the session stays usable).
    /// - [`HarnessError::Timeout`] if no matching response arrived in time
    ///   (the session stays usable).
    /// - [`HarnessError::TransportClosed`] / [`HarnessError::BrokenPipe`] if
    ///   the peer went away (the session is closed).
    /// - [`HarnessError::Cancelled`] if the cancellation token fired.
    /// - [`HarnessError::SessionClosed`] after [`RpcClient::shutdown`].
    pub async fn call_with_timeout(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.ensure_open().await?;

        let id = self.correlator.begin(method);
        let line = match encode_request(id, method, params) {
            Ok(line) => line,
            Err(e) => {
                self.correlator.correlate(id, id);
                return Err(e);
            }
        };

        tracing::debug!("-> {method} id={id}");
        if let Err(e) = self.transport.write_line(&line).await {
            self.correlator.correlate(id, id);
            return Err(self.close_after_write_failure(e).await);
        }

        let cancel = self.cancellation.clone();
        let wait = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wait::Cancelled,
            res = tokio::time::timeout(timeout, self.await_response(id)) => match res {
                Ok(outcome) => Wait::Done(outcome),
                Err(_) => Wait::TimedOut,
            },
        };

        match wait {
            Wait::Done(Ok(value)) => {
                tracing::debug!("<- {method} id={id} ok");
                Ok(value)
            }
            Wait::Done(Err(e)) => {
                self.close_after_failure(&e).await;
                Err(e)
            }
            Wait::TimedOut => {
                self.correlator.abandon(id);
                tracing::warn!("{method} id={id} timed out after {timeout:?}; abandoning");
                Err(HarnessError::Timeout {
                    method: method.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into())
            }
            Wait::Cancelled => {
                self.teardown(CloseReason::Cancelled).await;
                Err(HarnessError::Cancelled(format!("{method} id={id}")).into())
            }
        }
    }

    /// Send a notification. Never reads and never creates a pending entry.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::BrokenPipe`] if the peer closed its input, or
    /// the closing error if the session is already closed.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_open().await?;
        let line = encode_notification(method, params)?;
        tracing::debug!("-> {method} (notification)");
        if let Err(e) = self.transport.write_line(&line).await {
            return Err(self.close_after_write_failure(e).await);
        }
        Ok(())
    }

    /// Abandon every pending request and terminate the transport.
    ///
    /// Idempotent: shutting down a closed session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the child process could not be reaped.
    pub async fn shutdown(&mut self) -> Result<()> {
        let abandoned = self.correlator.abandon_all();
        if !abandoned.is_empty() {
            tracing::debug!("shutdown abandoned {} pending request(s)", abandoned.len());
        }
        if self.closed.is_none() {
            self.closed = Some(CloseReason::Shutdown);
        }
        self.transport.terminate().await
    }

    /// Read lines until the response for `awaited` arrives.
    async fn await_response(&mut self, awaited: u64) -> Result<Value> {
        loop {
            let line = self.transport.read_line().await?;
            match decode_line(&line) {
                DecodedMessage::Unparseable => {
                    self.discarded_lines += 1;
                    tracing::debug!("skipping non-protocol line: {}", truncate(&line, 120));
                }
                DecodedMessage::Notification { method, .. } => {
                    self.notifications_seen += 1;
                    tracing::debug!("skipping server notification '{method}'");
                }
                DecodedMessage::Response { id, outcome } => {
                    match self.correlator.correlate(id, awaited) {
                        Correlation::Matched(_) => {
                            return outcome.map_err(|e| {
                                HarnessError::Tool {
                                    code: e.code,
                                    message: e.message,
                                    data: e.data,
                                }
                                .into()
                            });
                        }
                        Correlation::Stale(entry) => tracing::debug!(
                            "discarding late response to abandoned request id={id} ({})",
                            entry.method
                        ),
                        Correlation::OtherPending => tracing::warn!(
                            "response for id={id} arrived while waiting on id={awaited}; ignoring"
                        ),
                        Correlation::Unknown => {
                            tracing::warn!("discarding response with unknown or duplicate id={id}")
                        }
                    }
                }
            }
        }
    }

    async fn ensure_open(&mut self) -> Result<()> {
        if self.closed.is_none() && self.cancellation.is_cancelled() {
            self.teardown(CloseReason::Cancelled).await;
        }
        match &self.closed {
            Some(reason) => Err(reason.to_error().into()),
            None => Ok(()),
        }
    }

    /// Close the session if `err` means the transport is gone.
    async fn close_after_failure(&mut self, err: &anyhow::Error) {
        let reason = match err.downcast_ref::<HarnessError>() {
            Some(HarnessError::TransportClosed(msg)) => CloseReason::TransportClosed(msg.clone()),
            Some(HarnessError::BrokenPipe(msg)) => CloseReason::BrokenPipe(msg.clone()),
            _ => return,
        };
        self.teardown(reason).await;
    }

    /// Close the session after a failed write and return the closing error.
    ///
    /// A partial frame may have reached the peer, so no write failure is
    /// recoverable.
    async fn close_after_write_failure(&mut self, err: anyhow::Error) -> anyhow::Error {
        let reason = match err.downcast_ref::<HarnessError>() {
            Some(HarnessError::TransportClosed(msg)) => CloseReason::TransportClosed(msg.clone()),
            Some(HarnessError::BrokenPipe(msg)) => CloseReason::BrokenPipe(msg.clone()),
            _ => CloseReason::BrokenPipe(format!("write failed: {err}")),
        };
        let closing = reason.to_error();
        self.teardown(reason).await;
        closing.into()
    }

    async fn teardown(&mut self, reason: CloseReason) {
        let abandoned = self.correlator.abandon_all();
        tracing::debug!(
            "closing session ({reason:?}); abandoned {} pending request(s)",
            abandoned.len()
        );
        self.closed = Some(reason);
        if let Err(e) = self.transport.terminate().await {
            tracing::warn!("terminating transport failed: {e}");
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
