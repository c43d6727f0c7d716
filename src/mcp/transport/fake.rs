//! In-process fake transport for client unit tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the transport into the client under test and use the handle
//! to:
//!
//! - read what the client wrote: `handle.outbound_rx.recv().await`
//! - inject lines the client will read: `handle.inbound_tx.send(line)`
//! - simulate end of stream: `drop(handle.inbound_tx)`
//!
//! ```text
//! client write_line() --> outbound_tx --> outbound_rx (handle reads)
//! handle inbound_tx   --> inbound_rx  --> client read_line()
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{HarnessError, Result};
use crate::mcp::transport::Transport;

/// In-memory [`Transport`] for tests.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: mpsc::UnboundedReceiver<String>,
    terminations: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
    terminated: bool,
}

/// Test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Lines the client wrote, newline stripped.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Lines the client will read.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    /// Number of times `terminate` actually tore the transport down.
    pub terminations: Arc<AtomicUsize>,
    /// When set, every write fails with a broken pipe.
    pub fail_writes: Arc<AtomicBool>,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let terminations = Arc::new(AtomicUsize::new(0));
        let fail_writes = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound_tx,
            inbound_rx,
            terminations: Arc::clone(&terminations),
            fail_writes: Arc::clone(&fail_writes),
            terminated: false,
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            terminations,
            fail_writes,
        };
        (transport, handle)
    }
}

impl FakeTransportHandle {
    /// Push a JSON value as one inbound line.
    pub fn push(&self, value: serde_json::Value) {
        self.inbound_tx
            .send(value.to_string())
            .expect("FakeTransport: inbound channel closed");
    }

    /// Push a raw (possibly non-JSON) inbound line.
    pub fn push_raw(&self, line: &str) {
        self.inbound_tx
            .send(line.to_string())
            .expect("FakeTransport: inbound channel closed");
    }

    /// Drain every line written so far, parsed as JSON.
    pub fn drain_written(&mut self) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(line) = self.outbound_rx.try_recv() {
            out.push(serde_json::from_str(&line).expect("client wrote invalid JSON"));
        }
        out
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        if self.terminated || self.fail_writes.load(Ordering::SeqCst) {
            return Err(HarnessError::BrokenPipe("fake peer closed stdin".into()).into());
        }
        self.outbound_tx
            .send(line.trim_end_matches('\n').to_string())
            .map_err(|_| HarnessError::BrokenPipe("fake handle dropped".into()).into())
    }

    async fn read_line(&mut self) -> Result<String> {
        self.inbound_rx
            .recv()
            .await
            .ok_or_else(|| HarnessError::TransportClosed("fake peer closed stdout".into()).into())
    }

    async fn terminate(&mut self) -> Result<()> {
        if !self.terminated {
            self.terminated = true;
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_written_lines_reach_handle_without_newline() {
        let (mut transport, mut handle) = FakeTransport::new();
        transport.write_line("{\"a\":1}\n").await.unwrap();
        assert_eq!(handle.outbound_rx.recv().await.unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_dropping_inbound_sender_ends_stream() {
        let (mut transport, handle) = FakeTransport::new();
        handle.push_raw("banner");
        drop(handle.inbound_tx);
        assert_eq!(transport.read_line().await.unwrap(), "banner");
        let err = transport.read_line().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::TransportClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_terminate_counts_once() {
        let (mut transport, handle) = FakeTransport::new();
        transport.terminate().await.unwrap();
        transport.terminate().await.unwrap();
        assert_eq!(handle.terminations.load(Ordering::SeqCst), 1);
    }
}
