//! Line-oriented process transport abstraction
//!
//! This module defines the [`Transport`] trait the RPC client drives.
//! Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns the tool server as a child process
//!   and exchanges newline-delimited frames over its stdin/stdout pipes.
//! - `fake::FakeTransport` -- in-process fake used in unit tests
//!   (cfg(test) only).
//!
//! # Design
//!
//! The trait is intentionally minimal and line-oriented: the client writes
//! one encoded frame per call and reads one raw line per call. Framing
//! beyond the trailing newline, and all protocol interpretation, belong to
//! the codec and client layers.
//!
//! There is a single owner: the writer side (stdin) and the reader side
//! (stdout) are never shared with another component, so every method takes
//! `&mut self`.

use crate::error::Result;

/// Abstraction over line-oriented transports to a tool server.
///
/// # Examples
///
/// ```no_run
/// use pgmcp_harness::mcp::transport::Transport;
///
/// // Implementations are created via their own constructors and handed to
/// // `RpcClient::new` as `Box<dyn Transport>`.
/// ```
#[async_trait::async_trait]
pub trait Transport: Send + std::fmt::Debug {
    /// Write one line to the peer and flush.
    ///
    /// A trailing `\n` is appended when `line` does not already end with
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::HarnessError::BrokenPipe`] if the peer closed
    /// its input.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read the next line from the peer, newline stripped.
    ///
    /// Implementations MUST be cancel-safe: if the returned future is
    /// dropped (for example by a timeout), no buffered data is lost.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::HarnessError::TransportClosed`] if the peer
    /// closed its output.
    async fn read_line(&mut self) -> Result<String>;

    /// Terminate the peer and release its resources.
    ///
    /// Calling this on an already-terminated transport is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be reaped.
    async fn terminate(&mut self) -> Result<()>;
}

pub mod stdio;

#[cfg(test)]
pub mod fake;
