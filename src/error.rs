//! Error types for pgmcp-harness
//!
//! This module defines all error types used throughout the harness,
//! using `thiserror` for ergonomic error handling. Fallible functions return
//! [`Result`], an `anyhow` alias; callers that need to branch on a specific
//! failure use `err.downcast_ref::<HarnessError>()`.

use thiserror::Error;

/// Main error type for harness operations
///
/// Covers configuration validation, process transport failures, JSON-RPC
/// error payloads returned by the tool server, tool adapter resolution, and
/// the scenario layer (fixture provisioning and shape assertions).
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The tool-server child process could not be started
    #[error("Failed to spawn tool server: {0}")]
    Spawn(String),

    /// The peer closed its stdin while we were writing
    #[error("Broken pipe: {0}")]
    BrokenPipe(String),

    /// The peer closed its stdout before a matching response arrived
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// The session was already torn down
    #[error("Session closed")]
    SessionClosed,

    /// No response arrived within the bounded wait
    #[error("Request timeout: method={method}, timeout_ms={timeout_ms}")]
    Timeout {
        /// The JSON-RPC method that timed out
        method: String,
        /// The elapsed budget in milliseconds
        timeout_ms: u64,
    },

    /// The session's cancellation token fired during a call
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// The peer returned a JSON-RPC error payload for a known request id
    #[error("Tool error {code}: {message}")]
    Tool {
        /// JSON-RPC error code, verbatim from the peer
        code: i64,
        /// Human-readable message, verbatim from the peer
        message: String,
        /// Optional structured error context
        data: Option<serde_json::Value>,
    },

    /// `tools/call` succeeded at the protocol level but flagged `isError`
    #[error("Tool reported an error: {0}")]
    ToolReportedError(String),

    /// The tool adapter exhausted every resolution strategy
    #[error("Tool {0} is not callable and has no known callable attribute")]
    NotInvocable(String),

    /// A keyword-style call was rejected because of its argument shape
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// Fixture provisioning (container, readiness, seeding) failed
    #[error("Fixture error: {0}")]
    Fixture(String),

    /// A scenario shape assertion failed
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HarnessError {
    /// Returns `true` when the error leaves the session unusable.
    ///
    /// Transport-level failures close the session; tool errors, timeouts and
    /// adapter errors do not.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::Spawn(_)
                | Self::BrokenPipe(_)
                | Self::TransportClosed(_)
                | Self::SessionClosed
                | Self::Cancelled(_)
        )
    }
}

/// Result type alias for harness operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
