//! MCP (Model Context Protocol) client over stdio
//!
//! # Module Layout
//!
//! - `types`       -- JSON-RPC primitives and the MCP types the harness uses
//! - `codec`       -- Newline-delimited framing and inbound classification
//! - `correlation` -- Pending-request table keyed by request id
//! - `transport`   -- `Transport` trait, the stdio child-process transport,
//!   and a channel-backed fake for tests
//! - `client`      -- Request/response JSON-RPC client with timeouts and
//!   cancellation
//! - `protocol`    -- Initialize handshake and the typed session

pub mod client;
pub mod codec;
pub mod correlation;
pub mod protocol;
pub mod transport;
pub mod types;

pub use types::*;
