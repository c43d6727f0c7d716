//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines the subset of Model Context Protocol wire types that
//! the harness exercises: the `initialize` handshake, `tools/list`,
//! `tools/call`, and `ping`. Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]`. All `Option<>` fields omit their key
//! from JSON when `None`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// JSON-RPC protocol version carried in every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision the harness requests during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client sends `notifications/initialized` after the server ACKs.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Keepalive ping.
pub const METHOD_PING: &str = "ping";
/// Request a page of available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request object.
///
/// `id` is assigned by the correlation engine and is unique within a
/// session.
///
/// # Examples
///
/// ```
/// use pgmcp_harness::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new(1, "ping", serde_json::json!({}));
/// assert_eq!(req.jsonrpc, "2.0");
/// assert_eq!(req.id, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier.
    pub id: u64,
    /// The method name to invoke.
    pub method: String,
    /// Method parameters.
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    /// Build a request with the protocol version filled in.
    pub fn new(id: u64, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (a request with no `id`).
///
/// # Examples
///
/// ```
/// use pgmcp_harness::mcp::types::JsonRpcNotification;
///
/// let n = JsonRpcNotification::new("notifications/initialized", None);
/// let json = serde_json::to_value(&n).unwrap();
/// assert!(json.get("id").is_none());
/// assert!(json.get("params").is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// The notification method name.
    pub method: String,
    /// Optional notification parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Build a notification with the protocol version filled in.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use pgmcp_harness::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError { code: -32600, message: "Invalid Request".to_string(), data: None };
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or the server.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Initialize types
// ---------------------------------------------------------------------------

/// Name and version of an MCP implementation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Implementation {
    /// Short name of the implementation (e.g. `"pgmcp-harness"`).
    pub name: String,
    /// Version string (e.g. `"0.1.0"`).
    pub version: String,
}

/// Capabilities advertised by this client. The harness advertises none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// Filesystem root capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<serde_json::Value>,
    /// LLM sampling capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
}

/// Capabilities a server advertises in its `initialize` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Server supports log notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
    /// Server exposes prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
    /// Server exposes resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    /// Server exposes tools via `tools/list` and `tools/call`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
}

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    pub protocol_version: String,
    /// Capabilities advertised by this client.
    pub capabilities: ClientCapabilities,
    /// Information identifying this client implementation.
    pub client_info: Implementation,
}

/// Response returned by the server to an `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// The protocol version the server has selected for this session.
    pub protocol_version: String,
    /// Capabilities advertised by this server.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Information identifying this server implementation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    /// Optional human-readable instructions for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

/// A tool advertised by the server in `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's arguments.
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Response from a `tools/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResponse {
    /// The tools on this page.
    pub tools: Vec<McpTool>,
    /// Cursor for the next page; absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Keyword arguments for the tool.
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Response from a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    /// The content items produced by the tool.
    #[serde(default)]
    pub content: Vec<ToolResponseContent>,
    /// When `true`, the tool signalled an error condition within its content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Structured output, when the server provides it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
}

impl CallToolResponse {
    /// Concatenate every text content item.
    ///
    /// # Examples
    ///
    /// ```
    /// use pgmcp_harness::mcp::types::{CallToolResponse, ToolResponseContent};
    ///
    /// let resp = CallToolResponse {
    ///     content: vec![
    ///         ToolResponseContent::Text { text: "ab".into() },
    ///         ToolResponseContent::Text { text: "c".into() },
    ///     ],
    ///     is_error: None,
    ///     structured_content: None,
    /// };
    /// assert_eq!(resp.text(), "abc");
    /// ```
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolResponseContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A single content item in a tool response.
///
/// Discriminated by the `"type"` field on the wire. Content kinds the
/// harness does not inspect decode as [`ToolResponseContent::Other`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResponseContent {
    /// Plain text output.
    Text {
        /// The text content.
        text: String,
    },
    /// A base64-encoded image.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents, uninterpreted.
        resource: serde_json::Value,
    },
    /// Any other content kind.
    #[serde(other)]
    Other,
}
