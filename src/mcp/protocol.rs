//! Typed MCP lifecycle wrapper over [`RpcClient`]
//!
//! This module provides two types that represent the two phases of an MCP
//! client session:
//!
//! - [`McpProtocol`] -- an uninitialized client. Call [`McpProtocol::initialize`]
//!   to perform the `initialize` / `notifications/initialized` handshake and
//!   receive an [`McpSession`].
//! - [`McpSession`] -- a negotiated session. `tools/list`, `tools/call` and
//!   `ping` are available as typed async methods.
//!
//! The session holds its client as a [`SharedClient`] so that
//! [`crate::tools::RemoteTool`] handles can dispatch through the same
//! connection.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{ClientInfoConfig, ServerConfig};
use crate::error::Result;
use crate::mcp::client::{RpcClient, SharedClient};
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, ListToolsResponse, McpTool, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

/// An MCP client that has not yet completed the handshake.
#[derive(Debug)]
pub struct McpProtocol {
    client: RpcClient,
}

impl McpProtocol {
    /// Wrap a freshly opened client.
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    /// Perform the initialize handshake.
    ///
    /// Sends `initialize`, awaits its response, then sends
    /// `notifications/initialized`.
    ///
    /// # Arguments
    ///
    /// * `client_info` - Name and version announced to the server.
    /// * `protocol_version` - Protocol revision to request.
    ///
    /// # Errors
    ///
    /// Returns any client error from the `initialize` call, or a
    /// serialization error if the response is not an initialize result.
    pub async fn initialize(
        mut self,
        client_info: Implementation,
        protocol_version: &str,
    ) -> Result<McpSession> {
        let params = serde_json::to_value(InitializeParams {
            protocol_version: protocol_version.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        })?;
        let raw = self.client.call(METHOD_INITIALIZE, params).await?;
        let response: InitializeResponse = serde_json::from_value(raw)?;

        if response.protocol_version != protocol_version {
            tracing::warn!(
                "server negotiated protocol {} (requested {})",
                response.protocol_version,
                protocol_version
            );
        }
        if let Some(info) = &response.server_info {
            tracing::info!("connected to {} {}", info.name, info.version);
        }

        self.client.notify(METHOD_INITIALIZED, None).await?;

        Ok(McpSession {
            client: self.client.into_shared(),
            initialize_response: response,
        })
    }
}

/// A negotiated MCP session.
///
/// # Examples
///
/// ```no_run
/// use pgmcp_harness::config::Config;
/// use pgmcp_harness::mcp::protocol::McpSession;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::default();
///     let session = McpSession::connect(&config.server, &config.client).await?;
///     for tool in session.list_tools().await? {
///         println!("{}", tool.name);
///     }
///     session.shutdown().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct McpSession {
    client: SharedClient,
    initialize_response: InitializeResponse,
}

impl McpSession {
    /// Spawn the server described by `server` and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns a config error if `server` does not validate, a spawn error if
    /// the process cannot start, or any error from the handshake.
    pub async fn connect(server: &ServerConfig, client: &ClientInfoConfig) -> Result<Self> {
        Self::connect_with_cancellation(server, client, CancellationToken::new()).await
    }

    /// Like [`McpSession::connect`], but every call on the session fails with
    /// `Cancelled` and the server is terminated once `token` fires.
    pub async fn connect_with_cancellation(
        server: &ServerConfig,
        client: &ClientInfoConfig,
        token: CancellationToken,
    ) -> Result<Self> {
        let spawn = server.spawn_config()?;
        tracing::info!("spawning tool server: {} {}", spawn.command, spawn.args.join(" "));
        let rpc = RpcClient::spawn(&spawn)?.with_cancellation(token);
        McpProtocol::new(rpc)
            .initialize(client.implementation(), &client.protocol_version)
            .await
    }

    /// The server's initialize result.
    pub fn initialize_response(&self) -> &InitializeResponse {
        &self.initialize_response
    }

    /// The underlying shared client.
    pub fn client(&self) -> SharedClient {
        self.client.clone()
    }

    /// List every tool, following `nextCursor` until exhausted.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let raw = self.client.lock().await.call(METHOD_TOOLS_LIST, params).await?;
            let resp: ListToolsResponse = serde_json::from_value(raw)?;
            tools.extend(resp.tools);

            match resp.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Invoke a tool by name.
    ///
    /// A JSON-RPC error payload surfaces as [`crate::error::HarnessError::Tool`];
    /// a result with `isError: true` is returned as-is for the caller to
    /// interpret.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResponse> {
        call_tool(&self.client, name, arguments).await
    }

    /// Send `ping`.
    pub async fn ping(&self) -> Result<()> {
        self.client
            .lock()
            .await
            .call(METHOD_PING, serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Tear the session down. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        self.client.lock().await.shutdown().await
    }
}

/// Issue `tools/call` over a shared client and decode the result.
pub(crate) async fn call_tool(
    client: &SharedClient,
    name: &str,
    arguments: Map<String, Value>,
) -> Result<CallToolResponse> {
    let params = serde_json::to_value(CallToolParams {
        name: name.to_string(),
        arguments,
    })?;
    let raw = client.lock().await.call(METHOD_TOOLS_CALL, params).await?;
    Ok(serde_json::from_value(raw)?)
}
