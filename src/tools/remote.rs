//! Remote tools reached through `tools/call`

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{HarnessError, Result};
use crate::mcp::client::SharedClient;
use crate::mcp::protocol::{self, McpSession};
use crate::mcp::types::CallToolResponse;
use crate::tools::{Arguments, KeywordCallable, ToolRef, ToolRegistry};

/// A named tool on the server, invoked over a shared client session.
#[derive(Clone)]
pub struct RemoteTool {
    name: String,
    client: SharedClient,
}

impl RemoteTool {
    /// Bind `name` to a client session.
    pub fn new(name: impl Into<String>, client: SharedClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    /// Tool name on the server.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for RemoteTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTool").field("name", &self.name).finish()
    }
}

#[async_trait]
impl KeywordCallable for RemoteTool {
    async fn call(&self, arguments: Arguments) -> Result<Value> {
        let response = protocol::call_tool(&self.client, &self.name, arguments).await?;
        normalize_tool_result(&self.name, response)
    }
}

impl ToolRegistry {
    /// Register every tool the session lists as a [`RemoteTool`].
    pub async fn from_session(session: &McpSession) -> Result<Self> {
        let mut registry = Self::new();
        for tool in session.list_tools().await? {
            registry.register(ToolRef::Remote(RemoteTool::new(tool.name, session.client())));
        }
        Ok(registry)
    }
}

/// Turn a `tools/call` result into the value a local call would return.
///
/// - `isError: true` fails with [`HarnessError::ToolReportedError`].
/// - Otherwise `structuredContent` wins when present.
/// - Otherwise the concatenated text content, parsed as JSON when it parses.
///
/// # Examples
///
/// ```
/// use pgmcp_harness::mcp::types::{CallToolResponse, ToolResponseContent};
/// use pgmcp_harness::tools::normalize_tool_result;
///
/// let resp = CallToolResponse {
///     content: vec![ToolResponseContent::Text { text: "{\"ok\":true}".into() }],
///     is_error: None,
///     structured_content: None,
/// };
/// let value = normalize_tool_result("ping", resp).unwrap();
/// assert_eq!(value["ok"], true);
/// ```
pub fn normalize_tool_result(name: &str, response: CallToolResponse) -> Result<Value> {
    if response.is_error.unwrap_or(false) {
        return Err(HarnessError::ToolReportedError(format!("{name}: {}", response.text())).into());
    }
    if let Some(structured) = response.structured_content {
        return Ok(structured);
    }
    let text = response.text();
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}
