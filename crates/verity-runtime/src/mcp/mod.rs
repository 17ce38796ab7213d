//! MCP client used to query the tool server under evaluation.
//!
//! Speaks JSON-RPC 2.0 over two transports:
//! - [`StdioTransport`]: child process, newline-delimited JSON
//! - [`HttpTransport`]: streamable HTTP (JSON or `text/event-stream` replies)
//!
//! The solver only sees the [`ToolServer`] trait, which keeps it testable
//! against in-process fakes.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

mod http;
pub mod jsonrpc;
mod stdio;

pub use http::HttpTransport;
pub use jsonrpc::{ToolAnnotations, ToolCallResult, ToolDescriptor};
pub use stdio::StdioTransport;

use jsonrpc::{ListToolsResult, PROTOCOL_VERSION};

/// Upper bound on `tools/list` pages followed.
const MAX_LIST_PAGES: usize = 50;

/// Errors talking to a tool server.
#[derive(Error, Debug, Clone)]
pub enum McpError {
    /// Transport-level failure; retried with backoff
    #[error("Tool connection error: {0}")]
    Connection(String),

    #[error("Tool call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Circuit open for server '{0}'")]
    CircuitOpen(String),

    #[error("Invalid transport configuration: {0}")]
    Config(String),
}

impl McpError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, McpError::Connection(_) | McpError::Timeout(_))
    }

    /// Counts against the server's circuit breaker.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, McpError::Connection(_) | McpError::Timeout(_))
    }
}

/// A JSON-RPC channel to a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its `result`.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError>;

    /// Send a notification.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;
}

/// The query interface of the system under evaluation.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Name used in logs and as the circuit breaker key.
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError>;
}

/// An initialized MCP session over any [`Transport`].
pub struct McpClient {
    name: String,
    transport: Box<dyn Transport>,
}

impl McpClient {
    /// Perform the `initialize` handshake.
    pub async fn connect(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
    ) -> Result<Self, McpError> {
        let name = name.into();
        let result = transport
            .request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "verity",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                })),
            )
            .await?;

        let server_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(server = %name, protocol = server_version, "MCP session initialized");

        transport.notify("notifications/initialized", None).await?;

        Ok(Self { name, transport })
    }
}

#[async_trait]
impl ToolServer for McpClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let value = self.transport.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(value)
                .map_err(|e| McpError::Protocol(format!("invalid tools/list result: {}", e)))?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        Err(McpError::Protocol(format!(
            "tools/list did not finish within {} pages",
            MAX_LIST_PAGES
        )))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let value = self
            .transport
            .request(
                "tools/call",
                Some(serde_json::json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        ToolCallResult::from_value(value)
            .map_err(|e| McpError::Protocol(format!("invalid tools/call result: {}", e)))
    }
}
