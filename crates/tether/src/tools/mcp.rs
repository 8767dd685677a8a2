//! Model Context Protocol client.
//!
//! The tool server runs as a child process speaking MCP over stdio. Framing,
//! request ids and the handshake are handled by `rmcp`; this module turns its
//! results into the crate's tool types and puts a timeout on every request.

use async_trait::async_trait;
use rmcp::handler::client::ClientHandler;
use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, ClientInfo, Implementation,
    InitializeRequestParams, ProtocolVersion,
};
use rmcp::service::{RoleClient, RunningService, ServiceError};
use rmcp::transport::{IntoTransport, TokioChildProcess};
use rmcp::ServiceExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::connection::ToolConnection;
use super::error::{ToolError, ToolResult};
use crate::models::content::{join_text, Content};
use crate::models::tool::{Tool, ToolCall};

const CLIENT_NAME: &str = "tether";

/// How to launch a tool server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ServerCommand {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Pick the interpreter for a server script from its extension
    pub fn for_script(path: &str) -> ToolResult<Self> {
        let extension = Path::new(path).extension().and_then(|ext| ext.to_str());
        let program = match extension {
            Some("js") => "node",
            Some("py") if cfg!(windows) => "python",
            Some("py") => "python3",
            _ => {
                return Err(ToolError::InvalidServer(format!(
                    "server script must be a .js or .py file: {}",
                    path
                )))
            }
        };
        Ok(Self::new(program, vec![path.to_string()]))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "empty_schema")]
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolOutcome {
    #[serde(default)]
    content: Option<Vec<Content>>,
    #[serde(default)]
    is_error: Option<bool>,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// What we tell the server about ourselves during the handshake
#[derive(Debug, Clone, Default)]
struct TetherClientHandler;

impl ClientHandler for TetherClientHandler {
    fn get_info(&self) -> ClientInfo {
        InitializeRequestParams::new(
            ClientCapabilities::default(),
            Implementation::new(CLIENT_NAME.to_owned(), env!("CARGO_PKG_VERSION").to_string()),
        )
        .with_protocol_version(ProtocolVersion::V_2024_11_05)
    }
}

/// A connection to one MCP server
pub struct McpClient {
    service: RunningService<RoleClient, TetherClientHandler>,
    request_timeout: Duration,
}

impl McpClient {
    /// Launch the server process and complete the initialize handshake
    pub async fn spawn(command: &ServerCommand, request_timeout: Duration) -> ToolResult<Self> {
        debug!(program = %command.program, args = ?command.args, "spawning tool server");
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).kill_on_drop(true);

        let transport = TokioChildProcess::new(cmd).map_err(|e| {
            ToolError::Transport(format!("failed to start {}: {}", command.program, e))
        })?;
        Self::connect(transport, request_timeout).await
    }

    /// Run the handshake over any transport `rmcp` accepts, such as a
    /// `(reader, writer)` pair
    pub async fn connect<T, E, A>(transport: T, request_timeout: Duration) -> ToolResult<Self>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let service = tokio::time::timeout(request_timeout, TetherClientHandler.serve(transport))
            .await
            .map_err(|_| ToolError::Timeout("initialize".to_string()))?
            .map_err(|e| ToolError::Protocol(format!("initialize failed: {}", e)))?;

        let client = Self {
            service,
            request_timeout,
        };
        debug!(server = ?client.server_info(), "tool server initialized");
        Ok(client)
    }

    /// The server's answer to `initialize`
    pub fn server_info(&self) -> Option<Value> {
        self.service
            .peer()
            .peer_info()
            .and_then(|info| serde_json::to_value(info).ok())
    }

    async fn run_with_timeout<F, T>(&self, method: &str, fut: F) -> ToolResult<T>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(|e| service_error(method, e)),
            Err(_) => Err(ToolError::Timeout(method.to_string())),
        }
    }
}

fn service_error(method: &str, err: ServiceError) -> ToolError {
    match err {
        ServiceError::McpError(error) => ToolError::Protocol(format!(
            "{} failed: {} ({})",
            method, error.message, error.code.0
        )),
        ServiceError::TransportClosed | ServiceError::Cancelled { .. } => ToolError::Closed,
        ServiceError::Timeout { .. } => ToolError::Timeout(method.to_string()),
        other => ToolError::Transport(format!("{} failed: {}", method, other)),
    }
}

/// Tool arguments must be an object on the wire
fn normalize_arguments(args: &Value) -> Map<String, Value> {
    match args {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_owned(), other.clone());
            map
        }
    }
}

#[async_trait]
impl ToolConnection for McpClient {
    async fn list_tools(&self) -> ToolResult<Vec<Tool>> {
        let listed = self
            .run_with_timeout("tools/list", self.service.peer().list_all_tools())
            .await?;

        listed
            .into_iter()
            .map(|tool| -> ToolResult<Tool> {
                let tool: McpTool = serde_json::from_value(serde_json::to_value(tool)?)?;
                Ok(Tool::new(
                    tool.name,
                    tool.description.unwrap_or_default(),
                    tool.input_schema,
                ))
            })
            .collect()
    }

    async fn call_tool(&self, tool_call: ToolCall) -> ToolResult<Vec<Content>> {
        debug!(tool = %tool_call.name, "calling tool");
        let params: CallToolRequestParams = serde_json::from_value(json!({
            "name": tool_call.name,
            "arguments": normalize_arguments(&tool_call.arguments),
        }))?;
        let result = self
            .run_with_timeout("tools/call", self.service.peer().call_tool(params))
            .await?;

        let outcome: CallToolOutcome = serde_json::from_value(serde_json::to_value(result)?)?;
        let content = outcome.content.unwrap_or_default();
        if outcome.is_error.unwrap_or(false) {
            let message = join_text(&content, "\n");
            return Err(ToolError::ExecutionError(if message.is_empty() {
                format!("{} reported an error", tool_call.name)
            } else {
                message
            }));
        }
        Ok(content)
    }

    async fn close(&self) {
        // Stops the service loop, which drops the transport and kills the child
        self.service.cancellation_token().cancel();
    }
}
