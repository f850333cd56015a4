//! MCP Server implementation
//!
//! Transport-agnostic JSON-RPC dispatch plus the stdio transport. The HTTP
//! transports in [`crate::mcp::http`] and [`crate::mcp::sse`] share one
//! `McpServer` behind an `Arc`.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use crate::config::server::NAME as SERVER_NAME;
use crate::error::Result;
use crate::mcp::tools::ToolHandler;
use crate::mcp::types::*;

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Server for Gmail
pub struct McpServer {
    /// Tool handler
    tool_handler: ToolHandler,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(tool_handler: ToolHandler) -> Self {
        Self { tool_handler }
    }

    /// Run the server on stdio until stdin closes
    pub async fn run_stdio(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        info!("MCP server listening on stdio");

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_message(&line).await {
                match serde_json::to_string(&response) {
                    Ok(mut response_str) => {
                        response_str.push('\n');
                        stdout.write_all(response_str.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    Err(e) => error!("failed to serialize response: {}", e),
                }
            }
        }

        info!("stdin closed, shutting down");
        Ok(())
    }

    /// Handle one raw JSON-RPC message; `None` means nothing to send back
    pub async fn handle_message(&self, message: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(message) {
            Ok(value) => value,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(format!("Parse error: {}", e)),
                ));
            }
        };

        self.handle_value(value).await
    }

    /// Handle an already parsed JSON value
    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        // Responses from the client (to server requests we never make) are dropped
        if value.get("method").is_none()
            && (value.get("result").is_some() || value.get("error").is_some())
        {
            return None;
        }

        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(JsonRpcResponse::error(
                None,
                JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
            )),
        }
    }

    /// Dispatch a request or notification
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling MCP message");

        if request.is_notification() {
            if request.method == methods::INITIALIZED {
                debug!("client finished initialization");
            }
            return None;
        }

        let id = request.id.clone();
        let response = match request.method.as_str() {
            methods::INITIALIZE => JsonRpcResponse::success(id, self.handle_initialize(&request)),
            methods::PING => JsonRpcResponse::success(id, serde_json::json!({})),
            methods::LIST_TOOLS => JsonRpcResponse::success(id, self.handle_list_tools()),
            methods::CALL_TOOL => match self.handle_call_tool(&request).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(error) => JsonRpcResponse::error(id, error),
            },
            _ => JsonRpcResponse::error(id, JsonRpcError::method_not_found(&request.method)),
        };

        Some(response)
    }

    /// Negotiated protocol version for an initialize request
    pub fn protocol_version_for(request: &JsonRpcRequest) -> &'static str {
        let requested = request
            .params
            .as_ref()
            .and_then(|p| serde_json::from_value::<InitializeParams>(p.clone()).ok())
            .and_then(|p| p.protocol_version);
        negotiate_protocol_version(requested.as_deref())
    }

    /// Handle initialize request
    fn handle_initialize(&self, request: &JsonRpcRequest) -> Value {
        let result = InitializeResult {
            protocol_version: Self::protocol_version_for(request).to_string(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
        };

        serde_json::to_value(result).unwrap_or_default()
    }

    /// Handle list tools request
    fn handle_list_tools(&self) -> Value {
        let result = ListToolsResult {
            tools: self.tool_handler.list_tools(),
        };

        serde_json::to_value(result).unwrap_or_default()
    }

    /// Handle call tool request
    async fn handle_call_tool(
        &self,
        request: &JsonRpcRequest,
    ) -> std::result::Result<Value, JsonRpcError> {
        let params: CallToolParams = match request.params.as_ref() {
            Some(p) => serde_json::from_value(p.clone()).map_err(|e| {
                JsonRpcError::invalid_params(format!("Invalid tool parameters: {}", e))
            })?,
            None => return Err(JsonRpcError::invalid_params("Missing tool parameters")),
        };

        info!(tool = %params.name, "tool call");

        let result = self
            .tool_handler
            .call_tool(&params.name, params.arguments)
            .await;

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}
