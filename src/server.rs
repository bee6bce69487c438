//! MCP server over stdio
//!
//! Newline-delimited JSON-RPC on stdin/stdout. Stdout carries protocol frames
//! only; logs go to stderr.

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::rpc_codes;
use crate::protocol::{
    Info, InitializeParams, InitializeResult, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    PROTOCOL_VERSION, RequestId, ServerCapabilities, ToolsCallParams, ToolsCapability,
    ToolsListResult,
};
use crate::tools::{AuthTool, AuthTools};
use crate::Result;

/// Name reported in `serverInfo`
pub const SERVER_NAME: &str = "freshbooks-mcp";

const INSTRUCTIONS: &str = "Call auth_status first. If not authenticated, call auth_get_url, \
    have the user open the URL and approve access, then pass the `code` from the redirect to \
    auth_exchange_code. Tokens refresh automatically.";

/// JSON-RPC dispatcher for the auth tools
pub struct McpServer {
    tools: AuthTools,
}

impl McpServer {
    /// Create a server exposing `tools`
    #[must_use]
    pub fn new(tools: AuthTools) -> Self {
        Self { tools }
    }

    /// Serve on the process stdin/stdout until stdin closes
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("MCP server listening on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve newline-delimited JSON-RPC from `reader` to `writer`
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            let frame = serde_json::to_string(&response)?;
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        debug!("stdin closed, stopping MCP server");
        Ok(())
    }

    /// Handle one raw frame; `None` for notifications
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Unparseable JSON-RPC frame");
                return Some(JsonRpcResponse::error(
                    None,
                    rpc_codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };

        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        match serde_json::from_value::<JsonRpcMessage>(value) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Some(JsonRpcResponse::error(
                id,
                rpc_codes::INVALID_REQUEST,
                format!("Invalid request: {e}"),
            )),
        }
    }

    /// Handle a parsed message
    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match message {
            JsonRpcMessage::Notification(n) => {
                debug!(method = %n.method, "Ignoring notification");
                None
            }
            JsonRpcMessage::Request(request) => Some(self.handle_request(request).await),
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        debug!(id = %id, method = %method, "Handling request");

        match method.as_str() {
            "initialize" => Self::handle_initialize(id, params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, params).await,
            _ => JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ),
        }
    }

    fn handle_initialize(id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        if let Some(params) = params {
            match serde_json::from_value::<InitializeParams>(params) {
                Ok(p) => info!(
                    client = %p.client_info.name,
                    client_version = %p.client_info.version,
                    protocol = %p.protocol_version,
                    "MCP client connected"
                ),
                Err(e) => debug!(error = %e, "Lenient initialize: unrecognized params"),
            }
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
            server_info: Info {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("FreshBooks".to_string()),
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        };
        to_response(id, &result)
    }

    fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.tools.definitions(),
            next_cursor: None,
        };
        to_response(id, &result)
    }

    async fn handle_tools_call(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolsCallParams = match params.map(serde_json::from_value) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::INVALID_PARAMS,
                    format!("Invalid params: {e}"),
                );
            }
            None => {
                return JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::INVALID_PARAMS,
                    "Missing params",
                );
            }
        };

        let Some(tool) = AuthTool::from_name(&params.name) else {
            return JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Unknown tool: {}", params.name),
            );
        };

        let result = self.tools.call(tool, params.arguments).await;
        to_response(id, &result)
    }
}

fn to_response<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(
            Some(id),
            rpc_codes::INTERNAL_ERROR,
            format!("Failed to encode result: {e}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::identity::IdentityClient;
    use crate::oauth::{InMemoryStore, OAuthClient, OAuthConfig};

    fn server() -> McpServer {
        let config =
            OAuthConfig::new("client", "secret", "https://localhost/callback").unwrap();
        let client = OAuthClient::builder(config, Arc::new(InMemoryStore::new()))
            .build()
            .unwrap();
        let identity = IdentityClient::new(
            "http://127.0.0.1:9",
            Duration::from_secs(1),
            Arc::new(client.clone()),
        )
        .unwrap();
        McpServer::new(AuthTools::new(client, identity))
    }

    #[tokio::test]
    async fn parse_error_has_null_id() {
        let response = server().handle_line("{not json").await.unwrap();
        assert!(response.id.is_none());
        assert_eq!(response.error.unwrap().code, rpc_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let line = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        assert!(server().handle_line(line).await.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let line = r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#;
        let response = server().handle_line(line).await.unwrap();
        assert_eq!(response.id, Some(RequestId::Number(3)));
        assert_eq!(response.error.unwrap().code, rpc_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn tools_call_without_params_is_invalid() {
        let line = r#"{"jsonrpc":"2.0","id":"a","method":"tools/call"}"#;
        let response = server().handle_line(line).await.unwrap();
        assert_eq!(response.error.unwrap().code, rpc_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn serve_writes_one_frame_per_request() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let mut output = Vec::new();
        server().serve(input.as_bytes(), &mut output).await.unwrap();

        let frames: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["result"], json!({}));
        assert_eq!(frames[1]["result"]["tools"].as_array().unwrap().len(), 7);
    }
}
