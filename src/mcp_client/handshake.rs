//! MCP initialization handshake.
//!
//! `initialize` → `notifications/initialized` → `tools/list`, once per process
//! lifetime. A failed `initialize` is fatal for the attempt; a failed
//! `tools/list` is not, and the session proceeds with no discovered tools.

use std::fmt;
use std::time::Duration;

use super::client::JsonRpcClient;
use super::errors::McpError;
use super::types::{
    ClientInfo, InitializeParams, InitializeResult, McpToolDefinition, ServerCapabilities,
    ServerInfo, ToolsListResult, PROTOCOL_VERSION,
};

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitialized,
    Initializing,
    Initialized,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Uninitialized => "uninitialized",
            HandshakeState::Initializing => "initializing",
            HandshakeState::Initialized => "initialized",
            HandshakeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What the server told us during the handshake. Read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub protocol_version: Option<String>,
    pub capabilities: ServerCapabilities,
    pub server_info: Option<ServerInfo>,
    pub tools: Vec<McpToolDefinition>,
}

impl SessionInfo {
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Drives the handshake for one server connection.
pub struct HandshakeProtocol {
    server: String,
    client_info: ClientInfo,
    state: HandshakeState,
    info: Option<SessionInfo>,
}

impl HandshakeProtocol {
    pub fn new(server: &str, client_info: ClientInfo) -> Self {
        Self {
            server: server.to_string(),
            client_info,
            state: HandshakeState::Uninitialized,
            info: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Session info, present only once `Initialized`.
    pub fn info(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }

    /// Run the handshake. Only valid from `Uninitialized`.
    ///
    /// `request_timeout` bounds each request individually.
    pub async fn perform(
        &mut self,
        client: &JsonRpcClient,
        request_timeout: Duration,
    ) -> Result<&SessionInfo, McpError> {
        if self.state != HandshakeState::Uninitialized {
            return Err(McpError::InvalidHandshakeState {
                name: self.server.clone(),
                state: self.state.to_string(),
                expected: HandshakeState::Uninitialized.to_string(),
            });
        }
        self.state = HandshakeState::Initializing;

        match self.run(client, request_timeout).await {
            Ok(info) => {
                tracing::info!(
                    server = %self.server,
                    tools = info.tools.len(),
                    protocol = info.protocol_version.as_deref().unwrap_or("unknown"),
                    "handshake complete"
                );
                self.state = HandshakeState::Initialized;
                Ok(&*self.info.insert(info))
            }
            Err(e) => {
                tracing::warn!(server = %self.server, error = %e, "handshake failed");
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        client: &JsonRpcClient,
        request_timeout: Duration,
    ) -> Result<SessionInfo, McpError> {
        // 1. initialize (fatal on failure)
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: self.client_info.clone(),
        };
        let params = serde_json::to_value(params).map_err(|e| McpError::InitFailed {
            name: self.server.clone(),
            reason: format!("failed to encode initialize params: {e}"),
        })?;

        let result = client
            .send_request("initialize", Some(params), request_timeout)
            .await?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InvalidResult {
                method: "initialize".into(),
                reason: e.to_string(),
            })?;

        // 2. initialized notification
        client
            .send_notification("notifications/initialized", None)
            .await?;

        // 3. tools/list (best-effort)
        let tools = match client
            .send_request("tools/list", None, request_timeout)
            .await
            .and_then(|value| {
                serde_json::from_value::<ToolsListResult>(value).map_err(|e| {
                    McpError::InvalidResult {
                        method: "tools/list".into(),
                        reason: e.to_string(),
                    }
                })
            }) {
            Ok(list) => list.tools,
            Err(e) => {
                tracing::warn!(
                    server = %self.server,
                    error = %e,
                    "tool discovery failed, continuing with no tools"
                );
                Vec::new()
            }
        };

        Ok(SessionInfo {
            protocol_version: init.protocol_version,
            capabilities: init.capabilities,
            server_info: init.server_info,
            tools,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Spawn an in-memory server that answers each method with `reply(method)`.
    fn scripted_server(
        reply: fn(&str) -> Option<Value>,
    ) -> (JsonRpcClient, tokio::task::JoinHandle<Vec<String>>) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (mut server_out, client_in) = tokio::io::duplex(64 * 1024);
        let client = JsonRpcClient::new("scripted", client_in, client_out);

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut lines = BufReader::new(server_in).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: Value = serde_json::from_str(&line).unwrap();
                let method = msg["method"].as_str().unwrap_or_default().to_string();
                seen.push(method.clone());
                let Some(id) = msg.get("id") else { continue };
                let body = match reply(&method) {
                    Some(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    None => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "Method not found"}
                    }),
                };
                let text = format!("{body}\n");
                if server_out.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
            }
            seen
        });

        (client, handle)
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_handshake_sequence_and_capabilities() {
        let (client, server) = scripted_server(|method| match method {
            "initialize" => Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "semgrep-mcp", "version": "0.3.0"}
            })),
            "tools/list" => Some(json!({
                "tools": [{"name": "scan", "description": "Run semgrep", "inputSchema": {"type": "object"}}]
            })),
            _ => None,
        });

        let mut handshake = HandshakeProtocol::new("scripted", ClientInfo::default());
        let info = handshake.perform(&client, TIMEOUT).await.unwrap();
        assert_eq!(info.tool_names(), vec!["scan"]);
        assert!(info.capabilities.tools.is_some());
        assert_eq!(handshake.state(), HandshakeState::Initialized);

        client.close("done").await;
        let seen = server.await.unwrap();
        assert_eq!(
            seen,
            vec!["initialize", "notifications/initialized", "tools/list"]
        );
    }

    #[tokio::test]
    async fn test_tools_list_failure_is_not_fatal() {
        let (client, _server) = scripted_server(|method| match method {
            "initialize" => Some(json!({"capabilities": {}})),
            _ => None,
        });

        let mut handshake = HandshakeProtocol::new("scripted", ClientInfo::default());
        let info = handshake.perform(&client, TIMEOUT).await.unwrap();
        assert!(info.tools.is_empty());
        assert_eq!(handshake.state(), HandshakeState::Initialized);
    }

    #[tokio::test]
    async fn test_initialize_error_moves_to_failed() {
        let (client, _server) = scripted_server(|_| None);

        let mut handshake = HandshakeProtocol::new("scripted", ClientInfo::default());
        let err = handshake.perform(&client, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, McpError::ServerError { .. }));
        assert_eq!(handshake.state(), HandshakeState::Failed);
        assert!(handshake.info().is_none());

        let again = handshake.perform(&client, TIMEOUT).await.unwrap_err();
        assert!(matches!(again, McpError::InvalidHandshakeState { .. }));
    }

    #[tokio::test]
    async fn test_initialize_timeout_moves_to_failed() {
        let (client_out, _server_in) = tokio::io::duplex(1024);
        let (_server_out, client_in) = tokio::io::duplex(1024);
        let client = JsonRpcClient::new("silent", client_in, client_out);

        let mut handshake = HandshakeProtocol::new("silent", ClientInfo::default());
        let err = handshake
            .perform(&client, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::RequestTimeout { .. }));
        assert_eq!(handshake.state(), HandshakeState::Failed);
    }
}
