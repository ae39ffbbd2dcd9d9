//! Server session lifecycle.
//!
//! A session is one child process plus its JSON-RPC client plus completed
//! handshake state. Sessions are only handed out fully initialized; if any
//! startup step fails, the process is killed and nothing is returned.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::client::JsonRpcClient;
use super::errors::McpError;
use super::handshake::{HandshakeProtocol, SessionInfo};
use super::transport::ProcessTransport;
use super::types::{ClientInfo, ServerConfig, ServerNotification, ToolsCallParams, ToolsCallResult};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
///
/// Generous because some analyzers load large rule sets before answering.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a server gets to exit after stdin closes before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ─── Options ─────────────────────────────────────────────────────────────────

/// Knobs shared by every session an adapter starts.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_info: ClientInfo,
    pub init_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Default cwd for servers without their own `cwd`.
    pub working_dir: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            working_dir: None,
        }
    }
}

// ─── McpSession ──────────────────────────────────────────────────────────────

/// A running, initialized tool server.
pub struct McpSession {
    name: String,
    transport: Mutex<ProcessTransport>,
    client: JsonRpcClient,
    info: SessionInfo,
    pid: Option<u32>,
}

impl McpSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capabilities and tools captured by the handshake.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerNotification> {
        self.client.subscribe()
    }

    /// Whether the process is alive and the connection still open.
    pub async fn is_usable(&self) -> bool {
        self.client.is_connected() && self.transport.lock().await.is_alive()
    }

    /// Invoke one MCP tool via `tools/call`.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolsCallResult, McpError> {
        let params = serde_json::to_value(ToolsCallParams {
            name: tool.to_string(),
            arguments,
        })
        .map_err(|e| McpError::TransportError {
            server: self.name.clone(),
            reason: format!("failed to encode tools/call params: {e}"),
        })?;

        let result = self
            .client
            .send_request("tools/call", Some(params), timeout)
            .await?;

        serde_json::from_value(result).map_err(|e| McpError::InvalidResult {
            method: "tools/call".into(),
            reason: e.to_string(),
        })
    }

    /// Close the connection, give the process `grace` to exit, then kill it.
    pub async fn shutdown(&self, grace: Duration) {
        let rejected = self.client.close("session shut down").await;
        let mut transport = self.transport.lock().await;
        if !transport.wait_for_exit(grace).await {
            tracing::debug!(server = %self.name, "server did not exit in time, killing");
        }
        transport.kill().await;
        tracing::info!(server = %self.name, rejected, "session shut down");
    }
}

// ─── Startup ─────────────────────────────────────────────────────────────────

/// Spawn a server process and complete the handshake.
pub async fn start_session(
    name: &str,
    config: &ServerConfig,
    options: &SessionOptions,
) -> Result<McpSession, McpError> {
    let mut transport = ProcessTransport::new(name, config.clone(), options.working_dir.clone());
    let streams = transport.start()?;
    let pid = transport.pid();

    let client = JsonRpcClient::new(name, streams.stdout, streams.stdin);
    let mut handshake = HandshakeProtocol::new(name, options.client_info.clone());

    let outcome = tokio::time::timeout(
        options.init_timeout,
        handshake.perform(&client, options.init_timeout),
    )
    .await;

    let info = match outcome {
        Ok(Ok(info)) => info.clone(),
        Ok(Err(e)) => return Err(abort_start(name, &client, &mut transport, e.to_string()).await),
        Err(_) => {
            let reason = format!(
                "initialization timed out after {}ms",
                options.init_timeout.as_millis()
            );
            return Err(abort_start(name, &client, &mut transport, reason).await);
        }
    };

    Ok(McpSession {
        name: name.to_string(),
        transport: Mutex::new(transport),
        client,
        info,
        pid,
    })
}

/// Tear down a half-started server and build the `InitFailed` error.
async fn abort_start(
    name: &str,
    client: &JsonRpcClient,
    transport: &mut ProcessTransport,
    reason: String,
) -> McpError {
    client.close("handshake failed").await;

    let stderr = transport.stderr_excerpt().await;
    if !stderr.is_empty() {
        tracing::warn!(
            server = name,
            stderr = %stderr,
            "server stderr captured on failure"
        );
    }
    transport.kill().await;

    McpError::InitFailed {
        name: name.to_string(),
        reason: format!("{reason}{}", format_stderr_suffix(&stderr)),
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {stderr}")
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
