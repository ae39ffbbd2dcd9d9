//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// A process was started while a previous one is still alive.
    #[error("server '{name}' is already running")]
    AlreadyRunning {
        name: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// A handshake step was attempted from the wrong state.
    #[error("server '{name}' handshake in state {state}, expected {expected}")]
    InvalidHandshakeState {
        name: String,
        state: String,
        expected: String,
    },

    /// I/O error on the child's stdio, or a message that could not be encoded.
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// A line read from the server is not a valid JSON-RPC message.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A result payload did not match the expected shape for its method.
    #[error("invalid '{method}' result: {reason}")]
    InvalidResult {
        method: String,
        reason: String,
    },

    /// A request received no response within its deadline.
    #[error("request '{method}' (id {id}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        method: String,
        id: u64,
        timeout_ms: u64,
    },

    /// The connection is gone; every pending request is rejected with this.
    #[error("connection to server '{server}' closed: {reason}")]
    ConnectionClosed {
        server: String,
        reason: String,
    },

    /// The server completed the handshake but advertises no callable tool.
    #[error("server '{name}' exposes no tools")]
    NoToolsAvailable {
        name: String,
    },
}

impl McpError {
    /// Stable machine-readable code, used in `ToolError.code`.
    pub fn code(&self) -> &'static str {
        match self {
            McpError::SpawnFailed { .. } => "SPAWN_FAILED",
            McpError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            McpError::InitFailed { .. } => "INIT_FAILED",
            McpError::InvalidHandshakeState { .. } => "INVALID_HANDSHAKE_STATE",
            McpError::TransportError { .. } => "TRANSPORT_ERROR",
            McpError::MalformedFrame { .. } => "MALFORMED_FRAME",
            McpError::ServerError { .. } => "PROTOCOL_ERROR",
            McpError::InvalidResult { .. } => "INVALID_RESULT",
            McpError::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            McpError::ConnectionClosed { .. } => "CONNECTION_CLOSED",
            McpError::NoToolsAvailable { .. } => "NO_TOOLS_AVAILABLE",
        }
    }

    /// Whether a later attempt against a fresh session may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            McpError::SpawnFailed { .. }
            | McpError::AlreadyRunning { .. }
            | McpError::InitFailed { .. }
            | McpError::TransportError { .. }
            | McpError::RequestTimeout { .. }
            | McpError::ConnectionClosed { .. } => true,
            McpError::InvalidHandshakeState { .. }
            | McpError::MalformedFrame { .. }
            | McpError::ServerError { .. }
            | McpError::InvalidResult { .. }
            | McpError::NoToolsAvailable { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_failure_is_recoverable() {
        let err = McpError::SpawnFailed {
            name: "eslint".into(),
            reason: "No such file or directory".into(),
        };
        assert_eq!(err.code(), "SPAWN_FAILED");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_protocol_error_is_not_recoverable() {
        let err = McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(err.code(), "PROTOCOL_ERROR");
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "server error [-32601]: Method not found");
    }
}
