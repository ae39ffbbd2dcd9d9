//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and MCP protocol structures. Incoming lines are
//! decoded into a tagged [`IncomingMessage`] at the boundary; per-method
//! results are typed (`InitializeResult`, `ToolsListResult`, `ToolsCallResult`)
//! and keep unknown fields in an opaque `extra` map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::McpError;

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
///
/// Field order is part of the wire format: `jsonrpc`, `id`, `method`, `params`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no `id`, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Error reply the client sends for server-initiated requests it does not serve.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorReply {
    pub jsonrpc: String,
    pub id: Value,
    pub error: JsonRpcError,
}

impl JsonRpcErrorReply {
    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            error: JsonRpcError {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("client does not handle '{method}'"),
                data: None,
            },
        }
    }
}

/// JSON-RPC 2.0 response. Exactly one of result or error, enforced by the type.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub outcome: Result<Value, JsonRpcError>,
}

impl JsonRpcResponse {
    /// Convert the outcome into a `Result`, mapping error objects to `McpError`.
    pub fn into_result(self) -> Result<Value, McpError> {
        self.outcome.map_err(|err| McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        })
    }
}

/// One decoded line from a server's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Answer to one of our requests.
    Response(JsonRpcResponse),
    /// Unsolicited server message without an id.
    Notification { method: String, params: Value },
    /// Server-initiated request; the client must answer it.
    Request { id: Value, method: String },
}

/// Decode one frame into an [`IncomingMessage`].
///
/// Any line that is not valid JSON, not an object, or not a well-formed
/// JSON-RPC message is reported as [`McpError::MalformedFrame`].
pub fn decode_message(line: &str) -> Result<IncomingMessage, McpError> {
    let value: Value = serde_json::from_str(line).map_err(|e| McpError::MalformedFrame {
        reason: format!("invalid JSON: {e}"),
    })?;

    let Value::Object(mut obj) = value else {
        return Err(McpError::MalformedFrame {
            reason: "message is not a JSON object".into(),
        });
    };

    let id = obj.remove("id").filter(|v| !v.is_null());

    match obj.remove("method") {
        Some(Value::String(method)) => match id {
            None => Ok(IncomingMessage::Notification {
                method,
                params: obj.remove("params").unwrap_or(Value::Null),
            }),
            Some(id) => Ok(IncomingMessage::Request { id, method }),
        },
        Some(other) => Err(McpError::MalformedFrame {
            reason: format!("method must be a string, got {other}"),
        }),
        None => {
            let id = id.and_then(|v| v.as_u64()).ok_or(McpError::MalformedFrame {
                reason: "response without a numeric id".into(),
            })?;
            let error = obj.remove("error").filter(|v| !v.is_null());
            let result = obj.remove("result");

            let outcome = match (result, error) {
                (Some(result), None) => Ok(result),
                (None | Some(Value::Null), Some(error)) => {
                    let error: JsonRpcError =
                        serde_json::from_value(error).map_err(|e| McpError::MalformedFrame {
                            reason: format!("invalid error object: {e}"),
                        })?;
                    Err(error)
                }
                (Some(_), Some(_)) => {
                    return Err(McpError::MalformedFrame {
                        reason: format!("response {id} carries both result and error"),
                    })
                }
                (None, None) => {
                    return Err(McpError::MalformedFrame {
                        reason: format!("response {id} carries neither result nor error"),
                    })
                }
            };

            Ok(IncomingMessage::Response(JsonRpcResponse { id, outcome }))
        }
    }
}

// ─── Server Notifications ───────────────────────────────────────────────────

/// Notifications a tool server may push, decoded from their method names.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    /// `notifications/progress`
    Progress {
        token: Value,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    },
    /// `notifications/message`
    Log {
        level: String,
        logger: Option<String>,
        data: Value,
    },
    /// `notifications/resources/updated`
    ResourceUpdated { uri: String },
}

impl ServerNotification {
    /// Decode a raw notification. Returns `None` for methods outside the set.
    pub fn from_method(method: &str, params: &Value) -> Option<Self> {
        match method {
            "notifications/progress" => Some(Self::Progress {
                token: params.get("progressToken").cloned().unwrap_or(Value::Null),
                progress: params.get("progress").and_then(Value::as_f64).unwrap_or(0.0),
                total: params.get("total").and_then(Value::as_f64),
                message: params
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            "notifications/message" => Some(Self::Log {
                level: params
                    .get("level")
                    .and_then(Value::as_str)
                    .unwrap_or("info")
                    .to_string(),
                logger: params
                    .get("logger")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                data: params.get("data").cloned().unwrap_or(Value::Null),
            }),
            "notifications/resources/updated" => params
                .get("uri")
                .and_then(Value::as_str)
                .map(|uri| Self::ResourceUpdated {
                    uri: uri.to_string(),
                }),
            _ => None,
        }
    }
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Client identity sent in `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// `initialize` request params.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

/// Capabilities advertised by the server in its `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
    #[serde(default)]
    pub logging: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// MCP tool definition as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: Value,
}

/// `tools/list` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
    #[serde(default, alias = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// `tools/call` params.
#[derive(Debug, Clone, Serialize)]
pub struct ToolsCallParams {
    pub name: String,
    pub arguments: Value,
}

/// One content part of a `tools/call` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        #[serde(default)]
        text: String,
    },
    Image {
        #[serde(default)]
        data: String,
        #[serde(default, rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        #[serde(default)]
        resource: Value,
    },
    #[serde(other)]
    Unknown,
}

/// `tools/call` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsCallResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default, alias = "isError")]
    pub is_error: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Image part collected from a tool-call result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageContent {
    pub data: String,
    pub mime_type: String,
}

/// Tool-call content concatenated by type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedContent {
    /// All `text` parts joined with newlines.
    pub text: String,
    pub images: Vec<ImageContent>,
    pub resources: Vec<Value>,
    /// The server flagged the call as failed (`isError`).
    pub is_error: bool,
}

impl ToolsCallResult {
    /// Fold the content list into the normalized shape adapters consume.
    pub fn normalize(self) -> NormalizedContent {
        let mut texts: Vec<String> = Vec::new();
        let mut normalized = NormalizedContent {
            is_error: self.is_error,
            ..NormalizedContent::default()
        };

        for part in self.content {
            match part {
                ContentPart::Text { text } => texts.push(text),
                ContentPart::Image { data, mime_type } => {
                    normalized.images.push(ImageContent { data, mime_type })
                }
                ContentPart::Resource { resource } => normalized.resources.push(resource),
                ContentPart::Unknown => {
                    tracing::debug!("ignoring tool-call content part of unknown type")
                }
            }
        }

        normalized.text = texts.join("\n");
        normalized
    }
}

/// How to launch one tool server process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// JSON-RPC error codes the client sends.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
