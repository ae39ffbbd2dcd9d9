//! MCP client: JSON-RPC over stdio for tool server processes.
//!
//! This module handles:
//! - Spawning and terminating tool server child processes
//! - Newline-delimited framing of the stdout byte stream
//! - JSON-RPC 2.0 request/response correlation, timeouts, notifications
//! - The `initialize` / `initialized` / `tools/list` handshake
//! - Session startup and shutdown
//!
//! Analysis adapters in `crate::analysis` own one session each.

pub mod client;
pub mod errors;
pub mod framer;
pub mod handshake;
pub mod lifecycle;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::JsonRpcClient;
pub use errors::McpError;
pub use framer::MessageFramer;
pub use handshake::{HandshakeProtocol, HandshakeState, SessionInfo};
pub use lifecycle::{start_session, McpSession, SessionOptions};
pub use transport::ProcessTransport;
pub use types::{NormalizedContent, ServerConfig, ServerNotification, ToolsCallResult};
