//! Process-backed adapter: one MCP tool server per adapter instance.
//!
//! The server is started lazily on the first `analyze`. Concurrent callers
//! queue on the session slot, so exactly one of them spawns the process and
//! the rest reuse it. A session whose process died is disposed before a
//! replacement is started; there is never more than one live child.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};

use super::adapter::{elapsed_ms, not_applicable, ToolAdapter};
use super::mapping::{FindingMapper, JsonFindingMapper};
use super::types::{AnalysisContext, Tool, ToolError, ToolFinding, ToolMetadata, ToolResult};
use crate::mcp_client::transport::command_available;
use crate::mcp_client::{start_session, McpError, McpSession, ServerConfig, ServerNotification, SessionOptions};

/// One `tools/call` issued per analysis.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallSpec {
    pub name: String,
    /// Merged over the default `{files, repository, path}` arguments.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Adapter for tools served by an MCP child process.
pub struct McpToolAdapter {
    tool: Tool,
    server: ServerConfig,
    options: SessionOptions,
    calls: Vec<ToolCallSpec>,
    mapper: Arc<dyn FindingMapper>,
    session: Mutex<Option<Arc<McpSession>>>,
    spawn_count: AtomicU64,
}

impl McpToolAdapter {
    pub fn new(tool: Tool, server: ServerConfig, options: SessionOptions) -> Self {
        let category = tool
            .capabilities
            .iter()
            .next()
            .cloned()
            .unwrap_or_else(|| "general".to_string());
        Self {
            tool,
            server,
            options,
            calls: Vec::new(),
            mapper: Arc::new(JsonFindingMapper::new(&category)),
            session: Mutex::new(None),
            spawn_count: AtomicU64::new(0),
        }
    }

    /// Tools to call per analysis. Empty means "first discovered tool".
    pub fn with_calls(mut self, calls: Vec<ToolCallSpec>) -> Self {
        self.calls = calls;
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn FindingMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// How many processes this adapter has started over its lifetime.
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::Relaxed)
    }

    /// OS pid of the current server process, if a session is live.
    pub async fn process_id(&self) -> Option<u32> {
        self.session.lock().await.as_ref().and_then(|s| s.pid())
    }

    /// Return the live session, starting one if needed.
    async fn ensure_session(&self) -> Result<Arc<McpSession>, McpError> {
        let mut slot = self.session.lock().await;

        if let Some(existing) = slot.clone() {
            if existing.is_usable().await {
                return Ok(existing);
            }
            slot.take();
            tracing::warn!(tool = %self.tool.id, "tool server is no longer running, restarting");
            existing.shutdown(self.options.shutdown_grace).await;
        }

        self.spawn_count.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(start_session(&self.tool.id, &self.server, &self.options).await?);
        tracing::info!(
            tool = %self.tool.id,
            pid = session.pid(),
            tools = ?session.info().tool_names(),
            "tool server ready"
        );
        spawn_notification_logger(&self.tool.id, session.subscribe());

        *slot = Some(session.clone());
        Ok(session)
    }

    async fn run(
        &self,
        context: &AnalysisContext,
    ) -> Result<(Vec<ToolFinding>, BTreeMap<String, f64>), ToolError> {
        let session = self.ensure_session().await.map_err(|e| ToolError::from(&e))?;
        let timeout = Duration::from_millis(self.tool.requirements.timeout_ms);

        let calls = if self.calls.is_empty() {
            let first = session.info().tools.first().ok_or_else(|| {
                ToolError::from(&McpError::NoToolsAvailable {
                    name: self.tool.id.clone(),
                })
            })?;
            vec![ToolCallSpec {
                name: first.name.clone(),
                arguments: None,
            }]
        } else {
            self.calls.clone()
        };

        let mut findings = Vec::new();
        let mut images = 0usize;
        let mut resources = 0usize;

        for call in &calls {
            let arguments = build_arguments(context, call.arguments.as_ref());
            let content = session
                .call_tool(&call.name, arguments, timeout)
                .await
                .map_err(|e| ToolError::from(&e))?
                .normalize();

            if content.is_error {
                let message = if content.text.is_empty() {
                    format!("tool '{}' reported an error", call.name)
                } else {
                    content.text.clone()
                };
                return Err(ToolError::new("TOOL_ERROR", message, true));
            }

            images += content.images.len();
            resources += content.resources.len();
            findings.extend(self.mapper.map(&content));
        }

        let metrics = BTreeMap::from([
            ("toolCalls".to_string(), calls.len() as f64),
            ("filesAnalyzed".to_string(), context.file_paths().len() as f64),
            ("findings".to_string(), findings.len() as f64),
            ("images".to_string(), images as f64),
            ("resources".to_string(), resources as f64),
        ]);
        Ok((findings, metrics))
    }
}

#[async_trait]
impl ToolAdapter for McpToolAdapter {
    fn tool(&self) -> &Tool {
        &self.tool
    }

    async fn analyze(&self, context: &AnalysisContext) -> ToolResult {
        let start = Instant::now();
        if let Err(reason) = self.compatibility(context) {
            return not_applicable(&self.tool.id, &reason, start);
        }

        match self.run(context).await {
            Ok((findings, metrics)) => {
                tracing::debug!(tool = %self.tool.id, findings = findings.len(), "analysis complete");
                ToolResult::success(&self.tool.id, elapsed_ms(start), findings, metrics)
            }
            Err(error) => {
                tracing::warn!(
                    tool = %self.tool.id,
                    code = %error.code,
                    error = %error.message,
                    "analysis failed"
                );
                ToolResult::failure(&self.tool.id, elapsed_ms(start), error)
            }
        }
    }

    /// Live session: process and connection state. No session: the command
    /// resolves on `PATH`. Never spawns.
    async fn health_check(&self) -> bool {
        let current = match self.session.try_lock() {
            Ok(slot) => slot.clone(),
            // A start is in flight; answer from the command alone.
            Err(_) => None,
        };
        if let Some(session) = current {
            if session.is_usable().await {
                return true;
            }
        }
        // A dead session is replaced by the next analyze, so only the
        // command decides whether the tool can still run.
        command_available(&self.server.command)
    }

    async fn metadata(&self) -> ToolMetadata {
        let mut metadata = ToolMetadata::from_tool(&self.tool);
        let current = self.session.try_lock().ok().and_then(|slot| slot.clone());
        if let Some(session) = current {
            let info = session.info();
            metadata.server_version = info.server_info.as_ref().map(|si| {
                format!(
                    "{} {}",
                    si.name.as_deref().unwrap_or("unknown"),
                    si.version.as_deref().unwrap_or("?")
                )
            });
            metadata.discovered_tools = info.tool_names().iter().map(|n| n.to_string()).collect();
        }
        metadata
    }

    async fn cleanup(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.shutdown(self.options.shutdown_grace).await;
        }
    }
}

/// Default arguments with per-call overrides merged on top.
fn build_arguments(context: &AnalysisContext, overrides: Option<&Value>) -> Value {
    let mut arguments = json!({
        "files": context.file_paths(),
        "repository": context.repository.name,
    });
    if let (Some(path), Some(obj)) = (&context.repository.path, arguments.as_object_mut()) {
        obj.insert("path".into(), Value::String(path.clone()));
    }

    if let (Some(Value::Object(extra)), Some(obj)) = (overrides, arguments.as_object_mut()) {
        for (key, value) in extra {
            obj.insert(key.clone(), value.clone());
        }
    }
    arguments
}

/// Forward server notifications into the log until the session goes away.
fn spawn_notification_logger(tool_id: &str, mut rx: broadcast::Receiver<ServerNotification>) {
    let tool_id = tool_id.to_string();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ServerNotification::Progress {
                    progress, total, message, ..
                }) => tracing::debug!(tool = %tool_id, progress, total = ?total, message = ?message, "tool progress"),
                Ok(ServerNotification::Log { level, logger, data }) => {
                    tracing::debug!(tool = %tool_id, level = %level, logger = ?logger, data = %data, "tool log")
                }
                Ok(ServerNotification::ResourceUpdated { uri }) => {
                    tracing::debug!(tool = %tool_id, uri = %uri, "tool resource updated")
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(tool = %tool_id, skipped, "notification logger lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{FileChange, Role, ToolRequirements, TransportKind};
    use std::collections::BTreeSet;

    fn tool(role: Role) -> Tool {
        Tool {
            id: "ghost".into(),
            name: "Ghost".into(),
            capabilities: BTreeSet::from(["linting".to_string()]),
            requirements: ToolRequirements {
                timeout_ms: 1_000,
                ..ToolRequirements::default()
            },
            supported_roles: BTreeSet::from([role]),
            transport: TransportKind::Process,
            tags: BTreeSet::new(),
        }
    }

    fn missing_binary() -> ServerConfig {
        ServerConfig {
            command: "definitely-not-a-real-binary-xyz".into(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_build_arguments_merges_overrides() {
        let mut ctx = AnalysisContext::new(Role::CodeQuality);
        ctx.repository.name = "acme/web".into();
        ctx.pull_request.files.push(FileChange {
            path: "a.js".into(),
            ..FileChange::default()
        });

        let args = build_arguments(&ctx, Some(&json!({"fix": true, "repository": "override"})));
        assert_eq!(args["files"], json!(["a.js"]));
        assert_eq!(args["fix"], true);
        assert_eq!(args["repository"], "override");
        assert!(args.get("path").is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_becomes_recoverable_result() {
        let adapter = McpToolAdapter::new(tool(Role::CodeQuality), missing_binary(), SessionOptions::default());
        let result = adapter.analyze(&AnalysisContext::new(Role::CodeQuality)).await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.code, "SPAWN_FAILED");
        assert!(error.recoverable);
        assert_eq!(adapter.spawn_count(), 1);
        assert!(adapter.process_id().await.is_none());
    }

    #[tokio::test]
    async fn test_incompatible_context_is_not_applicable() {
        let adapter = McpToolAdapter::new(tool(Role::CodeQuality), missing_binary(), SessionOptions::default());
        let result = adapter.analyze(&AnalysisContext::new(Role::Security)).await;
        assert_eq!(result.error.unwrap().code, "NOT_APPLICABLE");
        assert_eq!(adapter.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_health_check_does_not_spawn() {
        let adapter = McpToolAdapter::new(tool(Role::CodeQuality), missing_binary(), SessionOptions::default());
        assert!(!adapter.health_check().await);
        assert_eq!(adapter.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_without_session_is_noop() {
        let adapter = McpToolAdapter::new(tool(Role::CodeQuality), missing_binary(), SessionOptions::default());
        adapter.cleanup().await;
        adapter.cleanup().await;
        let metadata = adapter.metadata().await;
        assert_eq!(metadata.id, "ghost");
        assert!(metadata.discovered_tools.is_empty());
    }
}
