//! End-to-end tests against real child processes.
//!
//! The fake MCP server is a small `sh` script that answers `initialize`,
//! `tools/list` and `tools/call` with canned responses.

#![cfg(unix)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use mcp_tool_runtime::analysis::types::{FileChange, ToolRequirements};
use mcp_tool_runtime::analysis::{
    execute_selection, AnalysisContext, ContextAwareToolSelector, McpToolAdapter, ResultAggregator,
    Role, SelectorConfig, Severity, Tool, ToolAdapter, ToolRegistry, TransportKind,
};
use mcp_tool_runtime::config::{build_registry, load_runtime_config};
use mcp_tool_runtime::mcp_client::{ServerConfig, SessionOptions};

const LINT_RESULT: &str = r#"{"content":[{"type":"text","text":"[{\\"severity\\":\\"error\\",\\"message\\":\\"unused variable\\",\\"file\\":\\"src/a.js\\",\\"line\\":3}]"}]}"#;

const FAILING_RESULT: &str =
    r#"{"content":[{"type":"text","text":"eslint crashed: config not found"}],"isError":true}"#;

const SCRIPT: &str = r##"while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-lint","version":"1.0.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"lint","description":"Lint files","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":1,"progress":1}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":__RESULT__}\n' "$id" ;;
  esac
done
"##;

fn write_server(dir: &Path, call_result: &str) -> PathBuf {
    let path = dir.join("fake_server.sh");
    std::fs::write(&path, SCRIPT.replace("__RESULT__", call_result)).unwrap();
    path
}

fn lint_tool() -> Tool {
    Tool {
        id: "fake-lint".into(),
        name: "Fake lint".into(),
        capabilities: BTreeSet::from(["linting".to_string()]),
        requirements: ToolRequirements {
            timeout_ms: 5_000,
            ..ToolRequirements::default()
        },
        supported_roles: BTreeSet::from([Role::CodeQuality]),
        transport: TransportKind::Process,
        tags: BTreeSet::new(),
    }
}

fn options() -> SessionOptions {
    SessionOptions {
        init_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(500),
        ..SessionOptions::default()
    }
}

fn sh_adapter(script: &Path) -> McpToolAdapter {
    let server = ServerConfig {
        command: "sh".into(),
        args: vec![script.display().to_string()],
        ..ServerConfig::default()
    };
    McpToolAdapter::new(lint_tool(), server, options())
}

fn js_context() -> AnalysisContext {
    let mut ctx = AnalysisContext::new(Role::CodeQuality);
    ctx.repository.name = "acme/web".into();
    ctx.pull_request.files.push(FileChange {
        path: "src/a.js".into(),
        ..FileChange::default()
    });
    ctx
}

#[tokio::test]
async fn test_analyze_maps_findings_and_reuses_process() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = sh_adapter(&write_server(dir.path(), LINT_RESULT));
    let ctx = js_context();

    let first = adapter.analyze(&ctx).await;
    assert!(first.success, "{:?}", first.error);
    assert_eq!(first.findings.len(), 1);
    let finding = &first.findings[0];
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.message, "unused variable");
    assert_eq!(finding.file.as_deref(), Some("src/a.js"));
    assert_eq!(finding.line, Some(3));
    assert_eq!(first.metrics["toolCalls"], 1.0);

    let pid = adapter.process_id().await;
    assert!(pid.is_some());

    let second = adapter.analyze(&ctx).await;
    assert!(second.success);
    assert_eq!(adapter.process_id().await, pid);
    assert_eq!(adapter.spawn_count(), 1);

    let metadata = adapter.metadata().await;
    assert_eq!(metadata.discovered_tools, vec!["lint"]);
    assert_eq!(metadata.server_version.as_deref(), Some("fake-lint 1.0.0"));
    assert!(adapter.health_check().await);

    adapter.cleanup().await;
    assert!(adapter.process_id().await.is_none());

    // Cold start after cleanup.
    let third = adapter.analyze(&ctx).await;
    assert!(third.success);
    assert_eq!(adapter.spawn_count(), 2);
    adapter.cleanup().await;
}

#[tokio::test]
async fn test_concurrent_first_calls_share_one_process() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(sh_adapter(&write_server(dir.path(), LINT_RESULT)));
    let ctx = js_context();

    let results = join_all((0..5).map(|_| adapter.analyze(&ctx))).await;
    assert!(results.iter().all(|r| r.success));
    assert_eq!(adapter.spawn_count(), 1);
    adapter.cleanup().await;
}

#[tokio::test]
async fn test_dead_process_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = sh_adapter(&write_server(dir.path(), LINT_RESULT));
    let ctx = js_context();

    assert!(adapter.analyze(&ctx).await.success);
    let pid = adapter.process_id().await.unwrap();

    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());
    tokio::time::sleep(Duration::from_millis(200)).await;
    // The command still resolves, so the tool stays healthy and eligible.
    assert!(adapter.health_check().await);

    let result = adapter.analyze(&ctx).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(adapter.spawn_count(), 2);
    adapter.cleanup().await;
}

#[tokio::test]
async fn test_selector_keeps_tool_after_process_dies() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(sh_adapter(&write_server(dir.path(), LINT_RESULT)));
    let mut registry = ToolRegistry::new();
    registry.register(adapter.clone()).unwrap();
    let selector = ContextAwareToolSelector::new(Arc::new(registry), SelectorConfig::default());
    let ctx = js_context();

    assert!(adapter.analyze(&ctx).await.success);
    let pid = adapter.process_id().await.unwrap();
    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let selected = selector.select_tools(&ctx).await;
    assert_eq!(selected.primary_ids(), vec!["fake-lint"]);

    let results = execute_selection(&selected, &ctx).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success, "{:?}", results[0].error);
    assert_eq!(adapter.spawn_count(), 2);
    adapter.cleanup().await;
}

#[tokio::test]
async fn test_tool_reported_error_becomes_failure_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = sh_adapter(&write_server(dir.path(), FAILING_RESULT));

    let result = adapter.analyze(&js_context()).await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, "TOOL_ERROR");
    assert!(error.message.contains("config not found"));
    adapter.cleanup().await;
}

#[tokio::test]
async fn test_echo_server_fails_recoverably() {
    let server = ServerConfig {
        command: "echo".into(),
        args: vec!["this is not json-rpc".into()],
        ..ServerConfig::default()
    };
    let adapter = McpToolAdapter::new(lint_tool(), server, options());

    let started = Instant::now();
    let result = adapter.analyze(&js_context()).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.recoverable, "{error:?}");
    assert_eq!(error.code, "INIT_FAILED");

    adapter.cleanup().await;
    assert!(adapter.process_id().await.is_none());
}

#[tokio::test]
async fn test_config_driven_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_server(dir.path(), LINT_RESULT);
    let config_path = dir.path().join("mcp-tools.yaml");
    std::fs::write(
        &config_path,
        format!(
            r#"
health_check_timeout_ms: 2000
init_timeout_ms: 5000
shutdown_grace_ms: 500
tools:
  - id: fake-lint
    roles: [codeQuality]
    command: sh
    args: ["{script}"]
  - id: todo-scan
    transport: direct
    roles: [codeQuality]
    patterns:
      - needle: TODO
        severity: low
"#,
            script = script.display()
        ),
    )
    .unwrap();

    let config = load_runtime_config(&config_path).unwrap();
    let registry = Arc::new(build_registry(&config).unwrap());
    let selector = ContextAwareToolSelector::new(registry.clone(), config.selector_config().unwrap());

    let ctx = js_context();
    let selected = selector.select_tools(&ctx).await;
    assert_eq!(selected.primary_ids(), vec!["fake-lint"]);
    assert_eq!(selected.fallback_ids(), vec!["todo-scan"]);

    let results = execute_selection(&selected, &ctx).await;
    assert_eq!(results.len(), 1);

    let summary = ResultAggregator::aggregate(&results);
    assert!(summary.overall_success);
    assert_eq!(summary.total_findings, 1);
    assert_eq!(summary.findings[0].tool_id, "fake-lint");

    registry.cleanup_all().await;
}
