use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use mcp_tool_runtime::analysis::{
    execute_selection, AnalysisContext, ContextAwareToolSelector, ResultAggregator, Role,
};
use mcp_tool_runtime::config::{build_registry, find_config_path, load_runtime_config};
use mcp_tool_runtime::{init_tracing, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "mcp-tool-runtime")]
#[command(about = "Select and run MCP analysis tools for a pull request", long_about = None)]
struct Args {
    /// Path to the tools config. Defaults to the nearest mcp-tools.yaml.
    #[arg(short, long, env = "MCP_TOOL_RUNTIME_CONFIG")]
    config: Option<PathBuf>,

    /// Analysis context as JSON; `-` reads stdin
    #[arg(long)]
    context: PathBuf,

    /// Override the context's agent role
    #[arg(long)]
    role: Option<Role>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config_path = match args.config {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            find_config_path(&cwd)?
        }
    };
    tracing::info!(config = %config_path.display(), "loading tool config");

    let config = load_runtime_config(&config_path)?;
    let registry = Arc::new(build_registry(&config)?);

    let mut selector = ContextAwareToolSelector::new(registry.clone(), config.selector_config()?);
    if let Some(source) = config.preference_source() {
        selector = selector.with_preferences(source);
    }

    let mut context = read_context(&args.context)?;
    if let Some(role) = args.role {
        context.agent_role = role;
    }

    let selected = selector.select_tools(&context).await;
    let results = execute_selection(&selected, &context).await;
    let summary = ResultAggregator::aggregate(&results);

    let output = json!({
        "selected": &selected,
        "results": &results,
        "summary": &summary,
    });

    registry.cleanup_all().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to encode output")?
    );
    Ok(())
}

fn read_context(path: &Path) -> Result<AnalysisContext> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read context from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read context file {}", path.display()))?
    };
    serde_json::from_str(&raw).context("Failed to parse analysis context")
}
