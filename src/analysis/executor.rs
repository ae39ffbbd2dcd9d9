//! Runs a selection: primaries concurrently, fallbacks only when needed.

use std::sync::Arc;

use futures::future::join_all;

use super::adapter::ToolAdapter;
use super::selector::SelectedTools;
use super::types::{AnalysisContext, ToolResult};

async fn run_tier(tools: &[Arc<dyn ToolAdapter>], context: &AnalysisContext) -> Vec<ToolResult> {
    join_all(tools.iter().map(|tool| tool.analyze(context))).await
}

/// Results of every tool that ran, primaries first.
///
/// The fallback tier runs when the primary tier is empty or every primary
/// returned a failure.
pub async fn execute_selection(selected: &SelectedTools, context: &AnalysisContext) -> Vec<ToolResult> {
    let mut results = run_tier(&selected.primary, context).await;

    let primaries_failed = results.iter().all(|r| !r.success);
    if primaries_failed && !selected.fallback.is_empty() {
        tracing::info!(
            role = %context.agent_role,
            primaries = selected.primary.len(),
            fallbacks = selected.fallback.len(),
            "running fallback tools"
        );
        results.extend(run_tier(&selected.fallback, context).await);
    }
    results
}
